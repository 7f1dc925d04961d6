use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wasmtime::{Engine, Linker, Module, Store};

use zonequest_events::{EventFamily, QuestEventId};

use super::bindings::{HOST_MODULE, add_host_imports};
use super::registry::HandlerRegistry;
use crate::context::{EventPayload, HostContext};
use crate::hasher::BuildKey;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read module {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid module {path}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("module {module} imports '{dependency}' but {path} does not exist")]
    MissingDependency {
        module: String,
        dependency: String,
        path: PathBuf,
    },
    #[error("module dependency cycle: {chain}")]
    DependencyCycle { chain: String },
    #[error("failed to instantiate {module}")]
    Instantiate {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to prepare module store")]
    Store(#[source] anyhow::Error),
}

/// Per-store data visible to host imports
pub struct GuestState {
    scope: String,
    host: Option<Arc<HostContext>>,
    payload: Option<EventPayload>,
}

impl GuestState {
    fn new(scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            host: None,
            payload: None,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Host context of the current call, if any
    pub fn host(&self) -> Option<&HostContext> {
        self.host.as_deref()
    }

    /// Payload of the current call, if any
    pub fn payload(&self) -> Option<&EventPayload> {
        self.payload.as_ref()
    }
}

/// Isolated store + linker that one artifact and its dependencies load into
///
/// Imports from the `host` namespace bind to host functions. Any other
/// import module `m` resolves to `{dependency_dir}/m.{ext}` (with the
/// extension of the artifact being loaded), instantiated once per context.
pub struct ModuleLoadContext {
    store: Store<GuestState>,
    linker: Linker<GuestState>,
    dependency_dir: PathBuf,
    fuel: Option<u64>,
    instantiated: HashSet<String>,
    loading: Vec<String>,
}

impl ModuleLoadContext {
    pub fn new(engine: &Engine, dependency_dir: impl Into<PathBuf>, scope: &str) -> Result<Self, LoadError> {
        let mut linker = Linker::new(engine);
        add_host_imports(&mut linker).map_err(LoadError::Store)?;

        Ok(Self {
            store: Store::new(engine, GuestState::new(scope)),
            linker,
            dependency_dir: dependency_dir.into(),
            fuel: None,
            instantiated: HashSet::new(),
            loading: Vec::new(),
        })
    }

    /// Grant `fuel` to every guest call; requires a fuel-enabled engine
    pub fn with_fuel(mut self, fuel: Option<u64>) -> Self {
        self.fuel = fuel;
        self
    }

    /// Load `artifact` and its dependencies, consuming the context
    pub fn load(mut self, artifact: &Path, key: BuildKey) -> Result<LoadedModule, LoadError> {
        let extension = artifact
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("wasm")
            .to_string();
        let name = artifact
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.to_string());

        let module = self.read_module(artifact)?;
        self.loading.push(name.clone());
        self.link_dependencies(&module, &name, &extension)?;

        self.refuel()?;
        let instance = self
            .linker
            .instantiate(&mut self.store, &module)
            .map_err(|source| LoadError::Instantiate {
                module: name.clone(),
                source,
            })?;
        let registry = HandlerRegistry::build(&module, &instance, &mut self.store);

        info!(
            target: "quest::reload",
            "Loaded {} ({} handler(s), {} dependency module(s))",
            artifact.display(),
            registry.handler_count(),
            self.instantiated.len()
        );

        Ok(LoadedModule {
            store: self.store,
            registry,
            key,
            artifact: artifact.to_path_buf(),
            generation: 0,
            fuel: self.fuel,
        })
    }

    fn read_module(&self, path: &Path) -> Result<Module, LoadError> {
        // Read into memory so no file handle outlives the load
        let bytes = fs::read(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Module::new(self.store.engine(), &bytes).map_err(|source| LoadError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    fn link_dependencies(&mut self, module: &Module, name: &str, extension: &str) -> Result<(), LoadError> {
        let mut dependencies: Vec<String> = Vec::new();
        for import in module.imports() {
            let dep = import.module();
            if dep != HOST_MODULE && !dependencies.iter().any(|d| d == dep) {
                dependencies.push(dep.to_string());
            }
        }

        for dep in dependencies {
            if self.instantiated.contains(&dep) {
                continue;
            }
            if self.loading.contains(&dep) {
                let mut chain = self.loading.clone();
                chain.push(dep);
                return Err(LoadError::DependencyCycle {
                    chain: chain.join(" -> "),
                });
            }

            let path = self.dependency_dir.join(format!("{}.{}", dep, extension));
            if !path.is_file() {
                return Err(LoadError::MissingDependency {
                    module: name.to_string(),
                    dependency: dep,
                    path,
                });
            }

            debug!(target: "quest::reload", "Loading dependency {} of {}", dep, name);
            let dep_module = self.read_module(&path)?;
            self.loading.push(dep.clone());
            self.link_dependencies(&dep_module, &dep, extension)?;

            self.refuel()?;
            let instance = self
                .linker
                .instantiate(&mut self.store, &dep_module)
                .map_err(|source| LoadError::Instantiate {
                    module: dep.clone(),
                    source,
                })?;
            self.linker
                .instance(&mut self.store, &dep, instance)
                .map_err(|source| LoadError::Instantiate {
                    module: dep.clone(),
                    source,
                })?;

            self.loading.pop();
            self.instantiated.insert(dep);
        }

        Ok(())
    }

    fn refuel(&mut self) -> Result<(), LoadError> {
        if let Some(fuel) = self.fuel {
            self.store.set_fuel(fuel).map_err(LoadError::Store)?;
        }
        Ok(())
    }
}

/// A module instantiated in its own load context
///
/// Dropping it releases the store and everything loaded into it.
pub struct LoadedModule {
    store: Store<GuestState>,
    registry: HandlerRegistry,
    key: BuildKey,
    artifact: PathBuf,
    generation: u64,
    fuel: Option<u64>,
}

impl LoadedModule {
    pub fn key(&self) -> &BuildKey {
        &self.key
    }

    pub fn scope(&self) -> &str {
        self.store.data().scope()
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn has_handler(&self, type_name: &str, family: EventFamily, id: QuestEventId) -> bool {
        self.registry.has_handler(type_name, family, id)
    }

    /// Create an instance of `type_name`; types without a constructor get handle 0
    pub fn construct(&mut self, type_name: &str, host: &Arc<HostContext>) -> anyhow::Result<i32> {
        let Some(ctor) = self.registry.constructor(type_name).cloned() else {
            return Ok(0);
        };
        let payload = EventPayload::idle(host);
        self.call(Some(host.clone()), Some(payload), |store| ctor.call(store, ()))
    }

    /// Invoke the handler of `type_name` for (family, id) on `instance`
    ///
    /// Returns `Ok(false)` when the type has no such handler.
    pub fn invoke(
        &mut self,
        type_name: &str,
        family: EventFamily,
        id: QuestEventId,
        instance: i32,
        host: &Arc<HostContext>,
        payload: EventPayload,
    ) -> anyhow::Result<bool> {
        let Some(handler) = self.registry.handler(type_name, family, id).cloned() else {
            return Ok(false);
        };
        self.call(Some(host.clone()), Some(payload), |store| {
            handler.call(store, instance)
        })?;
        Ok(true)
    }

    /// Run the `ZoneLoad::init` hook, if exported
    pub fn run_init(&mut self, host: Option<Arc<HostContext>>) -> anyhow::Result<()> {
        let Some(init) = self.registry.init.clone() else {
            return Ok(());
        };
        let payload = host.as_deref().map(EventPayload::idle);
        self.call(host, payload, |store| init.call(store, ()))
    }

    /// Run the `ZoneLoad::dispose` hook (if exported) and drop the module
    pub fn unload(mut self, host: Option<Arc<HostContext>>) {
        if let Some(dispose) = self.registry.dispose.clone() {
            let payload = host.as_deref().map(EventPayload::idle);
            if let Err(e) = self.call(host, payload, |store| dispose.call(store, ())) {
                warn!(
                    target: "quest::reload",
                    "Dispose hook of {} failed: {:#}",
                    self.key,
                    e
                );
            }
        }
        info!(target: "quest::reload", "Unloaded {} (generation {})", self.key, self.generation);
    }

    fn call<R>(
        &mut self,
        host: Option<Arc<HostContext>>,
        payload: Option<EventPayload>,
        f: impl FnOnce(&mut Store<GuestState>) -> anyhow::Result<R>,
    ) -> anyhow::Result<R> {
        if let Some(fuel) = self.fuel {
            self.store.set_fuel(fuel)?;
        }

        let state = self.store.data_mut();
        state.host = host;
        state.payload = payload;

        let result = f(&mut self.store);

        let state = self.store.data_mut();
        state.host = None;
        state.payload = None;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostHandles;
    use crate::hasher::ContentHash;
    use crate::wasm::create_engine;
    use tempfile::TempDir;
    use zonequest_events::{EntityRef, EventSubtype, QuestEvent};

    const GUARD: &str = r#"
(module
  (import "host" "log" (func $log (param i32 i32 i32)))
  (import "host" "event_id" (func $event_id (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "hail")
  (global $next (mut i32) (i32.const 0))
  (func (export "Guard::new") (result i32)
    (global.set $next (i32.add (global.get $next) (i32.const 1)))
    (global.get $next))
  (func (export "Guard::event_say") (param i32)
    (call $log (i32.const 2) (i32.const 0) (i32.const 4)))
  (func (export "Guard::event_death") (param i32 i32))
  (func (export "Guard::helper") (param i32))
  (func (export "Trap::event_say") (param i32) unreachable)
  (func (export "Spin::event_say") (param i32) (loop $l (br $l))))
"#;

    fn key() -> BuildKey {
        BuildKey::new("qeynos", ContentHash::new([1; 32]))
    }

    fn write(dir: &Path, name: &str, wat: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, wat).unwrap();
        path
    }

    fn load(dir: &Path, artifact: &Path) -> Result<LoadedModule, LoadError> {
        let engine = create_engine(false).unwrap();
        ModuleLoadContext::new(&engine, dir, "qeynos")?.load(artifact, key())
    }

    fn host() -> (Arc<HostContext>, tokio::sync::mpsc::UnboundedReceiver<crate::ScriptMessage>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let host = HostContext::new("qeynos", HostHandles::default()).with_messages(tx);
        (Arc::new(host), rx)
    }

    #[test]
    fn test_registry_skips_mismatched_and_unknown_exports() {
        let dir = TempDir::new().unwrap();
        let artifact = write(dir.path(), "qeynos-01.wat", GUARD);
        let module = load(dir.path(), &artifact).unwrap();

        assert!(module.has_handler("Guard", EventFamily::Npc, QuestEventId::Say));
        assert!(module.has_handler("Guard", EventFamily::Player, QuestEventId::Say));
        assert!(!module.has_handler("Guard", EventFamily::Npc, QuestEventId::Death));
        assert!(module.registry().constructor("Guard").is_some());
        assert!(module.registry().constructor("Trap").is_none());
        assert_eq!(module.scope(), "qeynos");
    }

    #[test]
    fn test_invoke_forwards_script_log() {
        let dir = TempDir::new().unwrap();
        let artifact = write(dir.path(), "qeynos-01.wat", GUARD);
        let mut module = load(dir.path(), &artifact).unwrap();
        let (host, mut rx) = host();

        let handle = module.construct("Guard", &host).unwrap();
        assert_eq!(handle, 1);

        let event = QuestEvent::new(EventSubtype::Npc, QuestEventId::Say)
            .with_npc(EntityRef::new(1, "Guard01", "Guard"));
        let payload = EventPayload::from_event(&event, &host);
        let invoked = module
            .invoke("Guard", EventFamily::Npc, QuestEventId::Say, handle, &host, payload)
            .unwrap();
        assert!(invoked);

        let message = rx.try_recv().unwrap();
        assert_eq!(message.message, "hail");
        assert_eq!(message.scope, "qeynos");
        assert_eq!(message.level, tracing::Level::INFO);
    }

    #[test]
    fn test_trap_is_reported_as_error() {
        let dir = TempDir::new().unwrap();
        let artifact = write(dir.path(), "qeynos-01.wat", GUARD);
        let mut module = load(dir.path(), &artifact).unwrap();
        let (host, _rx) = host();

        let payload = EventPayload::idle(&host);
        let result = module.invoke("Trap", EventFamily::Npc, QuestEventId::Say, 0, &host, payload);
        assert!(result.is_err());
    }

    #[test]
    fn test_fuel_exhaustion_traps() {
        let dir = TempDir::new().unwrap();
        let artifact = write(dir.path(), "qeynos-01.wat", GUARD);
        let engine = create_engine(true).unwrap();
        let mut module = ModuleLoadContext::new(&engine, dir.path(), "qeynos")
            .unwrap()
            .with_fuel(Some(10_000))
            .load(&artifact, key())
            .unwrap();
        let (host, _rx) = host();

        let payload = EventPayload::idle(&host);
        let result = module.invoke("Spin", EventFamily::Npc, QuestEventId::Say, 0, &host, payload);
        assert!(result.is_err());

        // A fresh budget is granted to the next call
        let payload = EventPayload::idle(&host);
        assert!(module.invoke("Guard", EventFamily::Npc, QuestEventId::Say, 0, &host, payload).unwrap());
    }

    #[test]
    fn test_dependencies_resolve_from_dependency_dir() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "common.wat",
            r#"(module (func (export "answer") (result i32) (i32.const 42)))"#,
        );
        let artifact = write(
            dir.path(),
            "qeynos-01.wat",
            r#"
(module
  (import "common" "answer" (func $answer (result i32)))
  (func (export "Guard::new") (result i32) (call $answer)))
"#,
        );
        let mut module = load(dir.path(), &artifact).unwrap();
        let (host, _rx) = host();
        assert_eq!(module.construct("Guard", &host).unwrap(), 42);
    }

    #[test]
    fn test_missing_dependency_is_load_error() {
        let dir = TempDir::new().unwrap();
        let artifact = write(
            dir.path(),
            "qeynos-01.wat",
            r#"(module (import "common" "answer" (func (result i32))))"#,
        );
        let err = load(dir.path(), &artifact).err().unwrap();
        assert!(matches!(err, LoadError::MissingDependency { ref dependency, .. } if dependency == "common"));
    }

    #[test]
    fn test_dependency_cycle_is_load_error() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.wat", r#"(module (import "b" "f" (func)) (func (export "f")))"#);
        write(dir.path(), "b.wat", r#"(module (import "a" "f" (func)) (func (export "f")))"#);
        let artifact = write(dir.path(), "qeynos-01.wat", r#"(module (import "a" "f" (func)))"#);

        let err = load(dir.path(), &artifact).err().unwrap();
        assert!(matches!(err, LoadError::DependencyCycle { .. }));
    }

    #[test]
    fn test_invalid_module_is_load_error() {
        let dir = TempDir::new().unwrap();
        let artifact = write(dir.path(), "qeynos-01.wasm", "not a module");
        let err = load(dir.path(), &artifact).err().unwrap();
        assert!(matches!(err, LoadError::Invalid { .. }));
    }

    #[test]
    fn test_lifecycle_hooks_run() {
        let dir = TempDir::new().unwrap();
        let artifact = write(
            dir.path(),
            "qeynos-01.wat",
            r#"
(module
  (import "host" "log" (func $log (param i32 i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "initdispose")
  (func (export "ZoneLoad::init") (call $log (i32.const 2) (i32.const 0) (i32.const 4)))
  (func (export "ZoneLoad::dispose") (call $log (i32.const 2) (i32.const 4) (i32.const 7))))
"#,
        );
        let mut module = load(dir.path(), &artifact).unwrap();
        let (host, mut rx) = host();

        module.run_init(Some(host.clone())).unwrap();
        module.unload(Some(host));

        assert_eq!(rx.try_recv().unwrap().message, "init");
        assert_eq!(rx.try_recv().unwrap().message, "dispose");
    }
}
