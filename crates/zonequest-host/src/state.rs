//! Process-wide runtime state: one slot per scope plus the attached host.

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::context::HostContext;
use crate::hasher::BuildKey;
use crate::layout::GLOBAL_SCOPE;
use crate::wasm::LoadedModule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Zone,
    Global,
}

impl ScopeKind {
    pub const ALL: [ScopeKind; 2] = [ScopeKind::Zone, ScopeKind::Global];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Zone => "zone",
            ScopeKind::Global => "global",
        }
    }
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A script object created under one module generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedInstance {
    pub handle: i32,
    pub generation: u64,
}

/// Script instances keyed by (type name, entity key)
#[derive(Debug, Default)]
pub struct InstanceCache {
    entries: HashMap<(String, String), CachedInstance>,
}

impl InstanceCache {
    pub fn get(&self, type_name: &str, entity_key: &str) -> Option<CachedInstance> {
        self.entries
            .get(&(type_name.to_string(), entity_key.to_string()))
            .copied()
    }

    pub fn insert(&mut self, type_name: &str, entity_key: &str, instance: CachedInstance) {
        self.entries
            .insert((type_name.to_string(), entity_key.to_string()), instance);
    }

    pub fn remove(&mut self, type_name: &str, entity_key: &str) -> Option<CachedInstance> {
        self.entries
            .remove(&(type_name.to_string(), entity_key.to_string()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The live module of a scope and the instances created from it
#[derive(Default)]
pub struct ScopeModule {
    pub loaded: Option<LoadedModule>,
    pub cache: InstanceCache,
}

/// Reload/dispatch coordination for one scope
pub struct ScopeSlot {
    name: String,
    kind: ScopeKind,
    reloading: AtomicBool,
    /// Serializes reloads of this scope
    gate: Mutex<()>,
    module: Mutex<ScopeModule>,
}

impl ScopeSlot {
    fn new(name: impl Into<String>, kind: ScopeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            reloading: AtomicBool::new(false),
            gate: Mutex::new(()),
            module: Mutex::new(ScopeModule::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading.load(Ordering::SeqCst)
    }

    /// Take the reload gate, raise the reload flag and drop cached instances
    ///
    /// The flag is lowered when the returned guard drops.
    pub fn begin_reload(&self) -> ReloadGuard<'_> {
        let gate = self.gate.lock();
        self.reloading.store(true, Ordering::SeqCst);
        self.module.lock().cache.clear();
        debug!(target: "quest::reload", "Reload of {} started", self.name);
        ReloadGuard {
            slot: self,
            _gate: gate,
        }
    }

    /// Non-blocking access for the dispatch path
    pub(crate) fn try_module(&self) -> Option<MutexGuard<'_, ScopeModule>> {
        self.module.try_lock()
    }

    pub(crate) fn module(&self) -> MutexGuard<'_, ScopeModule> {
        self.module.lock()
    }

    pub fn installed_key(&self) -> Option<BuildKey> {
        self.module.lock().loaded.as_ref().map(|m| m.key().clone())
    }
}

/// Keeps a scope marked as reloading; clears the flag on drop
pub struct ReloadGuard<'a> {
    slot: &'a ScopeSlot,
    _gate: MutexGuard<'a, ()>,
}

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.slot.reloading.store(false, Ordering::SeqCst);
        debug!(target: "quest::reload", "Reload of {} finished", self.slot.name);
    }
}

/// Snapshot of one scope for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeStatus {
    pub scope: String,
    pub kind: ScopeKind,
    pub loaded_key: Option<BuildKey>,
    pub generation: Option<u64>,
    pub cached_instances: usize,
    pub reloading: bool,
}

/// Everything shared between the router, the supervisor and the workers
pub struct RuntimeState {
    zone: ScopeSlot,
    global: ScopeSlot,
    generation: AtomicU64,
    host: RwLock<Option<Arc<HostContext>>>,
}

impl RuntimeState {
    pub fn new(zone_name: impl Into<String>) -> Self {
        Self {
            zone: ScopeSlot::new(zone_name, ScopeKind::Zone),
            global: ScopeSlot::new(GLOBAL_SCOPE, ScopeKind::Global),
            generation: AtomicU64::new(0),
            host: RwLock::new(None),
        }
    }

    pub fn scope(&self, kind: ScopeKind) -> &ScopeSlot {
        match kind {
            ScopeKind::Zone => &self.zone,
            ScopeKind::Global => &self.global,
        }
    }

    pub fn zone_name(&self) -> &str {
        self.zone.name()
    }

    pub fn attach_host(&self, host: HostContext) {
        *self.host.write() = Some(Arc::new(host));
    }

    pub fn detach_host(&self) -> Option<Arc<HostContext>> {
        self.host.write().take()
    }

    pub fn host(&self) -> Option<Arc<HostContext>> {
        self.host.read().clone()
    }

    /// Whether any scope is between reload start and install
    pub fn any_reloading(&self) -> bool {
        self.zone.is_reloading() || self.global.is_reloading()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Swap `module` in as the live module of `kind`, returning its generation
    ///
    /// The previous module is disposed and dropped first; the init hook of
    /// the new one runs before the cache is cleared again.
    pub fn install(&self, kind: ScopeKind, mut module: LoadedModule) -> u64 {
        let host = self.host();
        let generation = self.next_generation();
        module.set_generation(generation);

        let slot = self.scope(kind);
        let mut guard = slot.module();
        guard.cache.clear();
        if let Some(old) = guard.loaded.take() {
            old.unload(host.clone());
        }

        if let Err(e) = module.run_init(host) {
            warn!(
                target: "quest::reload",
                "Init hook of {} failed: {:#}",
                module.key(),
                e
            );
        }
        guard.loaded = Some(module);
        guard.cache.clear();

        debug!(
            target: "quest::reload",
            "Installed {} module generation {}",
            slot.name(),
            generation
        );
        generation
    }

    /// Dispose and drop every loaded module
    pub fn unload_all(&self) {
        let host = self.host();
        for kind in ScopeKind::ALL {
            let mut guard = self.scope(kind).module();
            guard.cache.clear();
            if let Some(module) = guard.loaded.take() {
                module.unload(host.clone());
            }
        }
    }

    pub fn scope_status(&self, kind: ScopeKind) -> ScopeStatus {
        let slot = self.scope(kind);
        let guard = slot.module();
        ScopeStatus {
            scope: slot.name().to_string(),
            kind,
            loaded_key: guard.loaded.as_ref().map(|m| m.key().clone()),
            generation: guard.loaded.as_ref().map(|m| m.generation()),
            cached_instances: guard.cache.len(),
            reloading: slot.is_reloading(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_guard_clears_flag_on_drop() {
        let state = RuntimeState::new("qeynos");
        let slot = state.scope(ScopeKind::Zone);
        slot.module().cache.insert("Guard", "Guard01", CachedInstance { handle: 1, generation: 1 });

        {
            let _guard = slot.begin_reload();
            assert!(slot.is_reloading());
            assert!(state.any_reloading());
            assert!(slot.module().cache.is_empty());
        }

        assert!(!slot.is_reloading());
        assert!(!state.any_reloading());
    }

    #[test]
    fn test_reload_gate_is_separate_from_module_lock() {
        let state = RuntimeState::new("qeynos");
        let slot = state.scope(ScopeKind::Global);
        let _guard = slot.begin_reload();
        assert!(slot.try_module().is_some());
    }

    #[test]
    fn test_instance_cache() {
        let mut cache = InstanceCache::default();
        let instance = CachedInstance { handle: 3, generation: 7 };
        cache.insert("Guard", "Guard01", instance);

        assert_eq!(cache.get("Guard", "Guard01"), Some(instance));
        assert_eq!(cache.get("Guard", "Guard02"), None);
        assert_eq!(cache.get("Rat", "Guard01"), None);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.remove("Guard", "Guard01"), Some(instance));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_status_of_empty_state() {
        let state = RuntimeState::new("qeynos");
        let status = state.scope_status(ScopeKind::Global);
        assert_eq!(status.scope, "global");
        assert_eq!(status.loaded_key, None);
        assert_eq!(status.generation, None);
        assert!(!status.reloading);
        assert_eq!(state.zone_name(), "qeynos");
    }
}
