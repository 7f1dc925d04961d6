//! Per-scope reload state machine.
//!
//! ```text
//! Idle -> Checking -> (Loading | Building) -> Installing -> Idle
//!                  \-> Unchanged
//! any error -> Failed -> Idle (previous module stays live)
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use wasmtime::Engine;

use crate::compiler::{CompileError, CompileRequest, ModuleCompiler};
use crate::config::QuestConfig;
use crate::error_chain;
use crate::hasher::{BuildKey, compute_build_key};
use crate::layout::{COMMON_SCOPE, ScriptLayout};
use crate::lock::BuildLock;
use crate::state::{RuntimeState, ScopeKind};
use crate::wasm::{LoadError, LoadedModule, ModuleLoadContext, create_engine};

/// How long a process waits for another one to build the global module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    pub name: String,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            name: "global-reload".to_string(),
            poll_interval: Duration::from_millis(100),
            max_attempts: 300,
        }
    }
}

/// How a successful reload obtained its module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The installed module already matches the sources
    Unchanged,
    /// An existing artifact was loaded without compiling
    Loaded,
    /// This process compiled the artifact
    Built,
    /// Another process compiled the artifact while we waited
    Adopted,
}

impl std::fmt::Display for ReloadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReloadOutcome::Unchanged => "unchanged",
            ReloadOutcome::Loaded => "loaded",
            ReloadOutcome::Built => "built",
            ReloadOutcome::Adopted => "adopted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("script directory {path} does not exist")]
    MissingSource { path: PathBuf },
    #[error("project descriptor {path} does not exist")]
    MissingDescriptor { path: PathBuf },
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("failed to load {path}")]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },
    #[error("build lock {path} is unusable")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create module engine")]
    Engine(#[source] anyhow::Error),
}

/// Drives reloads of the zone and global scopes of one [`RuntimeState`]
pub struct ReloadSupervisor {
    state: Arc<RuntimeState>,
    layout: ScriptLayout,
    compiler: Arc<dyn ModuleCompiler>,
    engine: Engine,
    lock_policy: LockPolicy,
    fuel: Option<u64>,
}

impl ReloadSupervisor {
    pub fn new(
        state: Arc<RuntimeState>,
        layout: ScriptLayout,
        compiler: Arc<dyn ModuleCompiler>,
        lock_policy: LockPolicy,
        fuel: Option<u64>,
    ) -> Result<Self, ReloadError> {
        let engine = create_engine(fuel.is_some()).map_err(ReloadError::Engine)?;
        Ok(Self {
            state,
            layout,
            compiler,
            engine,
            lock_policy,
            fuel,
        })
    }

    pub fn from_config(
        state: Arc<RuntimeState>,
        config: &QuestConfig,
        compiler: Arc<dyn ModuleCompiler>,
    ) -> Result<Self, ReloadError> {
        Self::new(
            state,
            config.layout(),
            compiler,
            config.lock_policy(),
            config.fuel_per_event(),
        )
    }

    pub fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    pub fn layout(&self) -> &ScriptLayout {
        &self.layout
    }

    /// Run one reload cycle of `kind`
    ///
    /// Blocks on compilation and, for the global scope, on the build lock.
    /// Dispatch into both scopes is suspended until it returns. On error the
    /// previously installed module stays live.
    pub fn reload(&self, kind: ScopeKind) -> Result<ReloadOutcome, ReloadError> {
        let slot = self.state.scope(kind);
        let _guard = slot.begin_reload();

        let result = self.check_and_install(kind);
        match &result {
            Ok(ReloadOutcome::Unchanged) => {
                debug!(target: "quest::reload", "{} is up to date", slot.name());
            }
            Ok(outcome) => {
                info!(target: "quest::reload", "Reloaded {} ({})", slot.name(), outcome);
            }
            Err(e) => {
                error!(
                    target: "quest::reload",
                    "Reload of {} failed: {}",
                    slot.name(),
                    error_chain(e)
                );
            }
        }
        result
    }

    fn check_and_install(&self, kind: ScopeKind) -> Result<ReloadOutcome, ReloadError> {
        let slot = self.state.scope(kind);
        let scope = slot.name();

        let key = compute_build_key(&self.layout, scope);
        if key.is_empty() {
            return Err(ReloadError::MissingSource {
                path: self.layout.scope_dir(scope),
            });
        }
        if slot.installed_key().as_ref() == Some(&key) {
            return Ok(ReloadOutcome::Unchanged);
        }

        let artifact = self.layout.artifact_path(&key);
        if artifact.is_file() {
            match self.load(scope, &artifact, &key) {
                Ok(module) => {
                    self.state.install(kind, module);
                    return Ok(ReloadOutcome::Loaded);
                }
                Err(e) => {
                    warn!(
                        target: "quest::reload",
                        "Existing artifact unusable, rebuilding: {}",
                        error_chain(&e)
                    );
                }
            }
        }

        match kind {
            ScopeKind::Zone => {
                let module = self.build_and_load(scope, &key)?;
                self.state.install(kind, module);
                Ok(ReloadOutcome::Built)
            }
            ScopeKind::Global => self.build_shared(kind, &key),
        }
    }

    /// Build the global module under the cross-process lock
    fn build_shared(&self, kind: ScopeKind, key: &BuildKey) -> Result<ReloadOutcome, ReloadError> {
        let scope = self.state.scope(kind).name();
        let artifact = self.layout.artifact_path(key);
        let mut lock = BuildLock::new(&self.layout.output_dir, &self.lock_policy.name);
        let mut attempts = 0u32;

        loop {
            let acquired = lock.try_acquire().map_err(|source| ReloadError::Lock {
                path: lock.path().to_path_buf(),
                source,
            })?;

            if acquired {
                // Another process may have finished between our check and the lock
                if artifact.is_file() {
                    if let Ok(module) = self.load(scope, &artifact, key) {
                        self.state.install(kind, module);
                        return Ok(ReloadOutcome::Adopted);
                    }
                }
                let module = self.build_and_load(scope, key)?;
                lock.release();
                self.state.install(kind, module);
                return Ok(ReloadOutcome::Built);
            }

            attempts += 1;
            if artifact.is_file() {
                match self.load(scope, &artifact, key) {
                    Ok(module) => {
                        info!(
                            target: "quest::reload",
                            "Adopted {} built by another process",
                            artifact.display()
                        );
                        self.state.install(kind, module);
                        return Ok(ReloadOutcome::Adopted);
                    }
                    // Possibly still being written
                    Err(e) => debug!(
                        target: "quest::reload",
                        "Artifact not loadable yet: {}",
                        error_chain(&e)
                    ),
                }
            }

            if attempts >= self.lock_policy.max_attempts {
                warn!(
                    target: "quest::reload",
                    "Timed out after {} attempts waiting for {}; building locally",
                    attempts,
                    lock.path().display()
                );
                let module = self.build_and_load(scope, key)?;
                self.state.install(kind, module);
                return Ok(ReloadOutcome::Built);
            }

            if attempts % 10 == 0 {
                info!(
                    target: "quest::reload",
                    "Waiting for another process to build {} ({}/{})",
                    key,
                    attempts,
                    self.lock_policy.max_attempts
                );
            }
            std::thread::sleep(self.lock_policy.poll_interval);
        }
    }

    fn build_and_load(&self, scope: &str, key: &BuildKey) -> Result<LoadedModule, ReloadError> {
        let artifact = self.build(scope, key)?;
        self.load(scope, &artifact, key)
    }

    /// Compile `scope` into its artifact, retrying once if the compiler
    /// reports success without producing it
    fn build(&self, scope: &str, key: &BuildKey) -> Result<PathBuf, ReloadError> {
        let descriptor = self.layout.descriptor_path(scope);
        if !descriptor.is_file() {
            return Err(ReloadError::MissingDescriptor { path: descriptor });
        }

        let removed = self.layout.remove_stale_artifacts(scope);
        if removed > 0 {
            debug!(target: "quest::reload", "Removed {} stale artifact(s) of {}", removed, scope);
        }

        let request = self.request(scope, &key.to_string(), self.layout.scope_dir(scope))?;
        let artifact = self.layout.artifact_path(key);
        self.compile_to(&request, &artifact)?;
        Ok(artifact)
    }

    fn compile_to(&self, request: &CompileRequest, artifact: &Path) -> Result<(), ReloadError> {
        self.compiler.compile(request)?;
        if artifact.is_file() {
            return Ok(());
        }

        warn!(
            target: "quest::reload",
            "Compiler reported success but {} is missing; retrying once",
            artifact.display()
        );
        self.compiler.compile(request)?;
        if artifact.is_file() {
            Ok(())
        } else {
            Err(CompileError::MissingArtifact {
                path: artifact.to_path_buf(),
            }
            .into())
        }
    }

    fn request(&self, target: &str, build_key: &str, source_dir: PathBuf) -> Result<CompileRequest, ReloadError> {
        let output_dir = &self.layout.output_dir;
        fs::create_dir_all(output_dir).map_err(|source| ReloadError::Io {
            path: output_dir.clone(),
            source,
        })?;

        Ok(CompileRequest {
            target: target.to_string(),
            build_key: build_key.to_string(),
            output_dir: output_dir.clone(),
            source_dir,
        })
    }

    fn load(&self, scope: &str, artifact: &Path, key: &BuildKey) -> Result<LoadedModule, ReloadError> {
        ModuleLoadContext::new(&self.engine, &self.layout.output_dir, scope)
            .and_then(|context| context.with_fuel(self.fuel).load(artifact, key.clone()))
            .map_err(|source| ReloadError::Load {
                path: artifact.to_path_buf(),
                source,
            })
    }

    /// Build `out/common.{ext}` if it is missing and the common project exists
    ///
    /// Returns whether a build ran.
    pub fn ensure_common_library(&self) -> Result<bool, ReloadError> {
        let artifact = self.layout.module_path(COMMON_SCOPE);
        if artifact.is_file() {
            return Ok(false);
        }
        if !self.layout.descriptor_path(COMMON_SCOPE).is_file() {
            debug!(target: "quest::reload", "No common library project, skipping bootstrap");
            return Ok(false);
        }

        info!(target: "quest::reload", "Building common library");
        let request = self.request(COMMON_SCOPE, COMMON_SCOPE, self.layout.common_dir())?;
        self.compile_to(&request, &artifact)?;
        Ok(true)
    }
}
