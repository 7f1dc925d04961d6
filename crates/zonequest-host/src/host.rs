use std::sync::Arc;
use tracing::{info, warn};

use zonequest_events::QuestEvent;

use crate::compiler::{ModuleCompiler, ProcessCompiler};
use crate::config::{ConfigError, QuestConfig};
use crate::context::HostContext;
use crate::error_chain;
use crate::reload::{ReloadTrigger, ReloadWorkers};
use crate::router::EventRouter;
use crate::state::{RuntimeState, ScopeKind, ScopeStatus};
use crate::supervisor::{ReloadError, ReloadOutcome, ReloadSupervisor};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Reload(#[from] ReloadError),
    #[error("reload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Quest runtime embedded in one zone process
///
/// Lifecycle: [`QuestHost::attach_host`] and [`QuestHost::start`] when the
/// zone boots, [`QuestHost::dispatch`] for every event, and
/// [`QuestHost::shutdown`] when it stops.
pub struct QuestHost {
    config: QuestConfig,
    state: Arc<RuntimeState>,
    supervisor: Arc<ReloadSupervisor>,
    router: EventRouter,
    workers: Option<ReloadWorkers>,
}

impl QuestHost {
    /// Runtime for `zone` using the configured compiler executable
    pub fn new(config: QuestConfig, zone: &str) -> Result<Self, HostError> {
        let compiler = ProcessCompiler::new(
            config.compiler_path(),
            config.failure_marker.clone(),
            config.artifact_extension.clone(),
        );
        Self::with_compiler(config, zone, Arc::new(compiler))
    }

    pub fn with_compiler(
        config: QuestConfig,
        zone: &str,
        compiler: Arc<dyn ModuleCompiler>,
    ) -> Result<Self, HostError> {
        config.validate()?;
        QuestConfig::validate_zone(zone)?;

        let state = Arc::new(RuntimeState::new(zone));
        let supervisor = Arc::new(ReloadSupervisor::from_config(
            state.clone(),
            &config,
            compiler,
        )?);

        Ok(Self {
            router: EventRouter::new(state.clone()),
            config,
            state,
            supervisor,
            workers: None,
        })
    }

    pub fn config(&self) -> &QuestConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    pub fn supervisor(&self) -> &Arc<ReloadSupervisor> {
        &self.supervisor
    }

    pub fn attach_host(&self, host: HostContext) {
        info!(target: "quest", "Attached host for zone {}", host.zone_name());
        self.state.attach_host(host);
    }

    /// Bootstrap the common library, load both scopes and start the workers
    ///
    /// Load failures are logged; the runtime starts with whatever loaded.
    pub async fn start(&mut self) -> Result<(), HostError> {
        let supervisor = self.supervisor.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = supervisor.ensure_common_library() {
                warn!(
                    target: "quest::reload",
                    "Common library bootstrap failed: {}",
                    error_chain(&e)
                );
            }

            for kind in ScopeKind::ALL {
                let scope = supervisor.state().scope(kind).name();
                if supervisor.layout().scope_dir(scope).is_dir() {
                    // Failures are logged by the supervisor
                    supervisor.reload(kind).ok();
                } else {
                    info!(target: "quest::reload", "No scripts for {}", scope);
                }
            }
        })
        .await?;

        if self.workers.is_none() {
            let poll = self.config.hot_reload.then(|| self.config.poll_interval());
            self.workers = Some(ReloadWorkers::spawn(self.supervisor.clone(), poll));
        }
        Ok(())
    }

    /// Reload every scope when the process receives SIGUSR2
    pub fn enable_reload_signal(&mut self) {
        if let Some(workers) = self.workers.as_mut() {
            workers.listen_for_signal();
        }
    }

    pub fn dispatch(&self, event: &QuestEvent) {
        self.router.dispatch(event);
    }

    /// Queue a background reload of `kind`; ignored before [`QuestHost::start`]
    pub fn request_reload(&self, kind: ScopeKind) {
        if let Some(trigger) = self.trigger() {
            trigger.request(kind);
        }
    }

    pub fn request_reload_all(&self) {
        if let Some(trigger) = self.trigger() {
            trigger.request_all();
        }
    }

    pub fn trigger(&self) -> Option<ReloadTrigger> {
        self.workers.as_ref().map(ReloadWorkers::trigger)
    }

    /// Run one reload of `kind` now and wait for its outcome
    pub async fn reload(&self, kind: ScopeKind) -> Result<ReloadOutcome, HostError> {
        let supervisor = self.supervisor.clone();
        let outcome = tokio::task::spawn_blocking(move || supervisor.reload(kind)).await??;
        Ok(outcome)
    }

    pub fn status(&self) -> Vec<ScopeStatus> {
        ScopeKind::ALL
            .into_iter()
            .map(|kind| self.state.scope_status(kind))
            .collect()
    }

    /// Stop the workers, dispose both modules and detach the host
    pub async fn shutdown(&mut self) {
        if let Some(workers) = self.workers.take() {
            workers.shutdown().await;
        }
        let state = self.state.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || state.unload_all()).await {
            warn!(target: "quest", "Unloading modules failed: {}", e);
        }
        self.state.detach_host();
        info!(target: "quest", "Quest runtime for {} stopped", self.state.zone_name());
    }
}
