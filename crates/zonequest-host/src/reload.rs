use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::scanner::ChangeWatcher;
use crate::state::ScopeKind;
use crate::supervisor::{ReloadOutcome, ReloadSupervisor};

/// Cloneable handle that requests reloads from the workers
///
/// Each scope holds at most one pending request; triggers arriving while a
/// reload is pending or running collapse into a single follow-up reload.
#[derive(Clone, Default)]
pub struct ReloadTrigger {
    zone: Arc<Notify>,
    global: Arc<Notify>,
}

impl ReloadTrigger {
    fn notify(&self, kind: ScopeKind) -> &Arc<Notify> {
        match kind {
            ScopeKind::Zone => &self.zone,
            ScopeKind::Global => &self.global,
        }
    }

    pub fn request(&self, kind: ScopeKind) {
        self.notify(kind).notify_one();
    }

    pub fn request_all(&self) {
        for kind in ScopeKind::ALL {
            self.request(kind);
        }
    }
}

/// Background reload tasks: one worker per scope, plus optional pollers
pub struct ReloadWorkers {
    trigger: ReloadTrigger,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ReloadWorkers {
    /// Spawn the workers; with `poll_interval` set, also spawn a change poller per scope
    pub fn spawn(supervisor: Arc<ReloadSupervisor>, poll_interval: Option<Duration>) -> Self {
        let trigger = ReloadTrigger::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        for kind in ScopeKind::ALL {
            let notify = trigger.notify(kind).clone();
            tasks.push(tokio::spawn(run_worker(
                kind,
                supervisor.clone(),
                notify.clone(),
                shutdown_rx.clone(),
            )));

            if let Some(interval) = poll_interval {
                let scope = supervisor.state().scope(kind).name().to_string();
                let watcher = ChangeWatcher::new(supervisor.layout().clone(), scope);
                tasks.push(tokio::spawn(run_poller(
                    watcher,
                    notify,
                    interval,
                    shutdown_rx.clone(),
                )));
            }
        }

        Self {
            trigger,
            shutdown_tx,
            tasks,
        }
    }

    pub fn trigger(&self) -> ReloadTrigger {
        self.trigger.clone()
    }

    /// Reload every scope on SIGUSR2
    #[cfg(unix)]
    pub fn listen_for_signal(&mut self) {
        let trigger = self.trigger.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        self.tasks.push(tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigusr2 = match signal(SignalKind::user_defined2()) {
                Ok(s) => s,
                Err(e) => {
                    error!(target: "quest::reload", "Failed to register SIGUSR2 handler: {}", e);
                    return;
                }
            };

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    received = sigusr2.recv() => {
                        if received.is_none() {
                            break;
                        }
                        info!(target: "quest::reload", "Received SIGUSR2 - triggering script reload");
                        trigger.request_all();
                    }
                }
            }
        }));
    }

    /// SIGUSR2 reload is not available on this platform
    #[cfg(not(unix))]
    pub fn listen_for_signal(&mut self) {
        tracing::warn!(target: "quest::reload", "SIGUSR2 reload not supported on this platform");
    }

    /// Stop every task, waiting for in-flight reloads to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(target: "quest::reload", "Reload task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(
    kind: ScopeKind,
    supervisor: Arc<ReloadSupervisor>,
    notify: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = notify.notified() => {}
        }

        let job = supervisor.clone();
        match tokio::task::spawn_blocking(move || job.reload(kind)).await {
            Ok(Ok(ReloadOutcome::Unchanged)) => {}
            Ok(Ok(outcome)) => debug!(target: "quest::reload", "{} worker: {}", kind, outcome),
            // The supervisor has already logged the failure
            Ok(Err(_)) => {}
            Err(e) => error!(target: "quest::reload", "{} reload panicked: {}", kind, e),
        }
    }
    debug!(target: "quest::reload", "{} reload worker stopped", kind);
}

async fn run_poller(
    mut watcher: ChangeWatcher,
    notify: Arc<Notify>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        if watcher.poll() {
            info!(
                target: "quest::reload",
                "Detected changes in {}, scheduling reload",
                watcher.scope()
            );
            notify.notify_one();
        }
    }
}
