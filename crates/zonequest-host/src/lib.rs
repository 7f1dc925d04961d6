//! Hot-reloading quest script runtime
//!
//! This crate builds zone and global script modules with an external
//! compiler, swaps them in while the zone server keeps running, and routes
//! quest events from the server into them.

pub mod compiler;
pub mod config;
pub mod context;
pub mod hasher;
pub mod host;
pub mod layout;
pub mod lock;
pub mod reload;
pub mod router;
pub mod scanner;
pub mod state;
pub mod supervisor;
pub mod wasm;

// Re-export commonly used types for embedders
pub use compiler::{CompileError, CompileRequest, ModuleCompiler, ProcessCompiler};
pub use config::{ConfigError, QuestConfig};
pub use context::{HostContext, HostHandles, ScriptMessage};
pub use hasher::{BuildKey, ContentHash, compute_build_key};
pub use host::{HostError, QuestHost};
pub use layout::ScriptLayout;
pub use lock::BuildLock;
pub use reload::{ReloadTrigger, ReloadWorkers};
pub use router::EventRouter;
pub use scanner::ChangeWatcher;
pub use state::{RuntimeState, ScopeKind, ScopeStatus};
pub use supervisor::{LockPolicy, ReloadError, ReloadOutcome, ReloadSupervisor};
pub use wasm::{LoadError, LoadedModule, ModuleLoadContext};

pub use zonequest_events as events;

/// Render an error and all of its sources on one line
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
