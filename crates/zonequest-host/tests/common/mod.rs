//! Shared fixtures for the runtime integration tests
//!
//! Scripts are WAT text: each scope directory holds a single `module.wat`
//! that [`CopyCompiler`] "compiles" by copying it to the artifact path.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

use zonequest_host::config::LockConfig;
use zonequest_host::{CompileError, CompileRequest, ModuleCompiler, QuestConfig};

pub const SOURCE_FILE: &str = "module.wat";

/// Zone module: `Guard` logs its own instance handle as a digit
pub const ZONE_GUARD: &str = r#"
(module
  (import "host" "log" (func $log (param i32 i32 i32)))
  (memory (export "memory") 1)
  (global $next (mut i32) (i32.const 0))
  (func (export "Guard::new") (result i32)
    (global.set $next (i32.add (global.get $next) (i32.const 1)))
    (global.get $next))
  (func (export "Guard::event_say") (param $self i32)
    (i32.store8 (i32.const 0) (i32.add (i32.const 48) (local.get $self)))
    (call $log (i32.const 2) (i32.const 0) (i32.const 1)))
  (func (export "Trap::new") (result i32) (i32.const 7))
  (func (export "Trap::event_say") (param i32) unreachable))
"#;

/// Global module: `Guard` and `Banker` both log "G"
pub const GLOBAL_GUARD: &str = r#"
(module
  (import "host" "log" (func $log (param i32 i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "G")
  (func (export "Guard::event_say") (param i32)
    (call $log (i32.const 2) (i32.const 0) (i32.const 1)))
  (func (export "Banker::event_say") (param i32)
    (call $log (i32.const 2) (i32.const 0) (i32.const 1))))
"#;

/// Temporary work directory laid out the way the runtime expects
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn scope_dir(&self, scope: &str) -> PathBuf {
        self.root().join("scripts").join(scope)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root().join("out")
    }

    /// Create `scope` with its project descriptor and module source
    pub fn add_scope(&self, scope: &str, wat: &str) {
        let dir = self.scope_dir(scope);
        fs::create_dir_all(&dir).expect("Failed to create scope dir");
        fs::write(dir.join(format!("{scope}.toml")), "").expect("Failed to write descriptor");
        self.write_source(scope, wat);
    }

    pub fn write_source(&self, scope: &str, wat: &str) {
        fs::write(self.scope_dir(scope).join(SOURCE_FILE), wat).expect("Failed to write source");
    }

    /// Rewrite the source with an mtime in the future so pollers notice it
    pub fn touch_source(&self, scope: &str, wat: &str) {
        let path = self.scope_dir(scope).join(SOURCE_FILE);
        fs::write(&path, wat).expect("Failed to write source");
        let file = fs::File::options()
            .write(true)
            .open(&path)
            .expect("Failed to open source");
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .expect("Failed to set mtime");
    }

    pub fn config(&self) -> QuestConfig {
        QuestConfig {
            artifact_extension: "wat".to_string(),
            source_extensions: vec!["wat".to_string()],
            hot_reload: false,
            poll_interval_ms: 50,
            lock: LockConfig {
                poll_interval_ms: 10,
                max_attempts: 1000,
                ..Default::default()
            },
            ..QuestConfig::with_workdir(self.root())
        }
    }
}

/// In-process compiler that copies `module.wat` to the artifact
///
/// The artifact is written to a temp file and renamed so a concurrent
/// reader never sees a partial module.
#[derive(Default)]
pub struct CopyCompiler {
    compiles: AtomicUsize,
    delay: Duration,
}

impl CopyCompiler {
    pub fn slow(delay: Duration) -> Self {
        Self {
            compiles: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl ModuleCompiler for CopyCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<PathBuf, CompileError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);

        let failed = |reason: std::io::Error| CompileError::Failed {
            target: request.target.clone(),
            reason: reason.to_string(),
        };
        let wat = fs::read_to_string(request.source_dir.join(SOURCE_FILE)).map_err(failed)?;
        let artifact = request.artifact_path("wat");
        let partial = artifact.with_extension("partial");
        fs::write(&partial, wat).map_err(failed)?;
        fs::rename(&partial, &artifact).map_err(failed)?;
        Ok(artifact)
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
