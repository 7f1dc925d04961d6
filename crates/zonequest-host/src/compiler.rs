//! Client for the external module compiler.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("failed to spawn compiler {compiler}")]
    Spawn {
        compiler: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("compiler exited with {status} while building {target}")]
    ExitStatus { target: String, status: ExitStatus },
    #[error("compiler wrote to stderr while building {target}: {stderr}")]
    Stderr { target: String, stderr: String },
    #[error("compiler reported '{marker}' while building {target}")]
    FailureMarker { target: String, marker: String },
    #[error("build of {target} failed: {reason}")]
    Failed { target: String, reason: String },
    #[error("compiler succeeded but produced no artifact at {path}")]
    MissingArtifact { path: PathBuf },
}

/// One compiler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Build target (scope name, or `common`)
    pub target: String,
    /// Artifact stem, `{scope}-{hash}` (or `common`)
    pub build_key: String,
    pub output_dir: PathBuf,
    pub source_dir: PathBuf,
}

impl CompileRequest {
    /// Where the artifact for this request is expected to appear
    pub fn artifact_path(&self, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.build_key, extension))
    }
}

/// Turns a script source directory into a module artifact
pub trait ModuleCompiler: Send + Sync {
    /// Compile `request`, returning the expected artifact path on success
    fn compile(&self, request: &CompileRequest) -> Result<PathBuf, CompileError>;
}

/// Runs the configured compiler executable as a subprocess
///
/// Invoked as `compiler <target> <build_key> <output_dir> <source_dir>` with
/// the source directory as working directory.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    program: PathBuf,
    failure_marker: String,
    artifact_extension: String,
}

impl ProcessCompiler {
    pub fn new(
        program: impl Into<PathBuf>,
        failure_marker: impl Into<String>,
        artifact_extension: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            failure_marker: failure_marker.into(),
            artifact_extension: artifact_extension.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ModuleCompiler for ProcessCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<PathBuf, CompileError> {
        info!(
            target: "quest::reload",
            "Compiling {} ({}) from {}",
            request.target,
            request.build_key,
            request.source_dir.display()
        );

        // wait_with_output drains both pipes before reaping the child
        let output = Command::new(&self.program)
            .arg(&request.target)
            .arg(&request.build_key)
            .arg(&request.output_dir)
            .arg(&request.source_dir)
            .current_dir(&request.source_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .and_then(|child| child.wait_with_output())
            .map_err(|source| {
                error!(
                    target: "quest::reload",
                    "Failed to run compiler {}: {}",
                    self.program.display(),
                    source
                );
                CompileError::Spawn {
                    compiler: self.program.clone(),
                    source,
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(target: "quest::reload", "Compiler stdout for {}:\n{}", request.target, stdout);

        let failure = if !output.status.success() {
            Some(CompileError::ExitStatus {
                target: request.target.clone(),
                status: output.status,
            })
        } else if !stderr.trim().is_empty() {
            Some(CompileError::Stderr {
                target: request.target.clone(),
                stderr: stderr.trim().to_string(),
            })
        } else if !self.failure_marker.is_empty() && stdout.contains(&self.failure_marker) {
            Some(CompileError::FailureMarker {
                target: request.target.clone(),
                marker: self.failure_marker.clone(),
            })
        } else {
            None
        };

        if let Some(err) = failure {
            error!(
                target: "quest::reload",
                "Build of {} failed: {}\n--- stdout ---\n{}\n--- stderr ---\n{}",
                request.target,
                err,
                stdout.trim_end(),
                stderr.trim_end()
            );
            return Err(err);
        }

        Ok(request.artifact_path(&self.artifact_extension))
    }
}
