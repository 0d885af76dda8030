//! Process capabilities: filesystem and shell operations invoked opaquely by
//! validation and task execution. Version-control actions go through `Shell`.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityCall {
    FileExists { path: String },
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    Shell { command: String, timeout: Duration },
}

impl CapabilityCall {
    /// Which capability server handles this call.
    pub fn server(&self) -> &'static str {
        match self {
            CapabilityCall::FileExists { .. }
            | CapabilityCall::ReadFile { .. }
            | CapabilityCall::WriteFile { .. } => "filesystem",
            CapabilityCall::Shell { .. } => "shell",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityOutput {
    pub success: bool,
    pub output: String,
    pub exit_code: Option<i32>,
}

impl CapabilityOutput {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            exit_code: None,
        }
    }

    fn not_ok(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            exit_code: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("path escapes workspace: {0}")]
    PathEscape(String),

    #[error("{operation} failed: {message}")]
    Io { operation: String, message: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

/// An external collaborator that performs filesystem/shell operations.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, call: &CapabilityCall) -> Result<CapabilityOutput, CapabilityError>;
}

/// Capabilities served directly from the local machine, rooted at a workspace.
#[derive(Debug, Clone)]
pub struct LocalCapabilities {
    root: PathBuf,
}

impl LocalCapabilities {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path, refusing anything that could leave it.
    fn resolve(&self, path: &str) -> Result<PathBuf, CapabilityError> {
        let rel = Path::new(path.trim());
        let escapes = rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || path.trim().is_empty() {
            return Err(CapabilityError::PathEscape(path.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl Capability for LocalCapabilities {
    async fn invoke(&self, call: &CapabilityCall) -> Result<CapabilityOutput, CapabilityError> {
        debug!(server = call.server(), ?call, "invoking capability");
        match call {
            CapabilityCall::FileExists { path } => {
                let full = self.resolve(path)?;
                let exists = tokio::fs::try_exists(&full).await.map_err(|e| io("stat", e))?;
                Ok(if exists {
                    CapabilityOutput::ok(full.display().to_string())
                } else {
                    CapabilityOutput::not_ok(format!("{path} does not exist"))
                })
            }
            CapabilityCall::ReadFile { path } => {
                let full = self.resolve(path)?;
                match tokio::fs::read(&full).await {
                    Ok(data) => Ok(CapabilityOutput::ok(String::from_utf8_lossy(&data))),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Ok(CapabilityOutput::not_ok(format!("{path} does not exist")))
                    }
                    Err(e) => Err(io("read", e)),
                }
            }
            CapabilityCall::WriteFile { path, content } => {
                let full = self.resolve(path)?;
                if let Some(parent) = full.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| io("mkdir", e))?;
                }
                tokio::fs::write(&full, content)
                    .await
                    .map_err(|e| io("write", e))?;
                Ok(CapabilityOutput::ok(format!("wrote {} bytes", content.len())))
            }
            CapabilityCall::Shell {
                command,
                timeout: limit,
            } => {
                let output = timeout(*limit, run_command(command, &self.root))
                    .await
                    .map_err(|_| CapabilityError::Timeout(*limit))?
                    .map_err(|e| io("spawn", e))?;
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.is_empty() {
                    text.push_str(&stderr);
                }
                Ok(CapabilityOutput {
                    success: output.status.success(),
                    output: text,
                    exit_code: output.status.code(),
                })
            }
        }
    }
}

fn io(operation: &str, e: std::io::Error) -> CapabilityError {
    CapabilityError::Io {
        operation: operation.to_string(),
        message: e.to_string(),
    }
}

async fn run_command(command: &str, dir: &Path) -> std::io::Result<std::process::Output> {
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .kill_on_drop(true)
        .output()
        .await
}
