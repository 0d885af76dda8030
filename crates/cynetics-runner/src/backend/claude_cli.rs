use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use super::{GenerationBackend, GenerationError, GenerationRequest};
use crate::process::{self, ProcessError};

/// Claude CLI backend: wraps the `claude` command-line tool in print mode.
///
/// `anthropic_base_url` points the CLI at any Anthropic-compatible endpoint.
pub struct ClaudeCliBackend {
    pub anthropic_base_url: Option<String>,
    pub model: Option<String>,
    /// Grace period between SIGTERM and SIGKILL when a call overruns.
    pub kill_grace: Duration,
}

impl ClaudeCliBackend {
    fn command(&self, request: &GenerationRequest) -> Command {
        let mut cmd = Command::new("claude");
        cmd.arg("-p")
            .arg(&request.prompt)
            .arg("--output-format")
            .arg("text");
        if !request.system.is_empty() {
            cmd.arg("--append-system-prompt").arg(&request.system);
        }
        if let Some(ref model) = self.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(ref url) = self.anthropic_base_url {
            cmd.env("ANTHROPIC_BASE_URL", url);
        }
        cmd
    }
}

#[async_trait]
impl GenerationBackend for ClaudeCliBackend {
    fn name(&self) -> &str {
        if self.anthropic_base_url.is_some() {
            "claude-cli/custom"
        } else {
            "claude-cli"
        }
    }

    fn model_hint(&self) -> Option<&str> {
        self.model.as_deref()
    }

    async fn preflight_check(&self) -> Result<()> {
        let output = std::process::Command::new("claude")
            .arg("--version")
            .output()
            .context(
                "Claude CLI is not installed. Install it: https://docs.anthropic.com/en/docs/claude-cli",
            )?;
        if !output.status.success() {
            bail!("claude --version failed");
        }
        let version = String::from_utf8_lossy(&output.stdout);
        info!("claude: {}", version.trim());
        Ok(())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let mut cmd = self.command(request);
        let output = process::run_managed_with_timeout(&mut cmd, request.timeout, self.kill_grace)
            .await
            .map_err(|e| match e {
                ProcessError::TimedOut(d) => GenerationError::Timeout(d),
                other => GenerationError::Process(other.to_string()),
            })?;

        if !output.success {
            return Err(GenerationError::Process(format!(
                "claude exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        if output.stdout.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: Option<&str>, model: Option<&str>) -> ClaudeCliBackend {
        ClaudeCliBackend {
            anthropic_base_url: url.map(str::to_string),
            model: model.map(str::to_string),
            kill_grace: Duration::from_secs(1),
        }
    }

    #[test]
    fn name_default() {
        assert_eq!(backend(None, None).name(), "claude-cli");
    }

    #[test]
    fn name_custom_endpoint() {
        assert_eq!(
            backend(Some("https://vllm.local"), None).name(),
            "claude-cli/custom"
        );
    }

    #[test]
    fn model_hint() {
        assert_eq!(backend(None, None).model_hint(), None);
        assert_eq!(backend(None, Some("opus")).model_hint(), Some("opus"));
    }

    #[test]
    fn command_arguments() {
        let b = backend(Some("https://vllm.local"), Some("m"));
        let req = GenerationRequest {
            system: "role".into(),
            prompt: "do it".into(),
            timeout: Duration::from_secs(1),
        };
        let cmd = b.command(&req);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["-p", "do it", "--output-format", "text", "--append-system-prompt", "role", "--model", "m"]
        );
        let env: Vec<_> = cmd.as_std().get_envs().collect();
        assert!(env.iter().any(|(k, v)| {
            k.to_str() == Some("ANTHROPIC_BASE_URL")
                && v.and_then(|v| v.to_str()) == Some("https://vllm.local")
        }));
    }
}
