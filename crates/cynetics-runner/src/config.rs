use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cynetics_core::Phase;
use serde::{Deserialize, Serialize};

use crate::scheduler::{RetryPolicy, SchedulerConfig};

#[derive(Debug, Parser)]
#[command(name = "cynetics", about = "Spec-driven development workflow runner")]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, env = "CYNETICS_CONFIG", default_value = "cynetics.json", global = true)]
    pub config: PathBuf,

    /// Directory where runs and their artifacts are persisted
    #[arg(long, env = "CYNETICS_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the maximum number of tasks implemented at once
    #[arg(long, global = true)]
    pub max_concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a default configuration file
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Start a new run from a project description
    Run {
        #[arg(long)]
        description: String,
        /// Tech-stack preferences as a JSON object
        #[arg(long)]
        stack: Option<String>,
        /// Enter the workflow at this phase
        #[arg(long)]
        from_phase: Option<Phase>,
    },
    /// Continue a persisted run
    Resume {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        from_phase: Option<Phase>,
    },
    /// Print the implementation report of a run
    Report {
        #[arg(long)]
        run_id: String,
    },
    /// List persisted runs
    Runs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    ClaudeCli,
}

impl ProviderKind {
    /// Environment variable consulted when no API key is configured.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::ClaudeCli => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl ProviderConfig {
    /// The configured key, or the provider's environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| self.kind.api_key_env().and_then(|var| std::env::var(var).ok()))
            .filter(|k| !k.is_empty())
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

/// Knobs for the Implement phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub max_concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub attempt_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Treat criteria that cannot be checked mechanically as unmet.
    pub strict_criteria: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            attempt_timeout_secs: 900,
            generation_timeout_secs: 300,
            command_timeout_secs: 300,
            strict_criteria: false,
        }
    }
}

impl EngineSettings {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrency: self.max_concurrency.max(1),
            retry: RetryPolicy {
                base: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
                max_attempts: self.max_attempts.max(1),
            },
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub project_root: PathBuf,
    pub workspace_dir: PathBuf,
    pub artifacts_dir: Option<PathBuf>,
    pub default_provider: String,
    pub providers: Vec<ProviderConfig>,
    pub engine: EngineSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            workspace_dir: PathBuf::from("workspace"),
            artifacts_dir: None,
            default_provider: "anthropic".into(),
            providers: Vec::new(),
            engine: EngineSettings::default(),
        }
    }
}

impl Settings {
    /// The configuration `cynetics init` writes for a project rooted at `root`.
    pub fn default_for(root: &Path) -> Self {
        Self {
            project_root: root.to_path_buf(),
            workspace_dir: root.join("workspace"),
            artifacts_dir: Some(root.join("artifacts")),
            default_provider: "anthropic".into(),
            providers: vec![
                ProviderConfig {
                    name: "anthropic".into(),
                    kind: ProviderKind::Anthropic,
                    model: Some("claude-sonnet-4-5".into()),
                    api_key: None,
                    base_url: None,
                    temperature: default_temperature(),
                    max_tokens: default_max_tokens(),
                },
                ProviderConfig {
                    name: "openai".into(),
                    kind: ProviderKind::OpenAi,
                    model: Some("gpt-4o".into()),
                    api_key: None,
                    base_url: None,
                    temperature: default_temperature(),
                    max_tokens: default_max_tokens(),
                },
            ],
            engine: EngineSettings::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parse config {}", path.display()))
    }

    /// Load `path` if it exists, otherwise use what `init` would write for
    /// the current directory.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default_for(Path::new(".")))
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("serialize config")?;
        std::fs::write(path, data).with_context(|| format!("write config {}", path.display()))
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Workspace directory, resolved against the project root when relative.
    pub fn workspace_path(&self) -> PathBuf {
        self.resolve(&self.workspace_dir)
    }

    pub fn artifacts_path(&self) -> Option<PathBuf> {
        self.artifacts_dir.as_deref().map(|dir| self.resolve(dir))
    }

    /// Name used in prompt headers: the project root's directory name.
    pub fn project_name(&self) -> String {
        let root = if self.project_root == Path::new(".") {
            std::env::current_dir().unwrap_or_else(|_| self.project_root.clone())
        } else {
            self.project_root.clone()
        };
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.project_root.join(dir)
        }
    }
}
