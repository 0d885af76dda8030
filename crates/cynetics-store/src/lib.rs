mod artifact;
mod local;
mod memory;

pub use artifact::ArtifactStore;
pub use local::LocalStore;
pub use memory::MemoryStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cynetics_core::Phase;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid data at {key}: {message}")]
    Decode { key: String, message: String },

    #[error("store error: {0}")]
    Internal(String),
}

/// A store for opaque blobs keyed by string paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write (create or overwrite) an object.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError>;

    /// Read an object. Returns `StoreError::NotFound` if absent.
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Read an object, returning `None` if it does not exist.
    async fn get_opt(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        match self.get(key).await {
            Ok(data) => Ok(Some(data)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List object keys under a prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// -- Key helpers --

pub const RUNS_PREFIX: &str = "runs";

pub fn run_key(run_id: &str) -> String {
    format!("{RUNS_PREFIX}/{run_id}/run.json")
}

pub fn phase_key(run_id: &str, phase: Phase) -> String {
    format!("{RUNS_PREFIX}/{run_id}/{}.json", phase.as_str())
}

pub fn report_key(run_id: &str) -> String {
    format!("{RUNS_PREFIX}/{run_id}/report.json")
}

// -- Configuration --

/// Configuration for the artifact store backend.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Base directory for persisted runs. Defaults to the XDG data dir.
    pub data_dir: Option<PathBuf>,
    /// Keep everything in memory; nothing survives the process.
    pub in_memory: bool,
}

impl StoreConfig {
    /// Build from `CYNETICS_DATA_DIR`, falling back to the default data dir.
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var_os("CYNETICS_DATA_DIR").map(PathBuf::from),
            in_memory: false,
        }
    }
}

// -- Factory --

/// Create an `ObjectStore` from configuration.
pub fn create_store(config: &StoreConfig) -> Arc<dyn ObjectStore> {
    if config.in_memory {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(LocalStore::new(config))
    }
}
