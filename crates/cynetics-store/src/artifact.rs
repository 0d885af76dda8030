use std::sync::Arc;

use bytes::Bytes;
use cynetics_core::{Phase, Run};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{phase_key, report_key, run_key, ObjectStore, StoreError, RUNS_PREFIX};

/// Phase outputs and run records, keyed by run id.
///
/// Each `(run, phase)` key is last-writer-wins; nothing here coordinates
/// concurrent writers beyond what the backing `ObjectStore` does.
#[derive(Clone)]
pub struct ArtifactStore {
    inner: Arc<dyn ObjectStore>,
}

impl ArtifactStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    pub async fn put(
        &self,
        run_id: &str,
        phase: Phase,
        blob: impl Into<Bytes>,
    ) -> Result<(), StoreError> {
        let key = phase_key(run_id, phase);
        let blob = blob.into();
        debug!(run_id, phase = phase.as_str(), bytes = blob.len(), "storing artifact");
        self.inner.put(&key, blob).await
    }

    /// Fetch a phase artifact; `StoreError::NotFound` when the phase never ran.
    pub async fn get(&self, run_id: &str, phase: Phase) -> Result<Bytes, StoreError> {
        self.inner.get(&phase_key(run_id, phase)).await
    }

    pub async fn get_opt(&self, run_id: &str, phase: Phase) -> Result<Option<Bytes>, StoreError> {
        self.inner.get_opt(&phase_key(run_id, phase)).await
    }

    pub async fn has(&self, run_id: &str, phase: Phase) -> Result<bool, StoreError> {
        self.inner.exists(&phase_key(run_id, phase)).await
    }

    pub async fn get_text(&self, run_id: &str, phase: Phase) -> Result<String, StoreError> {
        let key = phase_key(run_id, phase);
        let data = self.inner.get(&key).await?;
        String::from_utf8(data.to_vec()).map_err(|e| StoreError::Decode {
            key,
            message: e.to_string(),
        })
    }

    pub async fn put_json<T: Serialize>(
        &self,
        run_id: &str,
        phase: Phase,
        value: &T,
    ) -> Result<(), StoreError> {
        let data = encode(&phase_key(run_id, phase), value)?;
        self.put(run_id, phase, data).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        run_id: &str,
        phase: Phase,
    ) -> Result<T, StoreError> {
        self.read_json(&phase_key(run_id, phase)).await
    }

    pub async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let key = run_key(&run.id);
        let data = encode(&key, run)?;
        self.inner.put(&key, data).await
    }

    pub async fn load_run(&self, run_id: &str) -> Result<Run, StoreError> {
        self.read_json(&run_key(run_id)).await
    }

    /// Every persisted run, oldest first.
    pub async fn list_runs(&self) -> Result<Vec<Run>, StoreError> {
        let mut runs = Vec::new();
        for key in self.inner.list(RUNS_PREFIX).await? {
            if key.ends_with("/run.json") {
                runs.push(self.read_json::<Run>(&key).await?);
            }
        }
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }

    pub async fn put_report<T: Serialize>(&self, run_id: &str, report: &T) -> Result<(), StoreError> {
        let key = report_key(run_id);
        let data = encode(&key, report)?;
        self.inner.put(&key, data).await
    }

    pub async fn get_report<T: DeserializeOwned>(&self, run_id: &str) -> Result<T, StoreError> {
        self.read_json(&report_key(run_id)).await
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let data = self.inner.get(key).await?;
        serde_json::from_slice(&data).map_err(|e| StoreError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Bytes, StoreError> {
    serde_json::to_vec_pretty(value)
        .map(Bytes::from)
        .map_err(|e| StoreError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
}
