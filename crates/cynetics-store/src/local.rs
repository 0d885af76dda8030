use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{ObjectStore, StoreConfig, StoreError};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Filesystem-backed store. Every object is one file under `base_dir`.
pub struct LocalStore {
    base_dir: PathBuf,
}

impl LocalStore {
    pub fn new(config: &StoreConfig) -> Self {
        let base_dir = config.data_dir.clone().unwrap_or_else(default_data_dir);
        Self { base_dir }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

fn default_data_dir() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local/share")
    } else {
        PathBuf::from(".")
    };
    base.join("cynetics")
}

/// Sibling temp path so the final rename stays on one filesystem.
fn temp_path(path: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.{n}.tmp", std::process::id()))
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Internal(format!("mkdir: {e}")))?;
        }
        let tmp = temp_path(&path);
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| StoreError::Internal(format!("write {}: {e}", tmp.display())))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Internal(format!(
                "rename into {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.resolve(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(StoreError::Internal(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let base = self.base_dir.clone();
        let root = self.resolve(prefix);
        tokio::task::spawn_blocking(move || collect_keys(&base, &root))
            .await
            .map_err(|e| StoreError::Internal(format!("list task: {e}")))?
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.resolve(key);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::Internal(format!("exists {}: {e}", path.display())))
    }
}

/// Every finished object file below `root`, as sorted keys relative to `base`.
fn collect_keys(base: &Path, root: &Path) -> Result<Vec<String>, StoreError> {
    let mut keys = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(StoreError::Internal(format!("list {}: {e}", dir.display()))),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let is_temp = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(".tmp"));
            if is_temp {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(base) {
                let key: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                keys.push(key.join("/"));
            }
        }
    }
    keys.sort();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(dir: &Path) -> LocalStore {
        LocalStore::new(&StoreConfig {
            data_dir: Some(dir.to_path_buf()),
            in_memory: false,
        })
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path());

        store
            .put("runs/abc/specify.json", Bytes::from("hello world"))
            .await
            .unwrap();
        let data = store.get("runs/abc/specify.json").await.unwrap();
        assert_eq!(data.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn get_missing_returns_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path());

        let err = store.get("nonexistent/key").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.get_opt("nonexistent/key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path());

        store.put("key", Bytes::from("first")).await.unwrap();
        store.put("key", Bytes::from("second")).await.unwrap();

        let data = store.get("key").await.unwrap();
        assert_eq!(data.as_ref(), b"second");
    }

    #[tokio::test]
    async fn put_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path());

        store.put("runs/r/run.json", Bytes::from("{}")).await.unwrap();
        let names: Vec<String> = std::fs::read_dir(tmp.path().join("runs/r"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["run.json".to_string()]);
    }

    #[tokio::test]
    async fn data_survives_a_new_store_instance() {
        let tmp = tempfile::tempdir().unwrap();
        test_store(tmp.path())
            .put("runs/r/tasks.json", Bytes::from("[]"))
            .await
            .unwrap();

        let reopened = test_store(tmp.path());
        assert_eq!(
            reopened.get("runs/r/tasks.json").await.unwrap().as_ref(),
            b"[]"
        );
    }

    #[tokio::test]
    async fn list_returns_keys_with_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path());

        store.put("runs/a/run.json", Bytes::from("a")).await.unwrap();
        store.put("runs/a/plan.json", Bytes::from("a")).await.unwrap();
        store.put("runs/b/run.json", Bytes::from("b")).await.unwrap();
        store.put("other/file.txt", Bytes::from("o")).await.unwrap();

        assert_eq!(
            store.list("runs/a").await.unwrap(),
            vec!["runs/a/plan.json", "runs/a/run.json"]
        );
        assert_eq!(store.list("runs").await.unwrap().len(), 3);
        assert!(store.list("missing").await.unwrap().is_empty());
        assert!(store.exists("other/file.txt").await.unwrap());
    }
}
