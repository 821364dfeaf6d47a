use std::path::{Path, PathBuf};

use super::durable_storage::{BoxFuture, DurableStorage};
use super::error::{RepositoryError, RepositoryResult};

/// File-backed storage: each key lives in `<dir>/<key>.json`.
/// Default location is ~/.config/streamchat/storage/
pub struct JsonFileStorage {
    storage_dir: PathBuf,
}

impl JsonFileStorage {
    pub fn new() -> RepositoryResult<Self> {
        let storage_dir = dirs::config_dir()
            .ok_or_else(|| RepositoryError::InitializationError {
                message: "Could not determine config directory".to_string(),
            })?
            .join("streamchat")
            .join("storage");

        Ok(Self { storage_dir })
    }

    pub fn with_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.json", key))
    }
}

impl DurableStorage for JsonFileStorage {
    fn get(&self, key: &str) -> BoxFuture<'static, RepositoryResult<Option<String>>> {
        let path = self.key_path(key);

        Box::pin(async move {
            tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
                Ok(content) => Ok(Some(content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(RepositoryError::from(e)),
            })
            .await?
        })
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.key_path(key);
        let storage_dir = self.storage_dir.clone();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                std::fs::create_dir_all(&storage_dir)?;

                // Write to file atomically (write to temp, then rename)
                let temp_path = path.with_extension("json.tmp");
                std::fs::write(&temp_path, value)?;
                std::fs::rename(&temp_path, &path)?;

                Ok::<(), RepositoryError>(())
            })
            .await?
        })
    }

    fn remove(&self, key: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.key_path(key);

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
                Ok::<(), RepositoryError>(())
            })
            .await?
        })
    }
}
