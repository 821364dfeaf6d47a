use std::path::{Path, PathBuf};

use tracing::debug;

use super::client_settings::ClientSettings;
use super::settings_repository::SettingsRepository;
use crate::repositories::{BoxFuture, RepositoryError, RepositoryResult};

pub struct SettingsJsonRepository {
    file_path: PathBuf,
}

impl SettingsJsonRepository {
    /// Repository at `<config_dir>/streamchat/settings.json`
    pub fn new() -> RepositoryResult<Self> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepositoryError::InitializationError {
            message: "Cannot determine config directory".to_string(),
        })?;

        Ok(Self {
            file_path: config_dir.join("streamchat").join("settings.json"),
        })
    }

    pub fn with_path(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl SettingsRepository for SettingsJsonRepository {
    fn load(&self) -> BoxFuture<'static, RepositoryResult<ClientSettings>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            let contents =
                tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
                    Ok(contents) => Ok(Some(contents)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        debug!(path = %path.display(), "No settings file, using defaults");
                        Ok(None)
                    }
                    Err(e) => Err(RepositoryError::from(e)),
                })
                .await??;

            match contents {
                Some(contents) => Ok(serde_json::from_str(&contents)?),
                None => Ok(ClientSettings::default()),
            }
        })
    }

    fn save(&self, settings: ClientSettings) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            let json = serde_json::to_string_pretty(&settings)?;

            tokio::task::spawn_blocking(move || {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }

                // Write atomically using temp file + rename
                let temp_path = path.with_extension("json.tmp");
                std::fs::write(&temp_path, &json)?;
                std::fs::rename(&temp_path, &path)?;

                Ok::<(), RepositoryError>(())
            })
            .await?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ReducerMode;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SettingsJsonRepository::with_path(dir.path().join("settings.json"));

        assert_eq!(repo.load().await.unwrap(), ClientSettings::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let repo =
            SettingsJsonRepository::with_path(dir.path().join("nested").join("settings.json"));

        let settings = ClientSettings {
            endpoint: "http://localhost:8080/stream".to_string(),
            reducer_mode: ReducerMode::SinglePhase,
            idle_timeout_secs: Some(30),
            ..ClientSettings::default()
        };
        repo.save(settings.clone()).await.unwrap();

        assert_eq!(repo.load().await.unwrap(), settings);
        assert!(!repo.file_path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{\"reducer_mode\": \"triple_phase\"}").unwrap();

        let err = SettingsJsonRepository::with_path(path).load().await.unwrap_err();
        assert!(matches!(err, RepositoryError::SerializationError(_)));
    }
}
