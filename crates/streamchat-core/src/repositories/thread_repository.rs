use std::sync::Arc;

use tracing::{debug, warn};

use super::durable_storage::DurableStorage;
use super::error::RepositoryResult;
use crate::models::Thread;

/// Storage key holding the JSON array of threads
pub const THREADS_KEY: &str = "threads";
/// Storage key holding the system prompt used to seed new threads
pub const SYSTEM_PROMPT_KEY: &str = "systemPrompt";

/// Reads and writes the thread list and system prompt as whole values
#[derive(Clone)]
pub struct ThreadRepository {
    storage: Arc<dyn DurableStorage>,
}

impl ThreadRepository {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self { storage }
    }

    /// Load every stored thread.
    ///
    /// A stored value that does not parse is treated as an empty list; only
    /// storage I/O failures are reported as errors.
    pub async fn load_threads(&self) -> RepositoryResult<Vec<Thread>> {
        let Some(raw) = self.storage.get(THREADS_KEY).await? else {
            debug!("No stored threads");
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<Thread>>(&raw) {
            Ok(threads) => {
                debug!(count = threads.len(), "Loaded threads");
                Ok(threads)
            }
            Err(e) => {
                warn!(error = %e, "Stored thread list is corrupted, starting empty");
                Ok(Vec::new())
            }
        }
    }

    /// Replace the stored thread list
    pub async fn save_threads(&self, threads: &[Thread]) -> RepositoryResult<()> {
        let json = serde_json::to_string(threads)?;
        self.storage.set(THREADS_KEY, json).await
    }

    pub async fn load_system_prompt(&self) -> RepositoryResult<Option<String>> {
        let raw = self.storage.get(SYSTEM_PROMPT_KEY).await?;

        // Values written by hand may be bare text rather than a JSON string
        Ok(raw.map(|raw| serde_json::from_str::<String>(&raw).unwrap_or(raw)))
    }

    pub async fn save_system_prompt(&self, prompt: &str) -> RepositoryResult<()> {
        let json = serde_json::to_string(prompt)?;
        self.storage.set(SYSTEM_PROMPT_KEY, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssistantTurn, Turn};
    use crate::repositories::{InMemoryStorage, JsonFileStorage};
    use crate::services::ReducerMode;
    use chrono::{TimeZone, Utc};

    fn sample_threads() -> Vec<Thread> {
        let started = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        let mut reply = AssistantTurn::pending(started, ReducerMode::DualPhase);
        reply.content = "Let me think".to_string();
        reply.last_answer = "**4**".to_string();
        reply.answer_started_at = Some(started + chrono::Duration::milliseconds(1_250));
        reply.settle(started + chrono::Duration::milliseconds(3_700));

        vec![
            Thread::new(
                "b".to_string(),
                started + chrono::Duration::days(1),
                vec![Turn::user("second"), Turn::user("again")],
            ),
            Thread::new(
                "a".to_string(),
                started,
                vec![
                    Turn::system("Be terse"),
                    Turn::user("2+2?"),
                    Turn::Assistant(reply),
                ],
            ),
        ]
    }

    #[tokio::test]
    async fn test_threads_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ThreadRepository::new(Arc::new(JsonFileStorage::with_dir(dir.path())));
        let threads = sample_threads();

        repo.save_threads(&threads).await.unwrap();

        // A fresh repository over the same directory sees identical data
        let reopened = ThreadRepository::new(Arc::new(JsonFileStorage::with_dir(dir.path())));
        assert_eq!(reopened.load_threads().await.unwrap(), threads);
    }

    #[tokio::test]
    async fn test_corrupted_threads_load_empty() {
        let storage = InMemoryStorage::new();
        storage
            .set(THREADS_KEY, "{not json".to_string())
            .await
            .unwrap();
        let repo = ThreadRepository::new(Arc::new(storage.clone()));
        assert!(repo.load_threads().await.unwrap().is_empty());

        storage
            .set(THREADS_KEY, r#"{"id":"x"}"#.to_string())
            .await
            .unwrap();
        assert!(repo.load_threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_threads_load_empty() {
        let repo = ThreadRepository::new(Arc::new(InMemoryStorage::new()));
        assert!(repo.load_threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_system_prompt_round_trip() {
        let storage = InMemoryStorage::new();
        let repo = ThreadRepository::new(Arc::new(storage.clone()));

        assert_eq!(repo.load_system_prompt().await.unwrap(), None);

        repo.save_system_prompt("Answer in \"French\"\n").await.unwrap();
        assert_eq!(
            repo.load_system_prompt().await.unwrap().as_deref(),
            Some("Answer in \"French\"\n")
        );

        storage
            .set(SYSTEM_PROMPT_KEY, "plain text".to_string())
            .await
            .unwrap();
        assert_eq!(
            repo.load_system_prompt().await.unwrap().as_deref(),
            Some("plain text")
        );
    }
}
