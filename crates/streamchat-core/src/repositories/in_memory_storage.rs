use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::durable_storage::{BoxFuture, DurableStorage};
use super::error::RepositoryResult;

/// In-memory storage.
/// Backs `--ephemeral` sessions and tests; clones share the same map.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStorage for InMemoryStorage {
    fn get(&self, key: &str) -> BoxFuture<'static, RepositoryResult<Option<String>>> {
        let value = self.values.lock().get(key).cloned();
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'static, RepositoryResult<()>> {
        self.values.lock().insert(key.to_string(), value);
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, key: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        self.values.lock().remove(key);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_values() {
        let storage = InMemoryStorage::new();
        let other = storage.clone();

        storage.set("k", "v".to_string()).await.unwrap();
        assert_eq!(other.get("k").await.unwrap().as_deref(), Some("v"));

        other.remove("k").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), None);
    }
}
