use std::future::Future;
use std::pin::Pin;

use super::error::RepositoryResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Flat key/value storage that survives restarts.
///
/// Values are opaque strings; callers own their encoding. Every `set`
/// replaces the whole value for its key.
pub trait DurableStorage: Send + Sync + 'static {
    /// Read the value stored under `key`, `None` if it was never written
    fn get(&self, key: &str) -> BoxFuture<'static, RepositoryResult<Option<String>>>;

    /// Replace the value stored under `key`
    fn set(&self, key: &str, value: String) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> BoxFuture<'static, RepositoryResult<()>>;
}
