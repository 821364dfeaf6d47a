pub mod durable_storage;
pub mod error;
pub mod in_memory_storage;
pub mod json_file_storage;
pub mod thread_repository;

pub use durable_storage::{BoxFuture, DurableStorage};
pub use error::{RepositoryError, RepositoryResult};
pub use in_memory_storage::InMemoryStorage;
pub use json_file_storage::JsonFileStorage;
pub use thread_repository::{SYSTEM_PROMPT_KEY, THREADS_KEY, ThreadRepository};
