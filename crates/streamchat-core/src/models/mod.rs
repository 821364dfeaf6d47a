pub mod conversation_store;
pub mod thread;
pub mod turn;

pub use conversation_store::{ConversationStore, RecencyBucket, RecencyGroups};
pub use thread::Thread;
pub use turn::{AssistantTurn, Role, Turn, rounded_seconds};
