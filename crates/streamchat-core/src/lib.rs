//! Core of the streamchat client: conversation model, response stream
//! reduction, HTTP transport, local persistence and the session controller.

pub mod controllers;
pub mod models;
pub mod repositories;
pub mod services;
pub mod settings;

pub use controllers::{
    SendOutcome, SessionController, SessionError, SessionOptions, StreamEvent, StreamStatus,
};
pub use models::{AssistantTurn, ConversationStore, Role, Thread, Turn};
