pub mod session_controller;

pub use session_controller::{
    SendOutcome, SessionController, SessionError, SessionOptions, StreamEvent, StreamStatus,
};
