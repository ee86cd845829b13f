//! Local HTTP status relay for the botshadow agent.
//!
//! Serves `GET …/ping` and `POST …/update` under
//! `{listener path}/monitor/{botId}/`, one request at a time, and hands
//! every decoded update to a [`Forwarder`]. Everything else is a 404.

mod forwarder;
mod handler;
mod server;

pub use forwarder::{ForwardError, ForwardFuture, Forwarder};
pub use handler::HandlerError;
pub use server::{ListenerConfig, StatusListener};

/// Body of every `ping` response.
pub const PONG_MESSAGE: &str = "pong";

/// Body message of a successful `update`.
pub const UPDATED_MESSAGE: &str = "Connected bot successfuly updated.";

/// Errors that stop the listener.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid listener URI: {0}")]
    InvalidUri(String),

    #[error("accept failed: {0}")]
    Accept(std::io::Error),
}
