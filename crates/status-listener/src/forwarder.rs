//! The listener's only link to the hub.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// A boxed future returned by [`Forwarder::forward`].
pub type ForwardFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ForwardError>> + Send + 'a>>;

/// Relays one decoded status update.
pub trait Forwarder: Send + Sync + 'static {
    fn forward(&self, update: Map<String, Value>, cancel: CancellationToken) -> ForwardFuture<'_>;
}

/// Failure reported by a [`Forwarder`], surfaced to the HTTP caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ForwardError {
    /// Stable error kind, e.g. `HubException` or `Timeout`.
    pub kind: String,
    pub message: String,
}

impl ForwardError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
