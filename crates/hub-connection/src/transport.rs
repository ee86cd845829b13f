//! The seam between the connection manager and the wire.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::TransportEvent;
use crate::ws_client::HubError;

/// Boxed future returned by [`Transport`] methods.
pub type HubFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A restartable link to the hub.
///
/// After a successful [`start`](Transport::start) the transport reports
/// lifecycle notifications on the supplied channel until the link is
/// stopped locally. A local [`stop`](Transport::stop) produces no event.
pub trait Transport: Send + Sync {
    /// Opens the link and completes the handshake, returning the
    /// connection id assigned by the hub.
    fn start(&self, events: mpsc::Sender<TransportEvent>) -> HubFuture<'_, Result<String, HubError>>;

    /// Calls a hub method and waits for its completion.
    fn invoke<'a>(&'a self, method: &'a str, payload: Value) -> HubFuture<'a, Result<Value, HubError>>;

    /// Closes the link for good.
    fn stop(&self) -> HubFuture<'_, ()>;
}
