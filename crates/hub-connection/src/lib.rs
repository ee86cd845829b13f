//! Hub connection for the botshadow agent.
//!
//! Provides the WebSocket hub client with its own short resume, a bounded
//! retry executor, the connection state machine and bot registration.

pub mod manager;
pub(crate) mod pumps;
pub mod reconnection;
pub mod registration;
pub mod retry;
pub mod transport;
pub mod types;
pub mod ws_client;

#[cfg(test)]
pub(crate) mod fake;

pub use manager::{ConnectionManager, Invoker, StateObserver};
pub use reconnection::WsTransport;
pub use registration::RegistrationCoordinator;
pub use retry::{LogObserver, RetryExecutor, RetryObserver, RetryOutcome};
pub use transport::{HubFuture, Transport};
pub use types::{
    ConnectionState, LifecycleConfig, ReconnectConfig, RetryPolicy, StateChange, TransportEvent,
};
pub use ws_client::{HubClient, HubError};
