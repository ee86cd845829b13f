//! Connection manager owning the hub link and its lifecycle.
//!
//! Connects through a [`Transport`] under the retry policy, tracks
//! connection state through a single transition function, and reacts to
//! transport events: a `Closed` link is reconnected and re-registered
//! after a short delay, for as long as the process runs.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use botshadow_protocol::constants::{EVENT_RECEIVE_HEARTBEAT, EVENT_RECEIVE_REGISTER_BOT};

use crate::registration::RegistrationCoordinator;
use crate::retry::{RetryExecutor, RetryOutcome};
use crate::transport::Transport;
use crate::types::{ConnectionState, LifecycleConfig, StateChange, TransportEvent};
use crate::ws_client::HubError;

/// Callback notified on every state transition.
pub type StateObserver = Box<dyn Fn(&StateChange) + Send + Sync>;

/// Data the manager keeps about the logical link.
#[derive(Debug, Clone)]
struct Connection {
    state: ConnectionState,
    connection_id: Option<String>,
    last_error: Option<String>,
}

/// Owns the hub connection and drives its state machine.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: LifecycleConfig,
    retry: RetryExecutor,
    connection: RwLock<Connection>,
    observers: RwLock<Vec<StateObserver>>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: LifecycleConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        let retry = RetryExecutor::logging(config.retry);

        Self {
            transport,
            config,
            retry,
            connection: RwLock::new(Connection {
                state: ConnectionState::Disconnected,
                connection_id: None,
                last_error: None,
            }),
            observers: RwLock::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            cancel,
        }
    }

    /// Registers a state transition observer.
    pub async fn add_observer(&self, observer: StateObserver) {
        self.observers.write().await.push(observer);
    }

    pub async fn state(&self) -> ConnectionState {
        self.connection.read().await.state
    }

    /// Connection id assigned by the hub on the latest (re)connect.
    pub async fn connection_id(&self) -> Option<String> {
        self.connection.read().await.connection_id.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.connection.read().await.last_error.clone()
    }

    /// Capability to call hub methods, handed to downstream components.
    pub fn invoker(&self) -> Invoker {
        Invoker {
            transport: self.transport.clone(),
        }
    }

    /// Establishes the link under the retry policy.
    ///
    /// Returns `true` once connected. Exhaustion leaves the manager
    /// `Disconnected` without failing the caller.
    pub async fn connect(&self) -> bool {
        match self.state().await {
            ConnectionState::Closed => return false,
            ConnectionState::Disconnected => {
                self.transition(ConnectionState::Connecting, None).await;
            }
            _ => {}
        }

        let outcome = self
            .retry
            .run("connect", &self.cancel, || {
                self.transport.start(self.events_tx.clone())
            })
            .await;

        match outcome {
            RetryOutcome::Success {
                value: connection_id,
                ..
            } => {
                if self.state().await == ConnectionState::Closed {
                    // Stopped while connecting.
                    self.transport.stop().await;
                    return false;
                }
                {
                    let mut conn = self.connection.write().await;
                    conn.connection_id = Some(connection_id.clone());
                    conn.last_error = None;
                }
                info!(%connection_id, "connected to hub");
                self.transition(ConnectionState::Connected, None).await;
                true
            }
            RetryOutcome::Exhausted {
                last_error,
                cancelled,
                ..
            } => {
                let cause = last_error.map(|e| e.to_string());
                self.connection.write().await.last_error = cause.clone();
                if !cancelled {
                    warn!(error = ?cause, "could not connect to hub, giving up until next loss");
                }
                self.transition(ConnectionState::Disconnected, cause).await;
                false
            }
        }
    }

    /// Connects, registers, then consumes transport events until
    /// cancellation.
    ///
    /// Registration runs beside the event loop, so a loss reported while
    /// it is still retrying is handled at once: the stale registration is
    /// abandoned and the reconnect path takes over. Runs at most once per
    /// manager; a second call returns immediately.
    pub async fn run_lifecycle(&self, registrar: Arc<RegistrationCoordinator>) {
        let Some(mut events) = self.events_rx.lock().await.take() else {
            warn!("connection lifecycle already running");
            return;
        };

        if !self.connect().await && !self.cancel.is_cancelled() {
            info!("hub not reachable yet, registration will still be attempted");
        }
        let mut registration = None;
        if self.state().await != ConnectionState::Closed {
            registration = Some(PendingRegistration::spawn(&registrar, &self.cancel));
        }

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if self.state().await == ConnectionState::Closed {
                debug!(?event, "ignoring transport event after stop");
                continue;
            }
            self.handle_event(event, &registrar, &mut registration).await;
        }

        if let Some(pending) = registration.take() {
            pending.abandon().await;
        }
        debug!("connection lifecycle stopped");
    }

    async fn handle_event(
        &self,
        event: TransportEvent,
        registrar: &Arc<RegistrationCoordinator>,
        registration: &mut Option<PendingRegistration>,
    ) {
        match event {
            TransportEvent::Closed { cause } => {
                warn!(cause = ?cause, "hub connection closed");
                if let Some(pending) = registration.take() {
                    pending.abandon().await;
                }
                self.connection.write().await.last_error = cause.clone();
                self.transition(ConnectionState::Reconnecting, cause).await;

                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                }

                if self.connect().await {
                    *registration = Some(PendingRegistration::spawn(registrar, &self.cancel));
                }
            }
            TransportEvent::Reconnecting { attempt, cause } => {
                info!(attempt, cause = ?cause, "transport resuming hub link");
            }
            TransportEvent::Reconnected { connection_id } => {
                info!(%connection_id, "transport resumed hub link");
                self.connection.write().await.connection_id = Some(connection_id);
                if self.config.reregister_on_resume {
                    if let Some(pending) = registration.take() {
                        pending.abandon().await;
                    }
                    *registration = Some(PendingRegistration::spawn(registrar, &self.cancel));
                }
            }
            TransportEvent::Received { target, payload } => {
                let text = match &payload {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                match target.as_str() {
                    EVENT_RECEIVE_HEARTBEAT => info!(message = %text, "heartbeat from hub"),
                    EVENT_RECEIVE_REGISTER_BOT => {
                        info!(message = %text, "registration acknowledged by hub")
                    }
                    _ => debug!(%target, "unhandled hub invocation"),
                }
            }
        }
    }

    /// Stops the link for good. Later transport events are ignored.
    pub async fn stop(&self) {
        self.transition(ConnectionState::Closed, None).await;
        self.transport.stop().await;
        info!("connection manager stopped");
    }

    /// Moves to `next` and notifies observers. `Closed` is terminal.
    async fn transition(&self, next: ConnectionState, cause: Option<String>) {
        let from = {
            let mut conn = self.connection.write().await;
            let from = conn.state;
            if from == next || from == ConnectionState::Closed {
                return;
            }
            conn.state = next;
            from
        };

        info!(%from, to = %next, cause = ?cause, "connection state changed");
        let change = StateChange {
            from,
            to: next,
            cause,
        };
        for observer in self.observers.read().await.iter() {
            observer(&change);
        }
    }
}

/// A registration running beside the lifecycle loop, bound to one link.
struct PendingRegistration {
    cancel: CancellationToken,
    task: JoinHandle<bool>,
}

impl PendingRegistration {
    fn spawn(registrar: &Arc<RegistrationCoordinator>, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let registrar = Arc::clone(registrar);
        let token = cancel.clone();
        let task = tokio::spawn(async move { registrar.register_until(&token).await });
        Self { cancel, task }
    }

    /// Stops the registration if it is still retrying and waits for it.
    async fn abandon(self) {
        if self.task.is_finished() {
            return;
        }
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("registration task failed: {e}");
        }
        debug!("in-flight registration abandoned");
    }
}

/// Write capability over the hub link: invoke a named method.
#[derive(Clone)]
pub struct Invoker {
    transport: Arc<dyn Transport>,
}

impl Invoker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Calls hub method `method`, giving up with [`HubError::Cancelled`]
    /// when `cancel` fires first.
    pub async fn invoke(
        &self,
        method: &str,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, HubError> {
        if cancel.is_cancelled() {
            return Err(HubError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HubError::Cancelled),
            result = self.transport.invoke(method, payload) => result,
        }
    }
}
