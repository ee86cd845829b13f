//! WebSocket transport with its own short resume loop.
//!
//! When an established socket drops, [`WsTransport`] retries it with
//! exponential backoff ([`ReconnectConfig`]) and reports the progress as
//! [`TransportEvent`]s. Only when resume gives up, or the hub explicitly
//! closes the connection, does it report `Closed` and leave recovery to
//! the connection manager.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use botshadow_protocol::envelope::Message;

use crate::transport::{HubFuture, Transport};
use crate::types::{ReconnectConfig, TransportEvent};
use crate::ws_client::{
    ClientCallbacks, Disconnect, DisconnectFn, EventCallback, HubClient, HubError,
};

/// Maps the hub's http(s) URI onto the WebSocket scheme.
pub fn hub_socket_url(hub_uri: &str) -> Result<String, HubError> {
    let mut url =
        url::Url::parse(hub_uri).map_err(|e| HubError::InvalidUri(format!("{hub_uri}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(HubError::InvalidUri(format!(
                "{hub_uri}: unsupported scheme `{other}`"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| HubError::InvalidUri(hub_uri.to_string()))?;
    Ok(url.to_string())
}

/// Shared state handed to socket callbacks and the resume loop.
#[derive(Clone)]
pub(crate) struct WsContext {
    pub(crate) url: String,
    pub(crate) client: Arc<Mutex<Option<Arc<HubClient>>>>,
    pub(crate) events_tx: mpsc::Sender<TransportEvent>,
    pub(crate) resume_cancel: CancellationToken,
    pub(crate) manual_stop: Arc<AtomicBool>,
    pub(crate) config: ReconnectConfig,
}

/// [`Transport`] over a single hub WebSocket.
pub struct WsTransport {
    url: String,
    config: ReconnectConfig,
    client: Arc<Mutex<Option<Arc<HubClient>>>>,
    manual_stop: Arc<AtomicBool>,
    resume_cancel: std::sync::Mutex<CancellationToken>,
}

impl WsTransport {
    /// Creates a transport for `hub_uri` with the default resume policy.
    pub fn new(hub_uri: &str) -> Result<Self, HubError> {
        Self::with_config(hub_uri, ReconnectConfig::default())
    }

    pub fn with_config(hub_uri: &str, config: ReconnectConfig) -> Result<Self, HubError> {
        Ok(Self {
            url: hub_socket_url(hub_uri)?,
            config,
            client: Arc::new(Mutex::new(None)),
            manual_stop: Arc::new(AtomicBool::new(false)),
            resume_cancel: std::sync::Mutex::new(CancellationToken::new()),
        })
    }

    /// WebSocket URL the transport dials.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Cancels a running resume loop and arms a fresh token.
    fn rearm_resume(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        if let Ok(mut guard) = self.resume_cancel.lock() {
            let old = std::mem::replace(&mut *guard, fresh.clone());
            old.cancel();
        }
        fresh
    }

    fn cancel_resume(&self) {
        if let Ok(guard) = self.resume_cancel.lock() {
            guard.cancel();
        }
    }
}

impl Transport for WsTransport {
    fn start(&self, events: mpsc::Sender<TransportEvent>) -> HubFuture<'_, Result<String, HubError>> {
        Box::pin(async move {
            self.manual_stop.store(false, Ordering::SeqCst);
            let ctx = WsContext {
                url: self.url.clone(),
                client: self.client.clone(),
                events_tx: events,
                resume_cancel: self.rearm_resume(),
                manual_stop: self.manual_stop.clone(),
                config: self.config.clone(),
            };

            let connection_id = dial(&ctx).await?;
            info!(url = %self.url, %connection_id, "hub link established");
            Ok(connection_id)
        })
    }

    fn invoke<'a>(&'a self, method: &'a str, payload: Value) -> HubFuture<'a, Result<Value, HubError>> {
        Box::pin(async move {
            // Clone out of the lock so concurrent invocations don't serialize.
            let client = self
                .client
                .lock()
                .await
                .clone()
                .ok_or(HubError::NotConnected)?;
            client.invoke(method, &payload).await
        })
    }

    fn stop(&self) -> HubFuture<'_, ()> {
        Box::pin(async move {
            self.manual_stop.store(true, Ordering::SeqCst);
            self.cancel_resume();
            if let Some(client) = self.client.lock().await.take() {
                client.close().await;
                debug!(url = %self.url, "hub link stopped");
            }
        })
    }
}

const LINK_PENDING: u8 = 0;
const LINK_LIVE: u8 = 1;
const LINK_LOST: u8 = 2;

/// Tracks whether a fresh socket was handed over before it died.
///
/// A loss reported while the link is still pending is parked here and
/// turns the dial into a failure; only a live link starts a resume.
#[derive(Clone, Default)]
struct LinkGuard(Arc<AtomicU8>);

impl LinkGuard {
    /// Returns `true` when the loss belongs to a live link.
    fn report_loss(&self) -> bool {
        match self.0.compare_exchange(
            LINK_PENDING,
            LINK_LOST,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => false,
            Err(state) => state == LINK_LIVE,
        }
    }

    /// Returns `false` if the socket was lost before going live.
    fn go_live(&self) -> bool {
        self.0
            .compare_exchange(LINK_PENDING, LINK_LIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Opens a socket with its callbacks in place and publishes the client.
async fn dial(ctx: &WsContext) -> Result<String, HubError> {
    let guard = LinkGuard::default();
    let client = HubClient::connect_with(&ctx.url, ws_callbacks(ctx.clone(), guard.clone())).await?;
    let connection_id = client.connection_id().to_string();

    let previous = ctx.client.lock().await.replace(Arc::new(client));
    if let Some(old) = previous {
        // Silence the stale socket before closing it.
        old.set_disconnect_callback(Box::new(|_: Disconnect| {})).await;
        old.close().await;
    }

    if !guard.go_live() {
        ctx.client.lock().await.take();
        debug!(%connection_id, "socket lost during handover");
        return Err(HubError::Closed);
    }
    Ok(connection_id)
}

/// Event forwarding and loss handling for a fresh client.
fn ws_callbacks(ctx: WsContext, guard: LinkGuard) -> ClientCallbacks {
    let events_tx = ctx.events_tx.clone();
    let on_event: EventCallback = Box::new(move |target: String, msg: Message| {
        trace!(%target, "forwarding hub invocation");
        let payload = msg.payload_value().unwrap_or(Value::Null);
        if let Err(e) = events_tx.try_send(TransportEvent::Received { target, payload }) {
            warn!("failed to forward hub invocation: {e}");
        }
    });

    let on_disconnect: DisconnectFn = Box::new(move |disconnect: Disconnect| {
        if ctx.manual_stop.load(Ordering::SeqCst) {
            debug!(cause = %disconnect.cause, "socket closed after local stop");
            return;
        }
        if !guard.report_loss() {
            debug!(cause = %disconnect.cause, "socket closed before handover");
            return;
        }
        tokio::spawn(handle_loss(disconnect, ctx.clone()));
    });

    ClientCallbacks {
        on_event: Some(on_event),
        on_disconnect: Some(on_disconnect),
    }
}

/// Decides between giving up and resuming after an unexpected loss.
async fn handle_loss(disconnect: Disconnect, ctx: WsContext) {
    ctx.client.lock().await.take();

    if disconnect.by_hub || ctx.config.max_attempts == 0 {
        info!(cause = %disconnect.cause, by_hub = disconnect.by_hub, "hub link closed");
        let _ = ctx
            .events_tx
            .send(TransportEvent::Closed {
                cause: Some(disconnect.cause),
            })
            .await;
        return;
    }

    warn!(cause = %disconnect.cause, "hub link lost, resuming");
    resume_loop(disconnect.cause, ctx).await;
}

/// Resume loop with exponential backoff.
///
/// Returns a boxed future to break the recursive type cycle with
/// `ws_callbacks`, whose disconnect callback spawns this loop again.
pub(crate) fn resume_loop(
    cause: String,
    ctx: WsContext,
) -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        let mut last_cause = cause;

        for attempt in 1..=ctx.config.max_attempts {
            let delay = ctx.config.delay_for_attempt(attempt);
            let _ = ctx
                .events_tx
                .send(TransportEvent::Reconnecting {
                    attempt,
                    cause: Some(last_cause.clone()),
                })
                .await;
            info!(
                attempt,
                delay_secs = format_args!("{:.2}", delay.as_secs_f64()),
                "resuming hub link"
            );

            tokio::select! {
                _ = ctx.resume_cancel.cancelled() => {
                    debug!("resume cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match dial(&ctx).await {
                Ok(connection_id) => {
                    if ctx.resume_cancel.is_cancelled() {
                        if let Some(client) = ctx.client.lock().await.take() {
                            client.close().await;
                        }
                        return;
                    }
                    info!(attempt, %connection_id, "hub link resumed");
                    let _ = ctx
                        .events_tx
                        .send(TransportEvent::Reconnected { connection_id })
                        .await;
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "resume attempt failed");
                    last_cause = e.to_string();
                }
            }

            if ctx.resume_cancel.is_cancelled() {
                return;
            }
        }

        info!(attempts = ctx.config.max_attempts, "resume gave up");
        let _ = ctx
            .events_tx
            .send(TransportEvent::Closed {
                cause: Some(last_cause),
            })
            .await;
    })
}
