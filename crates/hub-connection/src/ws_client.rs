//! WebSocket client for agent-to-hub communication.
//!
//! Implements invocation/completion correlation by UUID, keepalive pings,
//! and dispatch of hub-pushed notifications.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;

use botshadow_protocol::constants::{
    MessageType, WS_HANDSHAKE_TIMEOUT, WS_INVOKE_TIMEOUT, WS_MAX_MESSAGE_SIZE,
};
use botshadow_protocol::envelope::Message;
use botshadow_protocol::messages::{HandshakeReply, HandshakeRequest};

/// Errors from the hub connection.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("not connected to hub")]
    NotConnected,

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("hub method failed: {0}")]
    Hub(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid hub URI: {0}")]
    InvalidUri(String),
}

impl HubError {
    /// Stable name of the error kind, reported to HTTP callers.
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::Ws(_) => "TransportError",
            HubError::Json(_) => "SerializationError",
            HubError::Timeout => "Timeout",
            HubError::Closed => "ConnectionClosed",
            HubError::NotConnected => "NotConnected",
            HubError::Handshake(_) => "HandshakeRejected",
            HubError::Hub(_) => "HubException",
            HubError::Cancelled => "Cancelled",
            HubError::InvalidUri(_) => "InvalidUri",
        }
    }
}

/// Why the socket went away, reported once by the read pump.
#[derive(Debug, Clone, PartialEq)]
pub struct Disconnect {
    pub cause: String,
    /// The hub sent a `close` envelope: it does not want us back.
    pub by_hub: bool,
}

/// Callback type for hub-pushed invocations: `(target, message)`.
pub type EventCallback = Box<dyn Fn(String, Message) + Send + Sync>;

/// Callback type for disconnect notification.
pub type DisconnectFn = Box<dyn Fn(Disconnect) + Send + Sync>;

pub(crate) type DisconnectCallback = Arc<Mutex<Option<DisconnectFn>>>;

/// Callbacks installed before the pumps start, so no inbound frame or
/// socket loss can slip past them.
#[derive(Default)]
pub struct ClientCallbacks {
    pub on_event: Option<EventCallback>,
    pub on_disconnect: Option<DisconnectFn>,
}

pub(crate) type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;

/// WebSocket client holding one live socket to the hub.
///
/// Returned from [`HubClient::connect`] only after the handshake succeeded.
pub struct HubClient {
    connection_id: String,
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: PendingMap,
    on_event: Arc<Mutex<Option<EventCallback>>>,
    on_disconnect: DisconnectCallback,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    cancel: tokio_util::sync::CancellationToken,
}

impl HubClient {
    /// Opens the socket and performs the handshake.
    pub async fn connect(url: &str) -> Result<Self, HubError> {
        Self::connect_with(url, ClientCallbacks::default()).await
    }

    /// Like [`connect`](Self::connect), with callbacks wired in before the
    /// read pump starts.
    pub async fn connect_with(url: &str, callbacks: ClientCallbacks) -> Result<Self, HubError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let on_event: Arc<Mutex<Option<EventCallback>>> =
            Arc::new(Mutex::new(callbacks.on_event));
        let on_disconnect: DisconnectCallback = Arc::new(Mutex::new(callbacks.on_disconnect));
        let cancel = tokio_util::sync::CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let pending = pending.clone();
            let on_event = on_event.clone();
            let on_disconnect = on_disconnect.clone();
            let cancel = cancel.clone();
            let write_tx = write_tx.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read,
                pending,
                on_event,
                on_disconnect,
                write_tx,
                cancel,
            ))
        };

        let mut client = Self {
            connection_id: String::new(),
            write_tx,
            pending,
            on_event,
            on_disconnect,
            _read_handle: read_handle,
            _write_handle: write_handle,
            cancel,
        };

        let reply = client.handshake().await?;
        client.connection_id = reply.connection_id;
        Ok(client)
    }

    /// Connection identifier assigned by the hub during the handshake.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn handshake(&self) -> Result<HandshakeReply, HubError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, MessageType::Handshake, Some(&HandshakeRequest::default()))?;
        let resp = self.request(msg, WS_HANDSHAKE_TIMEOUT).await?;

        if let Some(err) = &resp.error {
            return Err(HubError::Handshake(err.message.clone()));
        }
        resp.parse_payload::<HandshakeReply>()?
            .ok_or_else(|| HubError::Handshake("empty handshake reply".into()))
    }

    /// Invokes hub method `method` and waits for its completion.
    pub async fn invoke(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, HubError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::invocation(&id, method, Some(payload))?;
        let resp = self.request(msg, WS_INVOKE_TIMEOUT).await?;

        if let Some(err) = &resp.error {
            return Err(HubError::Hub(err.message.clone()));
        }
        Ok(resp.payload_value()?)
    }

    /// Sends a frame and waits for the reply carrying the same `id`.
    async fn request(&self, msg: Message, timeout: Duration) -> Result<Message, HubError> {
        let id = msg.id.clone();
        let json = serde_json::to_string(&msg)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if self
            .write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(HubError::Closed);
        }

        let result = tokio::time::timeout(timeout, rx).await;

        // Clean up pending entry on any exit path.
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(HubError::Closed),
            Err(_) => Err(HubError::Timeout),
        }
    }

    /// Sets the callback for hub-pushed invocations.
    pub async fn set_event_callback(&self, cb: EventCallback) {
        *self.on_event.lock().await = Some(cb);
    }

    /// Sets the callback for disconnection.
    pub async fn set_disconnect_callback(&self, cb: DisconnectFn) {
        *self.on_disconnect.lock().await = Some(cb);
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        let _ = self.write_tx.send(tungstenite::Message::Close(None)).await;
        self.cancel.cancel();
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
    }
}
