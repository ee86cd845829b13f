//! WebSocket read pump: routes completions and hub-pushed invocations.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use botshadow_protocol::constants::{MessageType, WS_MAX_MESSAGE_SIZE, WS_READ_DEADLINE};
use botshadow_protocol::envelope::Message;

use crate::ws_client::{Disconnect, DisconnectCallback, EventCallback, PendingMap};

/// What a single text frame means for the read loop.
enum Dispatch {
    Continue,
    HubClosed(String),
}

/// Reads frames from the socket and dispatches them.
///
/// Any incoming frame resets the [`WS_READ_DEADLINE`]; if nothing arrives
/// within it the connection is considered dead. The disconnect callback
/// fires exactly once when the loop exits, whatever the reason.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: PendingMap,
    on_event: Arc<Mutex<Option<EventCallback>>>,
    on_disconnect: DisconnectCallback,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_READ_DEADLINE);
    tokio::pin!(deadline);

    let disconnect = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Disconnect {
                cause: "closed locally".into(),
                by_hub: false,
            },

            () = &mut deadline => {
                warn!("hub read deadline expired, connection dead");
                break Disconnect { cause: "read deadline expired".into(), by_hub: false };
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("hub socket read error: {e}");
                        break Disconnect { cause: format!("read error: {e}"), by_hub: false };
                    }
                    None => {
                        debug!("hub socket stream ended");
                        break Disconnect { cause: "stream ended".into(), by_hub: false };
                    }
                };

                deadline.as_mut().reset(tokio::time::Instant::now() + WS_READ_DEADLINE);

                match msg {
                    tungstenite::Message::Text(text) => {
                        if let Dispatch::HubClosed(reason) =
                            handle_text_message(&text, &pending, &on_event).await
                        {
                            break Disconnect { cause: reason, by_hub: true };
                        }
                    }
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Pong(_) => trace!("received pong"),
                    tungstenite::Message::Close(frame) => {
                        let cause = frame
                            .map(|f| format!("close frame {}: {}", u16::from(f.code), f.reason.as_str()))
                            .unwrap_or_else(|| "close frame".into());
                        debug!(%cause, "hub sent close frame");
                        break Disconnect { cause, by_hub: false };
                    }
                    _ => {} // Binary: not part of the protocol.
                }
            }
        }
    };

    // Fail outstanding requests immediately instead of waiting for timeouts.
    pending.lock().await.clear();

    if let Some(cb) = on_disconnect.lock().await.as_ref() {
        cb(disconnect);
    }
}

/// Handles one text frame.
async fn handle_text_message(
    text: &str,
    pending: &PendingMap,
    on_event: &Arc<Mutex<Option<EventCallback>>>,
) -> Dispatch {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return Dispatch::Continue;
    }

    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse hub message: {e}");
            return Dispatch::Continue;
        }
    };

    trace!(msg_type = ?msg.msg_type, id = %msg.id, "received message");

    if msg.msg_type == MessageType::Close {
        let reason = msg
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| "hub closed the connection".into());
        return Dispatch::HubClosed(reason);
    }

    // Route replies to the pending request.
    if let Some(tx) = pending.lock().await.remove(&msg.id) {
        let _ = tx.send(msg);
        return Dispatch::Continue;
    }

    match (msg.msg_type, msg.target.clone()) {
        (MessageType::Invocation, Some(target)) => {
            let guard = on_event.lock().await;
            if let Some(cb) = guard.as_ref() {
                cb(target, msg);
            } else {
                warn!(%target, id = %msg.id, "no event callback set, dropping hub invocation");
            }
        }
        (msg_type, _) => {
            debug!(?msg_type, id = %msg.id, "unsolicited hub message ignored");
        }
    }
    Dispatch::Continue
}
