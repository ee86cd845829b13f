//! WebSocket write pump: serialises outbound frames and sends keepalive pings.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use botshadow_protocol::constants::WS_PING_PERIOD;

/// Writes queued frames to the socket, interleaving a ping every
/// [`WS_PING_PERIOD`]. Exits on cancellation, a closed queue, or the
/// first write error.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = tokio::time::interval(WS_PING_PERIOD);
    keepalive.tick().await; // Skip immediate first tick.

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = keepalive.tick() => {
                trace!("sending keepalive ping");
                tungstenite::Message::Ping(Vec::new().into())
            }
            msg = write_rx.recv() => match msg {
                Some(m) => m,
                None => break,
            },
        };

        let closing = matches!(frame, tungstenite::Message::Close(_));
        if let Err(e) = write.send(frame).await {
            error!("hub socket write error: {e}");
            return;
        }
        if closing {
            return;
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;
    use std::time::Duration;

    fn channel_sink(
        tx: mpsc::UnboundedSender<tungstenite::Message>,
    ) -> impl SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin {
        Box::pin(sink::unfold(tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg);
            Ok::<_, tungstenite::Error>(tx)
        }))
    }

    #[tokio::test]
    async fn write_pump_sends_close_on_cancel() {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (_write_tx, write_rx) = mpsc::channel(16);

        let c = cancel.clone();
        let handle = tokio::spawn(write_pump(channel_sink(sink_tx), write_rx, c));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");

        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Close(_))
        ));
    }

    #[tokio::test]
    async fn write_pump_forwards_frames_in_order() {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::channel(16);
        let handle = tokio::spawn(write_pump(
            channel_sink(sink_tx),
            write_rx,
            CancellationToken::new(),
        ));

        write_tx
            .send(tungstenite::Message::Text("first".into()))
            .await
            .unwrap();
        write_tx
            .send(tungstenite::Message::Text("second".into()))
            .await
            .unwrap();
        drop(write_tx);
        handle.await.unwrap();

        let texts: Vec<String> = std::iter::from_fn(|| sink_rx.try_recv().ok())
            .filter_map(|m| match m {
                tungstenite::Message::Text(t) => Some(t.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn write_pump_pings_periodically() {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let (_write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(channel_sink(sink_tx), write_rx, cancel.clone()));

        let first = sink_rx.recv().await;
        assert!(matches!(first, Some(tungstenite::Message::Ping(_))));

        cancel.cancel();
        handle.await.unwrap();
    }
}
