use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for any incoming frame before the connection is considered dead.
///
/// Pings go out every [`WS_PING_PERIOD`], so a healthy hub always answers
/// with a pong well inside this window.
pub const WS_READ_DEADLINE: Duration = Duration::from_secs(30);

/// How often to send keepalive pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum frame size in bytes (1 MiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Timeout for an outbound invocation waiting on its completion.
pub const WS_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the handshake reply after the socket opens.
pub const WS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Hub protocol name announced in the handshake.
pub const HUB_PROTOCOL: &str = "json";

/// Hub protocol version announced in the handshake.
pub const HUB_PROTOCOL_VERSION: u32 = 1;

/// Hub method that announces or refreshes the bot registration.
pub const METHOD_REGISTER_BOT: &str = "RegisterBot";

/// Hub method that relays a status update for the bot.
pub const METHOD_UPDATE_BOT: &str = "UpdateBot";

/// Hub-pushed liveness notice.
pub const EVENT_RECEIVE_HEARTBEAT: &str = "ReceiveHeartbeat";

/// Hub-pushed registration acknowledgment.
pub const EVENT_RECEIVE_REGISTER_BOT: &str = "ReceiveRegisterBot";

/// Envelope kind identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "handshake")]
    Handshake,
    #[serde(rename = "invocation")]
    Invocation,
    #[serde(rename = "completion")]
    Completion,
    #[serde(rename = "close")]
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names() {
        let cases = [
            (MessageType::Handshake, "\"handshake\""),
            (MessageType::Invocation, "\"invocation\""),
            (MessageType::Completion, "\"completion\""),
            (MessageType::Close, "\"close\""),
        ];
        for (ty, wire) in cases {
            assert_eq!(serde_json::to_string(&ty).unwrap(), wire);
            let back: MessageType = serde_json::from_str(wire).unwrap();
            assert_eq!(back, ty);
        }
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        assert!(serde_json::from_str::<MessageType>("\"stream_item\"").is_err());
    }

    #[test]
    fn ping_period_fits_inside_read_deadline() {
        assert!(WS_PING_PERIOD * 2 < WS_READ_DEADLINE);
    }
}
