use serde::{Deserialize, Serialize};

use crate::constants::{HUB_PROTOCOL, HUB_PROTOCOL_VERSION};

/// First frame sent after the socket opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: HUB_PROTOCOL.into(),
            version: HUB_PROTOCOL_VERSION,
        }
    }
}

/// Hub answer to a successful handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeReply {
    pub connection_id: String,
}
