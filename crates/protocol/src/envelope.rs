use serde::{Deserialize, Serialize};

use crate::constants::MessageType;

/// Error details carried by a completion or close frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubFault {
    pub message: String,
}

/// Envelope for all hub communication.
///
/// The `payload` field uses `serde_json::value::RawValue` so the envelope
/// can be routed by `id`/`type` before the payload is decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HubFault>,
}

impl Message {
    /// Creates a new message with the given type and payload.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match payload {
            Some(p) => {
                let json = serde_json::to_string(p)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            id: id.into(),
            msg_type,
            target: None,
            payload: raw,
            error: None,
        })
    }

    /// Creates an invocation of hub method `target`.
    pub fn invocation<T: Serialize>(
        id: impl Into<String>,
        target: impl Into<String>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let mut msg = Message::new(id, MessageType::Invocation, payload)?;
        msg.target = Some(target.into());
        Ok(msg)
    }

    /// Creates a completion answering the invocation with `id`.
    pub fn completion<T: Serialize>(
        id: impl Into<String>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Message::new(id, MessageType::Completion, payload)
    }

    /// Creates a failed completion.
    pub fn fault(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msg_type: MessageType::Completion,
            target: None,
            payload: None,
            error: Some(HubFault {
                message: message.into(),
            }),
        }
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Returns the payload as a generic JSON value (`Null` when absent).
    pub fn payload_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        Ok(self
            .parse_payload::<serde_json::Value>()?
            .unwrap_or(serde_json::Value::Null))
    }
}
