use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Wire keys of the required registration fields.
pub const REQUIRED_KEYS: [&str; 5] = ["hubUri", "name", "type", "listenerUri", "botId"];

/// Extension key carrying the machine hostname.
pub const KEY_HOSTNAME: &str = "hostname";

/// Extension key carrying the operating system description.
pub const KEY_OS_VERSION: &str = "osVersion";

/// Errors building a [`RegistrationPayload`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    #[error("required field `{0}` is empty")]
    MissingField(&'static str),

    #[error("extension key must not be empty")]
    EmptyKey,

    #[error("`{0}` is a reserved registration key")]
    ReservedKey(String),
}

/// Record sent to the hub with `RegisterBot`.
///
/// The five required fields are validated once at construction. Additional
/// fields live in an extension map whose keys are unique without regard
/// to ASCII case, and never shadow a required field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireRegistration")]
pub struct RegistrationPayload {
    hub_uri: String,
    name: String,
    #[serde(rename = "type")]
    bot_type: String,
    listener_uri: String,
    bot_id: String,
    #[serde(flatten)]
    extra: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRegistration {
    hub_uri: String,
    name: String,
    #[serde(rename = "type")]
    bot_type: String,
    listener_uri: String,
    bot_id: String,
    #[serde(flatten)]
    extra: BTreeMap<String, String>,
}

impl TryFrom<WireRegistration> for RegistrationPayload {
    type Error = PayloadError;

    fn try_from(wire: WireRegistration) -> Result<Self, Self::Error> {
        let mut payload = RegistrationPayload::new(
            wire.hub_uri,
            wire.name,
            wire.bot_type,
            wire.listener_uri,
            wire.bot_id,
        )?;
        for (key, value) in wire.extra {
            payload.insert(key, value)?;
        }
        Ok(payload)
    }
}

impl RegistrationPayload {
    /// Builds a payload, rejecting empty (or whitespace-only) required fields.
    pub fn new(
        hub_uri: impl Into<String>,
        name: impl Into<String>,
        bot_type: impl Into<String>,
        listener_uri: impl Into<String>,
        bot_id: impl Into<String>,
    ) -> Result<Self, PayloadError> {
        let payload = Self {
            hub_uri: hub_uri.into(),
            name: name.into(),
            bot_type: bot_type.into(),
            listener_uri: listener_uri.into(),
            bot_id: bot_id.into(),
            extra: BTreeMap::new(),
        };

        let fields = [
            &payload.hub_uri,
            &payload.name,
            &payload.bot_type,
            &payload.listener_uri,
            &payload.bot_id,
        ];
        for (value, key) in fields.into_iter().zip(REQUIRED_KEYS) {
            if value.trim().is_empty() {
                return Err(PayloadError::MissingField(key));
            }
        }
        Ok(payload)
    }

    pub fn hub_uri(&self) -> &str {
        &self.hub_uri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bot_type(&self) -> &str {
        &self.bot_type
    }

    pub fn listener_uri(&self) -> &str {
        &self.listener_uri
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    /// Extension fields in key order.
    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }

    /// Inserts an extension field.
    ///
    /// An existing extension whose key matches case-insensitively is
    /// replaced (its previous value is returned) and the new spelling of
    /// the key wins.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Option<String>, PayloadError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(PayloadError::EmptyKey);
        }
        if REQUIRED_KEYS.iter().any(|k| k.eq_ignore_ascii_case(&key)) {
            return Err(PayloadError::ReservedKey(key));
        }

        let existing = self
            .extra
            .keys()
            .find(|k| k.eq_ignore_ascii_case(&key))
            .cloned();
        let previous = existing.and_then(|k| self.extra.remove(&k));
        self.extra.insert(key, value.into());
        Ok(previous)
    }

    /// Looks up any field, required or extension, ignoring ASCII case.
    pub fn get(&self, key: &str) -> Option<&str> {
        let required = [
            &self.hub_uri,
            &self.name,
            &self.bot_type,
            &self.listener_uri,
            &self.bot_id,
        ];
        if let Some(pos) = REQUIRED_KEYS.iter().position(|k| k.eq_ignore_ascii_case(key)) {
            return Some(required[pos].as_str());
        }
        self.extra
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Adds machine metadata (hostname and OS description).
    pub fn enrich(&mut self, hostname: &str, os_version: &str) -> Result<(), PayloadError> {
        self.insert(KEY_HOSTNAME, hostname)?;
        self.insert(KEY_OS_VERSION, os_version)?;
        Ok(())
    }
}
