fn main() {
    println!("Run `cargo test -p botshadow-wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use botshadow_protocol::constants::{
        EVENT_RECEIVE_HEARTBEAT, METHOD_REGISTER_BOT, METHOD_UPDATE_BOT,
    };
    use botshadow_protocol::messages::{HandshakeReply, HandshakeRequest};
    use botshadow_protocol::{Message, MessageType, RegistrationPayload};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Parses a fixture into a Rust type, re-serializes it, and compares the
    /// JSON values (key order does not matter).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  hub:  {fixture}\n  Rust: {reserialized}"
        );
        parsed
    }

    // --- Envelope ---

    #[test]
    fn fixture_handshake_request() {
        let msg = roundtrip_test::<Message>("handshake_request.json");
        assert_eq!(msg.msg_type, MessageType::Handshake);
        let req: HandshakeRequest = msg.parse_payload().unwrap().unwrap();
        assert_eq!(req, HandshakeRequest::default());
    }

    #[test]
    fn fixture_handshake_reply() {
        let msg = roundtrip_test::<Message>("handshake_reply.json");
        let reply: HandshakeReply = msg.parse_payload().unwrap().unwrap();
        assert_eq!(reply.connection_id, "Zk3yQ0mE1bWc8sVt");
    }

    #[test]
    fn fixture_register_bot_invocation() {
        let msg = roundtrip_test::<Message>("register_bot_invocation.json");
        assert_eq!(msg.msg_type, MessageType::Invocation);
        assert_eq!(msg.target.as_deref(), Some(METHOD_REGISTER_BOT));

        let payload: RegistrationPayload = msg.parse_payload().unwrap().unwrap();
        assert_eq!(payload.bot_id(), "bot-42");
        assert_eq!(payload.get("osVersion"), Some("linux (x86_64)"));
    }

    #[test]
    fn fixture_update_bot_invocation() {
        let msg = roundtrip_test::<Message>("update_bot_invocation.json");
        assert_eq!(msg.target.as_deref(), Some(METHOD_UPDATE_BOT));
        // Update bodies are relayed untouched, whatever their shape.
        let body = msg.payload_value().unwrap();
        assert_eq!(body["progress"], 65);
        assert_eq!(body["tags"][0], "nightly");
    }

    #[test]
    fn fixture_completion_fault() {
        let msg = roundtrip_test::<Message>("completion_fault.json");
        assert_eq!(msg.msg_type, MessageType::Completion);
        assert!(msg.payload.is_none());
        assert_eq!(msg.error.unwrap().message, "bot not registered");
    }

    #[test]
    fn fixture_heartbeat_event() {
        let msg = roundtrip_test::<Message>("heartbeat_event.json");
        assert_eq!(msg.target.as_deref(), Some(EVENT_RECEIVE_HEARTBEAT));
        assert_eq!(msg.parse_payload::<String>().unwrap().as_deref(), Some("alive"));
    }

    #[test]
    fn fixture_close() {
        let msg = roundtrip_test::<Message>("close.json");
        assert_eq!(msg.msg_type, MessageType::Close);
        assert_eq!(msg.error.unwrap().message, "bot evicted");
    }

    #[test]
    fn built_fault_matches_fixture() {
        let built = serde_json::to_value(Message::fault(
            "0a1b2c3d-4e5f-4a6b-9c8d-7e6f5a4b3c2d",
            "bot not registered",
        ))
        .unwrap();
        assert_eq!(built, load_fixture("completion_fault.json"));
    }

    // --- Registration payload ---

    #[test]
    fn fixture_registration_payload() {
        let payload = roundtrip_test::<RegistrationPayload>("registration_payload.json");
        assert_eq!(payload.hub_uri(), "http://localhost:9944/hub/v4/g4/bots");
        assert_eq!(payload.bot_type(), "ci");
        assert_eq!(payload.extra().len(), 2);
    }

    #[test]
    fn built_registration_matches_fixture() {
        let mut payload = RegistrationPayload::new(
            "http://localhost:9944/hub/v4/g4/bots",
            "Build Bot",
            "ci",
            "http://localhost:8080",
            "bot-42",
        )
        .unwrap();
        payload.enrich("build-07", "linux (x86_64)").unwrap();

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            load_fixture("registration_payload.json")
        );
    }

    #[test]
    fn registration_with_empty_required_field_is_rejected() {
        let mut fixture = load_fixture("registration_payload.json");
        fixture["botId"] = serde_json::json!("  ");
        assert!(serde_json::from_value::<RegistrationPayload>(fixture).is_err());
    }

    #[test]
    fn registration_missing_required_field_is_rejected() {
        let mut fixture = load_fixture("registration_payload.json");
        fixture.as_object_mut().unwrap().remove("listenerUri");
        assert!(serde_json::from_value::<RegistrationPayload>(fixture).is_err());
    }

    #[test]
    fn unknown_envelope_type_is_rejected() {
        let json = r#"{"id":"x","type":"stream_item","payload":1}"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }
}
