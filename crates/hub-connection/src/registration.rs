//! Announces the bot to the hub with `RegisterBot`.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use botshadow_protocol::constants::METHOD_REGISTER_BOT;
use botshadow_protocol::types::RegistrationPayload;

use crate::manager::Invoker;
use crate::retry::RetryExecutor;

/// Sends the registration payload under the retry policy.
///
/// Safe to call repeatedly (initial connect and every reconnect): each
/// call sends the same payload.
pub struct RegistrationCoordinator {
    invoker: Invoker,
    payload: RegistrationPayload,
    retry: RetryExecutor,
    cancel: CancellationToken,
}

impl RegistrationCoordinator {
    pub fn new(
        invoker: Invoker,
        payload: RegistrationPayload,
        retry: RetryExecutor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            invoker,
            payload,
            retry,
            cancel,
        }
    }

    pub fn payload(&self) -> &RegistrationPayload {
        &self.payload
    }

    /// Registers the bot. Returns `true` if the hub accepted it before the
    /// retry window ran out.
    pub async fn register(&self) -> bool {
        self.register_until(&self.cancel).await
    }

    /// Like [`register`](Self::register), but gives up as soon as `cancel`
    /// fires. Used to abandon a registration bound to a lost link.
    pub async fn register_until(&self, cancel: &CancellationToken) -> bool {
        let body = match serde_json::to_value(&self.payload) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to encode registration payload");
                return false;
            }
        };

        info!(bot_id = %self.payload.bot_id(), name = %self.payload.name(), "registering bot");
        let outcome = self
            .retry
            .run(METHOD_REGISTER_BOT, cancel, || {
                self.invoker.invoke(METHOD_REGISTER_BOT, body.clone(), cancel)
            })
            .await;
        outcome.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::fake::ScriptedTransport;
    use crate::types::RetryPolicy;

    fn coordinator(transport: &Arc<ScriptedTransport>, cancel: &CancellationToken) -> RegistrationCoordinator {
        let mut payload = RegistrationPayload::new(
            "http://localhost:9944/hub/v4/g4/bots",
            "Build Bot",
            "ci",
            "http://localhost:8080",
            "bot-42",
        )
        .unwrap();
        payload.enrich("build-01", "linux (x86_64)").unwrap();

        RegistrationCoordinator::new(
            Invoker::new(transport.clone()),
            payload,
            RetryExecutor::logging(RetryPolicy::default()),
            cancel.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn register_sends_full_payload() {
        let transport = Arc::new(ScriptedTransport::default());
        let registrar = coordinator(&transport, &CancellationToken::new());

        assert!(registrar.register().await);

        let sent = transport.invocations(METHOD_REGISTER_BOT);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["hubUri"], "http://localhost:9944/hub/v4/g4/bots");
        assert_eq!(sent[0]["type"], "ci");
        assert_eq!(sent[0]["hostname"], "build-01");
        assert_eq!(sent[0]["osVersion"], "linux (x86_64)");
    }

    #[tokio::test(start_paused = true)]
    async fn register_retries_hub_faults() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.fail_invocations(2);
        let registrar = coordinator(&transport, &CancellationToken::new());
        let started = Instant::now();

        assert!(registrar.register().await);
        assert_eq!(transport.invocations(METHOD_REGISTER_BOT).len(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn register_is_repeatable() {
        let transport = Arc::new(ScriptedTransport::default());
        let registrar = coordinator(&transport, &CancellationToken::new());

        assert!(registrar.register().await);
        assert!(registrar.register().await);

        let sent = transport.invocations(METHOD_REGISTER_BOT);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn register_gives_up_when_cancelled() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.fail_invocations(u32::MAX);
        let cancel = CancellationToken::new();
        let registrar = coordinator(&transport, &cancel);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });

        assert!(!registrar.register().await);
        assert_eq!(transport.invocations(METHOD_REGISTER_BOT).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn register_until_honours_its_own_token() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.fail_invocations(u32::MAX);
        let shared = CancellationToken::new();
        let registrar = coordinator(&transport, &shared);

        let link = shared.child_token();
        let trigger = link.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        assert!(!registrar.register_until(&link).await);
        assert_eq!(transport.invocations(METHOD_REGISTER_BOT).len(), 1);
        assert!(!shared.is_cancelled());
    }
}
