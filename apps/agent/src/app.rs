//! Application orchestrator: wires the hub connection, registration and
//! status listener to the shared shutdown signal.

use std::sync::Arc;

use anyhow::Context;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use botshadow_hub_connection::{
    ConnectionManager, Invoker, RegistrationCoordinator, RetryExecutor, WsTransport,
};
use botshadow_protocol::constants::METHOD_UPDATE_BOT;
use botshadow_status_listener::{
    ForwardError, ForwardFuture, Forwarder, ListenerConfig, StatusListener,
};

use crate::config::Config;
use crate::shutdown::ShutdownCoordinator;

/// Runs the agent until shutdown is requested.
pub async fn run(config: Config, shutdown: Arc<ShutdownCoordinator>) -> anyhow::Result<()> {
    let cancel = shutdown.token();

    let transport = WsTransport::new(&config.hub_uri).context("invalid hub URI")?;
    info!(url = %transport.url(), "hub transport ready");
    let manager = Arc::new(ConnectionManager::new(
        Arc::new(transport),
        config.lifecycle.clone(),
        cancel.clone(),
    ));

    // -- Status listener --
    let listener = StatusListener::bind(
        ListenerConfig {
            listener_uri: config.listener_uri.clone(),
            bot_id: config.bot_id.clone(),
        },
        Arc::new(HubForwarder {
            invoker: manager.invoker(),
        }),
        cancel.clone(),
    )
    .await
    .context("failed to start status listener")?;
    info!(
        addr = %listener.local_addr(),
        prefix = %listener.prefix(),
        "status listener bound"
    );
    let listener_task = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("status listener error: {e}");
        }
    });

    // -- Connect, register, then follow the link --
    let registrar = Arc::new(RegistrationCoordinator::new(
        manager.invoker(),
        config.payload,
        RetryExecutor::logging(config.lifecycle.retry),
        cancel.clone(),
    ));
    let lifecycle = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run_lifecycle(registrar).await })
    };

    info!("agent ready");

    // -- Main loop: wait for shutdown --
    cancel.cancelled().await;

    // -- Graceful shutdown --
    info!("stopping services...");
    manager.stop().await;
    if let Err(e) = lifecycle.await {
        error!("lifecycle task failed: {e}");
    }
    if let Err(e) = listener_task.await {
        error!("status listener task failed: {e}");
    }
    Ok(())
}

/// Relays listener updates to the hub as `UpdateBot`.
struct HubForwarder {
    invoker: Invoker,
}

impl Forwarder for HubForwarder {
    fn forward(&self, update: Map<String, Value>, cancel: CancellationToken) -> ForwardFuture<'_> {
        Box::pin(async move {
            self.invoker
                .invoke(METHOD_UPDATE_BOT, Value::Object(update), &cancel)
                .await
                .map(|_| ())
                .map_err(|e| ForwardError::new(e.kind(), e.to_string()))
        })
    }
}
