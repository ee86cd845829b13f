//! botshadow agent entry point.

mod app;
mod config;
mod shutdown;

use std::process::ExitCode;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::shutdown::ShutdownCoordinator;

fn main() -> ExitCode {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "unhandled panic");
    }));

    let config = match config::load(std::env::args_os()) {
        Ok(config) => config,
        Err(e) => {
            e.report();
            return ExitCode::from(e.exit_code());
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bot_id = %config.bot_id,
        hub = %config.hub_uri,
        "starting botshadow agent"
    );

    match run(config) {
        Ok(()) => {
            tracing::info!("agent shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("agent failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let shutdown = ShutdownCoordinator::new();
        let _exit = shutdown.exit_guard();
        shutdown
            .listen_for_signals()
            .context("failed to install signal handlers")?;
        app::run(config, shutdown.clone()).await
    })
}
