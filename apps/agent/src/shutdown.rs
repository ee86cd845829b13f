//! Process-wide shutdown signal.
//!
//! Interrupts, host teardown signals and process exit all funnel into
//! [`ShutdownCoordinator::request_shutdown`], which cancels the shared
//! token exactly once no matter how many sources fire, or how
//! concurrently.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSource {
    /// Ctrl-C / SIGINT.
    Interrupt,
    /// The entry point returned or unwound.
    ProcessExit,
    /// The host or container runtime is tearing the process down.
    HostUnload,
}

impl fmt::Display for ShutdownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownSource::Interrupt => "interrupt",
            ShutdownSource::ProcessExit => "process exit",
            ShutdownSource::HostUnload => "host unload",
        };
        f.write_str(name)
    }
}

pub struct ShutdownCoordinator {
    token: CancellationToken,
    requested: AtomicBool,
    signal_listener: Mutex<Option<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            requested: AtomicBool::new(false),
            signal_listener: Mutex::new(None),
        })
    }

    /// The shared cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Cancels the shared token. Returns `true` only for the call that
    /// actually triggered shutdown.
    pub fn request_shutdown(&self, source: ShutdownSource) -> bool {
        if self
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(%source, "shutdown already requested");
            return false;
        }

        info!(%source, "shutdown requested");
        self.token.cancel();
        self.release_signal_listener();
        true
    }

    /// Installs OS signal handlers. Ctrl-C no longer kills the process
    /// outright; it requests shutdown instead.
    pub fn listen_for_signals(self: &Arc<Self>) -> std::io::Result<()> {
        let mut signals = signals::Signals::install()?;
        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let source = signals.recv().await;
            coordinator.request_shutdown(source);
        });
        self.attach_signal_listener(handle);
        Ok(())
    }

    fn attach_signal_listener(&self, handle: JoinHandle<()>) {
        match self.signal_listener.lock() {
            Ok(mut slot) if !self.is_requested() => *slot = Some(handle),
            Ok(_) => handle.abort(),
            Err(_) => warn!("signal listener slot poisoned"),
        }
    }

    fn release_signal_listener(&self) {
        if let Ok(mut slot) = self.signal_listener.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
    }

    /// Guard that requests shutdown when dropped.
    pub fn exit_guard(self: &Arc<Self>) -> ExitGuard {
        ExitGuard(Arc::clone(self))
    }
}

/// Requests [`ShutdownSource::ProcessExit`] on drop.
pub struct ExitGuard(Arc<ShutdownCoordinator>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.request_shutdown(ShutdownSource::ProcessExit);
    }
}

#[cfg(unix)]
mod signals {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    use super::ShutdownSource;

    pub(super) struct Signals {
        terminate: Signal,
        hangup: Signal,
        quit: Signal,
    }

    impl Signals {
        pub(super) fn install() -> std::io::Result<Self> {
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
                quit: signal(SignalKind::quit())?,
            })
        }

        pub(super) async fn recv(&mut self) -> ShutdownSource {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => ShutdownSource::Interrupt,
                _ = self.terminate.recv() => ShutdownSource::HostUnload,
                _ = self.hangup.recv() => ShutdownSource::HostUnload,
                _ = self.quit.recv() => ShutdownSource::HostUnload,
            }
        }
    }
}

#[cfg(windows)]
mod signals {
    use tokio::signal::windows::{CtrlClose, CtrlShutdown, ctrl_close, ctrl_shutdown};

    use super::ShutdownSource;

    pub(super) struct Signals {
        close: CtrlClose,
        shutdown: CtrlShutdown,
    }

    impl Signals {
        pub(super) fn install() -> std::io::Result<Self> {
            Ok(Self {
                close: ctrl_close()?,
                shutdown: ctrl_shutdown()?,
            })
        }

        pub(super) async fn recv(&mut self) -> ShutdownSource {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => ShutdownSource::Interrupt,
                _ = self.close.recv() => ShutdownSource::HostUnload,
                _ = self.shutdown.recv() => ShutdownSource::HostUnload,
            }
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod signals {
    use super::ShutdownSource;

    pub(super) struct Signals;

    impl Signals {
        pub(super) fn install() -> std::io::Result<Self> {
            Ok(Self)
        }

        pub(super) async fn recv(&mut self) -> ShutdownSource {
            match tokio::signal::ctrl_c().await {
                Ok(()) => ShutdownSource::Interrupt,
                Err(_) => std::future::pending().await,
            }
        }
    }
}
