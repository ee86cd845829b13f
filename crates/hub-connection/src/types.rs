//! Public types for the hub connection.

use std::fmt;
use std::time::Duration;

/// Lifecycle state of the hub connection.
///
/// `Disconnected → Connecting → Connected → Reconnecting → Connected | Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live link; either never connected or a connect attempt exhausted.
    Disconnected,
    /// Connect attempts in progress.
    Connecting,
    /// Link established and handshake completed.
    Connected,
    /// Link lost, recovery sequence running.
    Reconnecting,
    /// Stopped for good (shutdown).
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A single state transition, as delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub cause: Option<String>,
}

/// Lifecycle notifications raised by a [`Transport`](crate::transport::Transport)
/// after a successful start.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The link is gone and the transport will not bring it back by itself.
    Closed { cause: Option<String> },
    /// The transport is retrying the link on its own.
    Reconnecting { attempt: u32, cause: Option<String> },
    /// The transport restored the link; the hub assigned a new id.
    Reconnected { connection_id: String },
    /// The hub invoked a client method.
    Received {
        target: String,
        payload: serde_json::Value,
    },
}

/// Bounded retry policy: fixed interval inside a fixed window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Pause between a failed attempt and the next one.
    pub interval: Duration,
    /// Total time span, from the first attempt, during which retries happen.
    pub window: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            window: Duration::from_secs(10 * 60),
        }
    }
}

/// Behaviour of the connection manager after a loss.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    /// Policy for each connect (and registration) sequence.
    pub retry: RetryPolicy,
    /// Pause between a `Closed` notification and the reconnect attempt.
    pub reconnect_delay: Duration,
    /// Also re-register after a transport-level resume (`Reconnected`).
    ///
    /// Off by default: only the `Closed → connect → register` path
    /// re-registers.
    pub reregister_on_resume: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            reconnect_delay: Duration::from_secs(2),
            reregister_on_resume: false,
        }
    }
}

/// Configuration for the transport's own resume with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first resume attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Attempts before giving up and reporting `Closed` (0 disables resume).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
            max_attempts: 4,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / 1_000_000_000.0)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }
}
