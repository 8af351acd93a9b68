//! Worker-pool limits.
//!
//! [`ServerOptions`] is the configuration surface of one server:
//!
//! | Field                     | Range   | Default  |
//! |---------------------------|---------|----------|
//! | `min_workers`             | 0–999   | 0        |
//! | `max_workers`             | 1–999   | 10       |
//! | `worker_idle_timeout`     | > 0     | 15 s     |
//! | `max_pending_connections` | ≥ 0     | 0        |
//! | `busy_message`            | bytes   | none     |
//!
//! `max_pending_connections = 0` disables queueing: once `max_workers`
//! workers are busy every further connection gets the busy response.
//!
//! The options are validated once, when the server is constructed.  An
//! invalid combination is a configuration error, reported synchronously and
//! never discovered later under load.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted value for `min_workers` and `max_workers`.
pub const WORKER_LIMIT: u32 = 999;

/// Default idle time after which a surplus worker retires.
pub const DEFAULT_WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default upper bound on concurrently served connections.
pub const DEFAULT_MAX_WORKERS: u32 = 10;

/// Errors produced by [`ServerOptions::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("min_workers must be between 0 and 999, got {0}")]
    MinWorkersOutOfRange(u32),

    #[error("max_workers must be between 1 and 999, got {0}")]
    MaxWorkersOutOfRange(u32),

    #[error("min_workers ({min}) must not exceed max_workers ({max})")]
    MinExceedsMax { min: u32, max: u32 },

    /// A zero timeout would wake idle workers continuously.
    #[error("worker_idle_timeout must be greater than zero")]
    ZeroIdleTimeout,
}

/// How a server's `stop` treats in-flight sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Let every running session finish on its own.
    #[default]
    WaitClients,
    /// Signal running sessions to stop via their cancellation token.
    InterruptClients,
}

/// Limits and backpressure settings for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Workers created eagerly by `start()` and never retired for idleness.
    pub min_workers: u32,
    /// Upper bound on live workers, i.e. concurrently served connections.
    pub max_workers: u32,
    /// How long a surplus worker waits for work before retiring.
    pub worker_idle_timeout: Duration,
    /// Connections held while all workers are busy.
    pub max_pending_connections: usize,
    /// Bytes written to a connection that is refused for lack of capacity.
    ///
    /// `None` falls back to the protocol's own busy response, then to
    /// [`DEFAULT_BUSY_MESSAGE`](crate::DEFAULT_BUSY_MESSAGE).
    pub busy_message: Option<Vec<u8>>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            min_workers: 0,
            max_workers: DEFAULT_MAX_WORKERS,
            worker_idle_timeout: DEFAULT_WORKER_IDLE_TIMEOUT,
            max_pending_connections: 0,
            busy_message: None,
        }
    }
}

impl ServerOptions {
    /// Sets `min_workers`.
    pub fn with_min_workers(mut self, min_workers: u32) -> Self {
        self.min_workers = min_workers;
        self
    }

    /// Sets `max_workers`.
    pub fn with_max_workers(mut self, max_workers: u32) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Sets `worker_idle_timeout`.
    pub fn with_worker_idle_timeout(mut self, timeout: Duration) -> Self {
        self.worker_idle_timeout = timeout;
        self
    }

    /// Sets `max_pending_connections`.
    pub fn with_max_pending_connections(mut self, max_pending: usize) -> Self {
        self.max_pending_connections = max_pending;
        self
    }

    /// Sets the busy response.
    pub fn with_busy_message(mut self, message: impl Into<Vec<u8>>) -> Self {
        self.busy_message = Some(message.into());
        self
    }

    /// Checks the worker limits.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] when a limit is out of range,
    /// `min_workers > max_workers` (which would let `start()` exceed the
    /// worker cap), or the idle timeout is zero.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.min_workers > WORKER_LIMIT {
            return Err(OptionsError::MinWorkersOutOfRange(self.min_workers));
        }
        if self.max_workers == 0 || self.max_workers > WORKER_LIMIT {
            return Err(OptionsError::MaxWorkersOutOfRange(self.max_workers));
        }
        if self.min_workers > self.max_workers {
            return Err(OptionsError::MinExceedsMax {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        if self.worker_idle_timeout.is_zero() {
            return Err(OptionsError::ZeroIdleTimeout);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        // Arrange / Act
        let opts = ServerOptions::default();

        // Assert
        assert_eq!(opts.min_workers, 0);
        assert_eq!(opts.max_workers, 10);
        assert_eq!(opts.max_pending_connections, 0);
        assert_eq!(opts.worker_idle_timeout, Duration::from_secs(15));
        assert!(opts.busy_message.is_none());
        assert_eq!(opts.validate(), Ok(()));
    }

    #[test]
    fn test_max_workers_zero_is_rejected() {
        let opts = ServerOptions::default().with_max_workers(0);
        assert_eq!(opts.validate(), Err(OptionsError::MaxWorkersOutOfRange(0)));
    }

    #[test]
    fn test_limits_above_999_are_rejected() {
        assert_eq!(
            ServerOptions::default().with_max_workers(1000).validate(),
            Err(OptionsError::MaxWorkersOutOfRange(1000))
        );
        assert_eq!(
            ServerOptions::default()
                .with_max_workers(999)
                .with_min_workers(1000)
                .validate(),
            Err(OptionsError::MinWorkersOutOfRange(1000))
        );
    }

    #[test]
    fn test_min_above_max_is_rejected() {
        let opts = ServerOptions::default()
            .with_min_workers(5)
            .with_max_workers(2);
        assert_eq!(
            opts.validate(),
            Err(OptionsError::MinExceedsMax { min: 5, max: 2 })
        );
    }

    #[test]
    fn test_zero_idle_timeout_is_rejected() {
        // Arrange
        let opts = ServerOptions::default().with_worker_idle_timeout(Duration::ZERO);

        // Act / Assert
        assert_eq!(opts.validate(), Err(OptionsError::ZeroIdleTimeout));
        assert_eq!(
            ServerOptions::default()
                .with_worker_idle_timeout(Duration::from_millis(1))
                .validate(),
            Ok(())
        );
    }

    #[test]
    fn test_boundary_values_are_accepted() {
        let opts = ServerOptions::default()
            .with_min_workers(999)
            .with_max_workers(999);
        assert_eq!(opts.validate(), Ok(()));
    }

    #[test]
    fn test_builder_sets_busy_message() {
        let opts = ServerOptions::default().with_busy_message("full\n");
        assert_eq!(opts.busy_message.as_deref(), Some(&b"full\n"[..]));
    }

    #[test]
    fn test_stop_mode_defaults_to_wait_clients() {
        assert_eq!(StopMode::default(), StopMode::WaitClients);
    }
}
