//! The application-protocol contract.
//!
//! netpool never parses bytes itself.  Everything above "a connected byte
//! stream" belongs to a [`Protocol`] implementation injected into the
//! server: an HTTP parser, a line-based control protocol, a binary RPC
//! framing, and so on.
//!
//! # Shared versus per-worker instances
//!
//! A protocol decides how it is shared across worker threads through
//! [`Protocol::fork`]:
//!
//! - **Reentrant** protocols keep no per-session state in `self`.  `fork`
//!   returns `None` and every worker calls `communicate` on the one shared
//!   instance, concurrently.
//! - **Stateful** protocols return `Some(new_instance)`.  Each worker then
//!   owns a private instance for its whole lifetime and drops it when the
//!   worker is dropped.
//!
//! # Cancellation
//!
//! Stopping a server with `StopMode::InterruptClients` does not kill
//! threads.  It flips a flag that `communicate` observes through
//! [`CancellationToken::can_continue`].  A protocol must poll the token
//! during long operations and return promptly once it reports `false`.

use std::io::{Read, Write};

/// Generic busy reply written when no worker and no queue slot is free.
pub const DEFAULT_BUSY_MESSAGE: &[u8] = b"Server busy\n";

/// Busy reply suitable for HTTP protocols.
pub const HTTP_BUSY_RESPONSE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\r\n";

/// A connected, bidirectional byte stream handed to [`Protocol::communicate`].
///
/// Implemented for every `Read + Write + Send` type: TCP streams, TLS
/// streams, Unix streams, and in-memory cursors in tests.
pub trait Channel: Read + Write + Send {}

impl<T: Read + Write + Send> Channel for T {}

/// Cooperative cancellation signal passed to [`Protocol::communicate`].
pub trait CancellationToken: Send + Sync {
    /// Returns `false` once the session has been asked to stop.
    fn can_continue(&self) -> bool;
}

/// An application-layer protocol served by the pool.
pub trait Protocol: Send + Sync {
    /// Runs exactly one client session over `channel`.
    ///
    /// Must return (not panic) once the session is complete or `token`
    /// reports that it cannot continue.  A shared instance must be ready for
    /// the next session as soon as this returns.
    fn communicate(&self, channel: &mut dyn Channel, token: &dyn CancellationToken);

    /// Returns a private instance for a new worker, or `None` when this
    /// instance is reentrant and can be shared by all workers.
    fn fork(&self) -> Option<Box<dyn Protocol>> {
        None
    }

    /// Protocol-specific busy reply, e.g. [`HTTP_BUSY_RESPONSE`].
    ///
    /// An explicit `busy_message` in the server options takes precedence.
    fn busy_response(&self) -> Option<Vec<u8>> {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Upper;

    impl Protocol for Upper {
        fn communicate(&self, channel: &mut dyn Channel, token: &dyn CancellationToken) {
            let mut buf = [0u8; 16];
            while token.can_continue() {
                match channel.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        let upper = buf[..n].to_ascii_uppercase();
                        if channel.write_all(&upper).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    struct Flag(AtomicBool);

    impl CancellationToken for Flag {
        fn can_continue(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_cursor_is_a_channel() {
        // Arrange
        let mut cursor = Cursor::new(b"abc".to_vec());
        let channel: &mut dyn Channel = &mut cursor;

        // Act
        let mut out = String::new();
        channel.read_to_string(&mut out).unwrap();

        // Assert
        assert_eq!(out, "abc");
    }

    #[test]
    fn test_default_fork_shares_the_instance() {
        assert!(Upper.fork().is_none());
        assert!(Upper.busy_response().is_none());
    }

    #[test]
    fn test_protocol_returns_immediately_when_token_is_cancelled() {
        // Arrange: the token is already cancelled, so no byte may be consumed.
        let mut cursor = Cursor::new(b"hello".to_vec());
        let token = Flag(AtomicBool::new(false));

        // Act
        Upper.communicate(&mut cursor, &token);

        // Assert
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_busy_constants() {
        assert_eq!(DEFAULT_BUSY_MESSAGE, b"Server busy\n");
        assert!(HTTP_BUSY_RESPONSE.starts_with(b"HTTP/1.1 503"));
        assert!(HTTP_BUSY_RESPONSE.ends_with(b"\r\n\r\n"));
    }
}
