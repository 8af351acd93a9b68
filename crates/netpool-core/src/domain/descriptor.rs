//! Platform-neutral handle to an accepted connection.
//!
//! When a transport accepts a connection it does not hand the OS stream to
//! the pool directly.  Instead it keeps ("parks") the stream and gives the
//! pool a small `Copy` value that names it.  That value can sit in the
//! pending queue, be compared for duplicates, and later be exchanged for a
//! usable byte channel by exactly one worker.
//!
//! A descriptor owns nothing.  Dropping one leaks nothing; the transport that
//! parked the stream is responsible for closing it (see the server crate's
//! `Transport::discard_socket`).

use std::fmt;

/// An opaque handle to one freshly accepted OS connection.
///
/// The wrapped integer is the raw OS handle of the parked stream (a file
/// descriptor on Unix, a `SOCKET` on Windows) or, for `Custom`, any value a
/// custom transport chooses.  Two descriptors are equal when both the kind
/// and the raw value match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketDescriptor {
    /// A TCP (or TLS-over-TCP) connection.
    Network(u64),
    /// A local IPC connection (Unix domain socket).
    Local(u64),
    /// A connection produced by a user-supplied transport.
    Custom(u64),
}

impl SocketDescriptor {
    /// Returns the raw handle value regardless of the descriptor kind.
    pub fn raw(&self) -> u64 {
        match *self {
            Self::Network(raw) | Self::Local(raw) | Self::Custom(raw) => raw,
        }
    }

    /// Short label of the descriptor kind, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Local(_) => "local",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Display for SocketDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind(), self.raw())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_descriptors_with_same_kind_and_value_are_equal() {
        assert_eq!(SocketDescriptor::Network(7), SocketDescriptor::Network(7));
    }

    #[test]
    fn test_descriptors_of_different_kind_are_not_equal() {
        // Arrange: a TCP socket and a Unix socket can share a raw fd number
        // over time, but they are never the same descriptor.
        let tcp = SocketDescriptor::Network(7);
        let local = SocketDescriptor::Local(7);

        // Assert
        assert_ne!(tcp, local);
        assert_eq!(tcp.raw(), local.raw());
    }

    #[test]
    fn test_descriptor_is_usable_as_hash_key() {
        let mut set = HashSet::new();
        assert!(set.insert(SocketDescriptor::Custom(1)));
        assert!(!set.insert(SocketDescriptor::Custom(1)));
        assert!(set.insert(SocketDescriptor::Custom(2)));
    }

    #[test]
    fn test_display_includes_kind_and_raw_value() {
        assert_eq!(SocketDescriptor::Local(42).to_string(), "local#42");
        assert_eq!(SocketDescriptor::Network(3).to_string(), "network#3");
    }
}
