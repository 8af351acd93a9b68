//! Integration tests for the netpool-core public API.
//!
//! These tests exercise the crate the way the server crate and an
//! application protocol use it: parse an address, validate options, and run
//! a stateful protocol that forks per-worker instances.

use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use netpool_core::{
    CancellationToken, Channel, Protocol, ServerAddress, ServerOptions, SocketDescriptor,
    DEFAULT_BUSY_MESSAGE,
};

/// Counts sessions per instance; every fork gets its own counter.
struct SessionCounter {
    sessions: Mutex<u32>,
    forks: Arc<AtomicUsize>,
}

impl Protocol for SessionCounter {
    fn communicate(&self, channel: &mut dyn Channel, _token: &dyn CancellationToken) {
        let mut sessions = self.sessions.lock().expect("lock poisoned");
        *sessions += 1;
        let mut request = String::new();
        let _ = channel.read_to_string(&mut request);
        let _ = write!(channel, "session {}", *sessions);
    }

    fn fork(&self) -> Option<Box<dyn Protocol>> {
        self.forks.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(SessionCounter {
            sessions: Mutex::new(0),
            forks: Arc::clone(&self.forks),
        }))
    }
}

struct AlwaysContinue;

impl CancellationToken for AlwaysContinue {
    fn can_continue(&self) -> bool {
        true
    }
}

/// A forked instance starts with fresh state and the prototype is untouched.
#[test]
fn test_forked_protocol_keeps_private_state() {
    // Arrange
    let forks = Arc::new(AtomicUsize::new(0));
    let prototype = SessionCounter {
        sessions: Mutex::new(0),
        forks: Arc::clone(&forks),
    };

    // Act: fork twice and run two sessions on the first fork only.
    let first = prototype.fork().expect("stateful protocol must fork");
    let second = prototype.fork().expect("stateful protocol must fork");
    let mut a = Cursor::new(b"one".to_vec());
    first.communicate(&mut a, &AlwaysContinue);
    let mut b = Cursor::new(b"two".to_vec());
    first.communicate(&mut b, &AlwaysContinue);
    let mut c = Cursor::new(b"three".to_vec());
    second.communicate(&mut c, &AlwaysContinue);

    // Assert
    assert_eq!(forks.load(Ordering::SeqCst), 2);
    assert!(String::from_utf8_lossy(b.get_ref()).ends_with("session 2"));
    assert!(String::from_utf8_lossy(c.get_ref()).ends_with("session 1"));
    assert_eq!(*prototype.sessions.lock().unwrap(), 0);
}

/// Every scheme in the address grammar parses and prints back unchanged.
#[test]
fn test_address_grammar_covers_all_transports() {
    for uri in [
        "tcp://10.0.0.1:80",
        "tcp://[fe80::1]:443",
        "ssl://127.0.0.1:8443",
        "local://netpool-control",
    ] {
        let parsed = ServerAddress::parse(uri).expect("valid address");
        assert_eq!(parsed.to_string(), uri);
    }
}

/// Scenario A's limits are a valid configuration.
#[test]
fn test_small_pool_configuration_is_valid() {
    let opts = ServerOptions::default()
        .with_max_workers(2)
        .with_max_pending_connections(1);
    assert!(opts.validate().is_ok());
}

/// Descriptors are plain values: copying one does not consume it.
#[test]
fn test_descriptor_is_copy() {
    let d = SocketDescriptor::Network(12);
    let copy = d;
    assert_eq!(d, copy);
    assert_eq!(DEFAULT_BUSY_MESSAGE.len(), 12);
}
