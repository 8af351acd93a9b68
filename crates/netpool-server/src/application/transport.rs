//! The transport port: what a listening adapter must provide to the engine.
//!
//! The engine ([`Server`](crate::application::server::Server)) knows nothing
//! about TCP, TLS or Unix sockets.  It drives a [`Transport`] through four
//! hooks and receives accepted connections back through a [`Dispatcher`]:
//!
//! ```text
//! Server::start ──► Transport::start_listening(dispatcher)
//!                        │ accept loop thread
//!                        ▼
//!                   park stream, make SocketDescriptor
//!                        │
//!                        ▼
//!              Dispatcher::incoming_connection(descriptor) ──► engine
//!
//! Worker ──► Transport::create_socket(descriptor) ──► Box<dyn Channel>
//! ```
//!
//! Adapters live in `crate::infrastructure::transport`.

use std::io::{self, Write};
use std::sync::{Arc, Weak};

use netpool_core::{AddressError, Channel, SocketDescriptor};
use thiserror::Error;

use crate::application::worker::WorkerId;

/// Errors reported by a transport when it cannot listen or is misconfigured.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listening socket could not be created or bound.
    #[error("failed to listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// `start_listening` was called twice without `stop_listening`.
    #[error("transport is already listening on {0}")]
    AlreadyListening(String),

    /// The configured address is not valid for this transport.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// The transport is not available on this platform.
    #[error("{0} transport is not supported on this platform")]
    Unsupported(&'static str),

    /// TLS configuration could not be loaded.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Any other I/O failure while setting up the listener.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the engine decided to do with one incoming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to an idle worker.
    Reused(WorkerId),
    /// Handed to a newly created worker.
    Spawned(WorkerId),
    /// Parked in the pending queue until a worker frees up.
    Queued,
    /// Refused with the busy response.
    Busy,
    /// Dropped: the server is not running (or the worker thread could not
    /// be spawned).
    Dropped,
}

/// Receiver of accepted connections, implemented by the engine.
pub trait ConnectionSink: Send + Sync {
    /// Decides what happens to `descriptor`.  Never blocks on I/O.
    fn incoming_connection(&self, descriptor: SocketDescriptor) -> Dispatch;
}

/// Handle an accept loop uses to forward connections to its server.
///
/// Holds only a weak reference, so a transport's accept thread never keeps
/// a dropped server alive.
#[derive(Clone)]
pub struct Dispatcher {
    sink: Weak<dyn ConnectionSink>,
}

impl Dispatcher {
    /// Creates a dispatcher that forwards to `sink`.
    pub fn new<S: ConnectionSink + 'static>(sink: &Arc<S>) -> Self {
        let weak: Weak<S> = Arc::downgrade(sink);
        let sink: Weak<dyn ConnectionSink> = weak;
        Self { sink }
    }

    pub(crate) fn from_weak(sink: Weak<dyn ConnectionSink>) -> Self {
        Self { sink }
    }

    /// Forwards `descriptor` to the server.
    ///
    /// Returns `None` when the server no longer exists; the caller still
    /// owns the parked stream and should close it.
    pub fn incoming_connection(&self, descriptor: SocketDescriptor) -> Option<Dispatch> {
        self.sink
            .upgrade()
            .map(|sink| sink.incoming_connection(descriptor))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connected", &(self.sink.strong_count() > 0))
            .finish()
    }
}

/// A listening endpoint the engine can start, stop and draw channels from.
///
/// Implementations must be safe to call from the engine's caller thread,
/// the accept-loop thread and every worker thread concurrently.
pub trait Transport: Send + Sync {
    /// Binds, listens and starts forwarding accepted connections to
    /// `dispatcher`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] for a bad address, an address in use,
    /// missing permissions, or when already listening.
    fn start_listening(&self, dispatcher: Dispatcher) -> Result<(), TransportError>;

    /// Stops accepting and closes the listening handle.  Idempotent.
    ///
    /// Must not be called while holding the engine's lock: it joins the
    /// accept thread, which may be waiting for that lock.
    fn stop_listening(&self);

    /// Turns a parked connection into a channel, consuming the descriptor.
    ///
    /// Returns `None` if the descriptor is unknown or the channel could not
    /// be established (e.g. a TLS handshake failed or timed out).
    fn create_socket(&self, descriptor: SocketDescriptor) -> Option<Box<dyn Channel>>;

    /// Closes a parked connection that will never be served.
    fn discard_socket(&self, descriptor: SocketDescriptor);

    /// Writes `message` to a connection refused for lack of capacity, then
    /// closes it.
    ///
    /// Runs on the accept thread, so adapters whose channels need a
    /// handshake should bound it tightly.  The default goes through
    /// [`create_socket`](Self::create_socket).
    ///
    /// # Errors
    ///
    /// The write or flush error; the connection is closed either way.
    fn refuse_socket(&self, descriptor: SocketDescriptor, message: &[u8]) -> io::Result<()> {
        let Some(mut channel) = self.create_socket(descriptor) else {
            return Ok(());
        };
        channel.write_all(message)?;
        channel.flush()
    }

    /// The transport-specific address, e.g. `127.0.0.1:7878` or a socket path.
    ///
    /// After a successful `start_listening` on port 0 this reports the port
    /// the OS actually assigned.
    fn server_address(&self) -> String;

    /// Changes the address used by the next `start_listening`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the address is malformed or the
    /// transport is currently listening.
    fn set_server_address(&self, address: &str) -> Result<(), TransportError>;
}

// ── Test doubles ──────────────────────────────────────────────────────────────
