//! TCP transport, plain (`tcp://`) or TLS-wrapped (`ssl://`).

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use netpool_core::domain::address::parse_tcp;
use netpool_core::{Channel, SocketDescriptor};
use tracing::{debug, info, warn};

use super::accept::{raw_handle, AcceptLoop, Listener, Parked};
use super::tls::{TlsSettings, BUSY_HANDSHAKE_TIMEOUT};
use crate::application::sync::lock;
use crate::application::transport::{Dispatcher, Transport, TransportError};

impl Listener for TcpListener {
    type Stream = TcpStream;

    fn accept_stream(&self) -> io::Result<TcpStream> {
        self.accept().map(|(stream, _peer)| stream)
    }

    fn prepare(stream: &TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)
    }

    fn descriptor(stream: &TcpStream) -> SocketDescriptor {
        SocketDescriptor::Network(raw_handle(stream))
    }
}

/// Listens on one TCP address and hands out plain or TLS channels.
pub struct TcpTransport {
    address: Mutex<SocketAddr>,
    tls: Option<TlsSettings>,
    parked: Arc<Parked<TcpStream>>,
    accept: Mutex<Option<AcceptLoop>>,
}

impl TcpTransport {
    /// A plain TCP transport.
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address: Mutex::new(address),
            tls: None,
            parked: Arc::new(Parked::new()),
            accept: Mutex::new(None),
        }
    }

    /// A TCP transport that performs a TLS handshake on every connection.
    pub fn with_tls(address: SocketAddr, tls: TlsSettings) -> Self {
        Self {
            address: Mutex::new(address),
            tls: Some(tls),
            parked: Arc::new(Parked::new()),
            accept: Mutex::new(None),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.tls.is_some()
    }

    /// The bound address; after listening on port 0 it carries the real port.
    pub fn local_addr(&self) -> SocketAddr {
        *lock(&self.address)
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.accept).is_some()
    }

    fn scheme(&self) -> &'static str {
        if self.is_encrypted() {
            "ssl"
        } else {
            "tcp"
        }
    }
}

impl Transport for TcpTransport {
    fn start_listening(&self, dispatcher: Dispatcher) -> Result<(), TransportError> {
        let mut accept = lock(&self.accept);
        let requested = *lock(&self.address);
        if accept.is_some() {
            return Err(TransportError::AlreadyListening(requested.to_string()));
        }

        let bind_error = |source| TransportError::Bind {
            address: requested.to_string(),
            source,
        };
        let listener = TcpListener::bind(requested).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let bound = listener.local_addr().map_err(bind_error)?;

        let thread_name = format!("netpool-accept-{}", bound.port());
        *accept = Some(AcceptLoop::spawn(
            &thread_name,
            listener,
            Arc::clone(&self.parked),
            dispatcher,
        )?);
        *lock(&self.address) = bound;

        info!("listening on {}://{bound}", self.scheme());
        Ok(())
    }

    fn stop_listening(&self) {
        let Some(mut accept) = lock(&self.accept).take() else {
            return;
        };
        accept.stop();
        info!(
            "stopped listening on {}://{}",
            self.scheme(),
            self.local_addr()
        );
    }

    fn create_socket(&self, descriptor: SocketDescriptor) -> Option<Box<dyn Channel>> {
        let stream = self.parked.take(descriptor)?;
        let Some(tls) = &self.tls else {
            return Some(Box::new(stream));
        };

        let peer = stream.peer_addr().ok();
        match tls.accept(stream) {
            Ok(session) => Some(Box::new(session)),
            Err(e) => {
                warn!("TLS handshake with {peer:?} failed: {e}");
                None
            }
        }
    }

    fn discard_socket(&self, descriptor: SocketDescriptor) {
        if self.parked.take(descriptor).is_some() {
            debug!("closed unserved connection {descriptor}");
        }
    }

    fn refuse_socket(&self, descriptor: SocketDescriptor, message: &[u8]) -> io::Result<()> {
        let Some(stream) = self.parked.take(descriptor) else {
            return Ok(());
        };
        stream.set_write_timeout(Some(BUSY_HANDSHAKE_TIMEOUT))?;
        let mut channel: Box<dyn Channel> = match &self.tls {
            Some(tls) => Box::new(tls.accept_within(stream, BUSY_HANDSHAKE_TIMEOUT)?),
            None => Box::new(stream),
        };
        channel.write_all(message)?;
        channel.flush()
    }

    fn server_address(&self) -> String {
        self.local_addr().to_string()
    }

    fn set_server_address(&self, address: &str) -> Result<(), TransportError> {
        let parsed = parse_tcp(address)?;
        if self.is_listening() {
            return Err(TransportError::AlreadyListening(self.server_address()));
        }
        *lock(&self.address) = parsed;
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("address", &self.local_addr())
            .field("tls", &self.tls)
            .field("listening", &self.is_listening())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
