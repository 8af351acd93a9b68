//! Local (`local://`) transport over a Unix-domain socket.
//!
//! The address is a filesystem path.  A socket file left behind by a process
//! that died is detected (nothing accepts on it) and replaced; a socket file
//! with a live listener behind it is reported as "address in use".  Any other
//! kind of file at the path is never removed.  The socket file is removed
//! again when listening stops.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use netpool_core::{AddressError, Channel, SocketDescriptor};
use tracing::{debug, info, warn};

use super::accept::{raw_handle, AcceptLoop, Listener, Parked};
use crate::application::sync::lock;
use crate::application::transport::{Dispatcher, Transport, TransportError};

impl Listener for UnixListener {
    type Stream = UnixStream;

    fn accept_stream(&self) -> io::Result<UnixStream> {
        self.accept().map(|(stream, _peer)| stream)
    }

    fn prepare(stream: &UnixStream) -> io::Result<()> {
        stream.set_nonblocking(false)
    }

    fn descriptor(stream: &UnixStream) -> SocketDescriptor {
        SocketDescriptor::Local(raw_handle(stream))
    }
}

/// Listens on a Unix-domain socket path.
pub struct LocalTransport {
    path: Mutex<PathBuf>,
    parked: Arc<Parked<UnixStream>>,
    accept: Mutex<Option<AcceptLoop>>,
}

impl LocalTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Mutex::new(path.into()),
            parked: Arc::new(Parked::new()),
            accept: Mutex::new(None),
        }
    }

    pub fn path(&self) -> PathBuf {
        lock(&self.path).clone()
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.accept).is_some()
    }
}

/// Removes `path` if it is a socket nobody listens on any more.
///
/// Anything at `path` that is not a socket is left alone and reported as
/// `AlreadyExists`.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        ));
    }
    match UnixStream::connect(path) {
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            "another process is listening on this socket",
        )),
        Err(_) => {
            debug!("removing stale socket {}", path.display());
            std::fs::remove_file(path)
        }
    }
}

impl Transport for LocalTransport {
    fn start_listening(&self, dispatcher: Dispatcher) -> Result<(), TransportError> {
        let mut accept = lock(&self.accept);
        let path = self.path();
        if accept.is_some() {
            return Err(TransportError::AlreadyListening(path.display().to_string()));
        }

        let bind_error = |source| TransportError::Bind {
            address: path.display().to_string(),
            source,
        };
        remove_stale_socket(&path).map_err(bind_error)?;
        let listener = UnixListener::bind(&path).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;

        *accept = Some(AcceptLoop::spawn(
            "netpool-accept-local",
            listener,
            Arc::clone(&self.parked),
            dispatcher,
        )?);

        info!("listening on local://{}", path.display());
        Ok(())
    }

    fn stop_listening(&self) {
        let Some(mut accept) = lock(&self.accept).take() else {
            return;
        };
        accept.stop();

        let path = self.path();
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("could not remove {}: {e}", path.display());
            }
        }
        info!("stopped listening on local://{}", path.display());
    }

    fn create_socket(&self, descriptor: SocketDescriptor) -> Option<Box<dyn Channel>> {
        let stream = self.parked.take(descriptor)?;
        Some(Box::new(stream))
    }

    fn discard_socket(&self, descriptor: SocketDescriptor) {
        if self.parked.take(descriptor).is_some() {
            debug!("closed unserved connection {descriptor}");
        }
    }

    fn server_address(&self) -> String {
        self.path().display().to_string()
    }

    fn set_server_address(&self, address: &str) -> Result<(), TransportError> {
        if address.is_empty() {
            return Err(AddressError::EmptyLocalName.into());
        }
        if self.is_listening() {
            return Err(TransportError::AlreadyListening(self.server_address()));
        }
        *lock(&self.path) = PathBuf::from(address);
        Ok(())
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
