//! Accept loop and parked-stream table shared by the socket transports.
//!
//! Each listening transport runs one named background thread that polls a
//! non-blocking listener.  An accepted stream is switched back to blocking
//! mode, parked under its raw OS handle, and only then announced to the
//! engine as a [`SocketDescriptor`].  Whoever ends up serving it (a worker,
//! or the engine's busy path) takes the stream back out of the table through
//! `create_socket`; `discard_socket` takes it out and drops it.
//!
//! The parked stream keeps its OS handle open, so the OS cannot hand the
//! same handle value to a second connection while the first is still
//! waiting.  Descriptors in the engine's pending queue are therefore unique.
//!
//! # Stopping
//!
//! The listener is non-blocking.  The loop re-checks its `running` flag at
//! least every [`ACCEPT_POLL_INTERVAL`], so `stop` clears the flag and joins
//! the thread; the listener is closed when the thread drops it.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use netpool_core::SocketDescriptor;
use tracing::{debug, info, trace, warn};

use crate::application::transport::Dispatcher;

/// Sleep between accept attempts when no connection is waiting.
pub(crate) const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A non-blocking listener the accept loop can poll.
pub(crate) trait Listener: Send + 'static {
    type Stream: Send + 'static;

    /// Accepts one connection; `WouldBlock` when none is waiting.
    fn accept_stream(&self) -> io::Result<Self::Stream>;

    /// Puts an accepted stream back into blocking mode.
    fn prepare(stream: &Self::Stream) -> io::Result<()>;

    /// The descriptor the engine will know this stream by.
    fn descriptor(stream: &Self::Stream) -> SocketDescriptor;
}

/// Accepted streams waiting for a worker, keyed by descriptor.
pub(crate) struct Parked<S> {
    streams: Mutex<HashMap<SocketDescriptor, S>>,
}

impl<S> Parked<S> {
    pub(crate) fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn park(&self, descriptor: SocketDescriptor, stream: S) {
        let previous = self.lock().insert(descriptor, stream);
        if previous.is_some() {
            warn!("{descriptor} was still parked; closing the stale stream");
        }
    }

    pub(crate) fn take(&self, descriptor: SocketDescriptor) -> Option<S> {
        self.lock().remove(&descriptor)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SocketDescriptor, S>> {
        self.streams
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Handle to a running accept thread.  Dropping it stops the thread.
pub(crate) struct AcceptLoop {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AcceptLoop {
    /// Spawns the accept thread for `listener`.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if the OS refuses a new thread.
    pub(crate) fn spawn<L: Listener>(
        name: &str,
        listener: L,
        parked: Arc<Parked<L::Stream>>,
        dispatcher: Dispatcher,
    ) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || accept_loop(listener, parked, dispatcher, flag))?;
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// Clears the running flag and joins the thread.  Idempotent.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("accept thread panicked");
            }
        }
    }
}

impl Drop for AcceptLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop<L: Listener>(
    listener: L,
    parked: Arc<Parked<L::Stream>>,
    dispatcher: Dispatcher,
    running: Arc<AtomicBool>,
) {
    debug!("accept loop started");

    while running.load(Ordering::Acquire) {
        let stream = match listener.accept_stream() {
            Ok(stream) => stream,
            Err(e) if is_timeout_error(&e) => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
            Err(e) if is_transient_accept_error(&e) => {
                warn!("accept: {e}");
                continue;
            }
            Err(e) => {
                warn!("accept failed: {e}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
        };

        if let Err(e) = L::prepare(&stream) {
            warn!("could not configure accepted stream: {e}");
            continue;
        }

        let descriptor = L::descriptor(&stream);
        parked.park(descriptor, stream);

        match dispatcher.incoming_connection(descriptor) {
            Some(outcome) => trace!("{descriptor}: {outcome:?}"),
            None => {
                // The server is gone; nobody will ever take this stream.
                parked.take(descriptor);
                break;
            }
        }
    }

    info!("accept loop stopped");
}

/// `true` for the "nothing to accept yet" errors of a non-blocking listener.
pub(crate) fn is_timeout_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Errors that concern only the connection being accepted.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// The raw OS handle of a socket, as stored in a [`SocketDescriptor`].
#[cfg(unix)]
pub(crate) fn raw_handle<T: std::os::unix::io::AsRawFd>(io: &T) -> u64 {
    io.as_raw_fd() as u64
}

/// The raw OS handle of a socket, as stored in a [`SocketDescriptor`].
#[cfg(windows)]
pub(crate) fn raw_handle<T: std::os::windows::io::AsRawSocket>(io: &T) -> u64 {
    io.as_raw_socket()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
