//! Worker: one pooled OS thread serving one connection at a time.
//!
//! # Lifecycle
//!
//! ```text
//!  Idle ──assign()──► Waiting ──descriptor──► Executing ──► Waiting ──► …
//!  (no thread yet)       │                                      │
//!                        │ stop() / idle timeout accepted        │
//!                        ▼                                      ▼
//!                      Exited ◄──────────────────────────────────┘
//! ```
//!
//! A worker is created by the engine with no thread.  The first
//! [`Worker::assign`] spawns it.  From then on the thread loops:
//!
//! 1. Wait on the condition variable for a descriptor, a stop request, or
//!    the idle timeout.
//! 2. Descriptor: ask the [`Controller`] for a channel, run
//!    [`Protocol::communicate`] on it, drop the channel, report
//!    `thread_available`.
//! 3. Stop request: exit.
//! 4. Idle timeout: ask `thread_finished`; exit only if the engine agrees
//!    (the pool is above its floor and nobody assigned work in the
//!    meantime), otherwise keep waiting.
//!
//! # Signalling
//!
//! The descriptor slot and the `running` flag live under the worker's own
//! mutex and are paired with one condition variable.  `interrupted` is an
//! atomic because the protocol reads it from inside `communicate`, without
//! the lock.  The worker thread never holds its slot lock while calling into
//! the controller, so the engine may call [`Worker::assign`] while holding
//! its own lock.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use netpool_core::{CancellationToken, Channel, Protocol, SocketDescriptor, StopMode};
use tracing::{debug, error, trace, warn};

use crate::application::sync::lock;

/// Identifier of one worker within its server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Callbacks a worker uses to talk to the engine that owns it.
pub trait Controller: Send + Sync {
    /// The worker finished a session and can take another one.
    fn thread_available(&self, worker: WorkerId);

    /// The worker's idle wait timed out.  Returns `true` when the engine
    /// retired it, in which case the worker thread exits.
    fn thread_finished(&self, worker: WorkerId) -> bool;

    /// Exchanges a descriptor for a channel (see `Transport::create_socket`).
    fn create_socket(&self, descriptor: SocketDescriptor) -> Option<Box<dyn Channel>>;
}

/// Observable state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, thread not spawned yet.
    Idle,
    /// Thread running, waiting for a descriptor.
    WaitingForWork,
    /// Serving a connection.
    Executing,
    /// Thread has left its loop.
    Exited,
}

/// The protocol instance a worker runs.
pub enum WorkerProtocol {
    /// The server's reentrant instance, shared with every other worker.
    Shared(Arc<dyn Protocol>),
    /// A private instance produced by [`Protocol::fork`].
    Owned(Box<dyn Protocol>),
}

impl WorkerProtocol {
    /// Forks `prototype` when it is stateful, shares it otherwise.
    pub fn for_worker(prototype: &Arc<dyn Protocol>) -> Self {
        match prototype.fork() {
            Some(owned) => Self::Owned(owned),
            None => Self::Shared(Arc::clone(prototype)),
        }
    }
}

struct Slot {
    pending: Option<SocketDescriptor>,
    running: bool,
    state: WorkerState,
}

struct Signal {
    slot: Mutex<Slot>,
    wake: Condvar,
    interrupted: AtomicBool,
}

impl CancellationToken for Signal {
    fn can_continue(&self) -> bool {
        !self.interrupted.load(Ordering::Acquire)
    }
}

/// A pooled worker.  See the module docs for the lifecycle.
pub struct Worker {
    id: WorkerId,
    protocol: Arc<dyn Protocol>,
    owns_protocol: bool,
    controller: Weak<dyn Controller>,
    idle_timeout: Duration,
    signal: Arc<Signal>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Creates a worker.  No thread is spawned until the first
    /// [`assign`](Self::assign).
    pub fn new(
        id: WorkerId,
        protocol: WorkerProtocol,
        controller: Weak<dyn Controller>,
        idle_timeout: Duration,
    ) -> Self {
        let (protocol, owns_protocol): (Arc<dyn Protocol>, bool) = match protocol {
            WorkerProtocol::Shared(shared) => (shared, false),
            WorkerProtocol::Owned(owned) => (Arc::from(owned), true),
        };
        Self {
            id,
            protocol,
            owns_protocol,
            controller,
            idle_timeout,
            signal: Arc::new(Signal {
                slot: Mutex::new(Slot {
                    pending: None,
                    running: true,
                    state: WorkerState::Idle,
                }),
                wake: Condvar::new(),
                interrupted: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// `true` when this worker runs a private, forked protocol instance.
    pub fn owns_protocol(&self) -> bool {
        self.owns_protocol
    }

    /// The protocol instance this worker runs.
    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.protocol
    }

    pub fn state(&self) -> WorkerState {
        lock(&self.signal.slot).state
    }

    /// Hands `descriptor` to the worker, spawning its thread on first use.
    ///
    /// The engine only assigns to workers it has just taken out of its free
    /// set (or just created), so the slot is always empty here and a single
    /// notification is enough.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from [`thread::Builder::spawn`]; the descriptor
    /// is not kept in that case.
    pub fn assign(&self, descriptor: SocketDescriptor) -> std::io::Result<()> {
        let mut slot = lock(&self.signal.slot);
        slot.pending = Some(descriptor);

        if slot.state == WorkerState::Idle {
            match self.spawn() {
                Ok(handle) => {
                    *lock(&self.thread) = Some(handle);
                    slot.state = WorkerState::WaitingForWork;
                }
                Err(e) => {
                    slot.pending = None;
                    return Err(e);
                }
            }
        }

        drop(slot);
        self.signal.wake.notify_one();
        Ok(())
    }

    /// Asks the worker thread to exit after its current session.
    ///
    /// With [`StopMode::InterruptClients`] the cancellation token also
    /// starts reporting `false`, so a cooperative protocol returns early.
    pub fn stop(&self, mode: StopMode) {
        let mut slot = lock(&self.signal.slot);
        slot.running = false;
        if mode == StopMode::InterruptClients {
            self.signal.interrupted.store(true, Ordering::Release);
        }
        drop(slot);
        self.signal.wake.notify_one();
    }

    /// `false` once the worker has been interrupted.
    pub fn can_continue(&self) -> bool {
        self.signal.can_continue()
    }

    /// Waits for the worker thread to exit.
    ///
    /// Returns `false` when there was nothing to join: the thread was never
    /// spawned, was already joined, or is the calling thread.
    pub fn join(&self) -> bool {
        let Some(handle) = lock(&self.thread).take() else {
            return false;
        };
        if handle.thread().id() == thread::current().id() {
            warn!("{} asked to join itself; skipping", self.id);
            *lock(&self.thread) = Some(handle);
            return false;
        }
        if handle.join().is_err() {
            warn!("{} thread panicked", self.id);
        }
        true
    }

    fn spawn(&self) -> std::io::Result<JoinHandle<()>> {
        let run = WorkerLoop {
            id: self.id,
            protocol: Arc::clone(&self.protocol),
            controller: self.controller.clone(),
            idle_timeout: self.idle_timeout,
            signal: Arc::clone(&self.signal),
        };
        thread::Builder::new()
            .name(format!("netpool-{}", self.id))
            .spawn(move || run.run())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // A worker dropped without join must not leave its thread waiting
        // out the full idle timeout.
        let mut slot = lock(&self.signal.slot);
        slot.running = false;
        drop(slot);
        self.signal.wake.notify_one();
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("owns_protocol", &self.owns_protocol)
            .field("state", &self.state())
            .finish()
    }
}

// ── Worker thread ─────────────────────────────────────────────────────────────

enum Next {
    Serve(SocketDescriptor),
    Stop,
    IdleExpired,
}

/// Everything the worker thread needs, moved into it at spawn time.
struct WorkerLoop {
    id: WorkerId,
    protocol: Arc<dyn Protocol>,
    controller: Weak<dyn Controller>,
    idle_timeout: Duration,
    signal: Arc<Signal>,
}

impl WorkerLoop {
    fn run(self) {
        debug!("{} started", self.id);

        loop {
            match self.next_assignment() {
                Next::Serve(descriptor) => {
                    self.serve(descriptor);
                    self.set_state(WorkerState::WaitingForWork);
                    let Some(controller) = self.controller.upgrade() else {
                        break;
                    };
                    controller.thread_available(self.id);
                }
                Next::Stop => break,
                Next::IdleExpired => {
                    let Some(controller) = self.controller.upgrade() else {
                        break;
                    };
                    if controller.thread_finished(self.id) {
                        debug!("{} retiring after {:?} idle", self.id, self.idle_timeout);
                        break;
                    }
                }
            }
        }

        self.set_state(WorkerState::Exited);
        debug!("{} exited", self.id);
    }

    fn next_assignment(&self) -> Next {
        let slot = lock(&self.signal.slot);
        let (mut slot, _) = self
            .signal
            .wake
            .wait_timeout_while(slot, self.idle_timeout, |s| {
                s.pending.is_none() && s.running
            })
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(descriptor) = slot.pending.take() {
            slot.state = WorkerState::Executing;
            Next::Serve(descriptor)
        } else if !slot.running {
            Next::Stop
        } else {
            Next::IdleExpired
        }
    }

    fn serve(&self, descriptor: SocketDescriptor) {
        let channel = match self.controller.upgrade() {
            Some(controller) => controller.create_socket(descriptor),
            None => return,
        };
        let Some(mut channel) = channel else {
            debug!("{}: no channel for {descriptor}; skipping session", self.id);
            return;
        };
        if !self.signal.can_continue() {
            debug!("{}: interrupted before serving {descriptor}", self.id);
            return;
        }

        trace!("{}: serving {descriptor}", self.id);
        let token: &dyn CancellationToken = self.signal.as_ref();
        let session = panic::catch_unwind(AssertUnwindSafe(|| {
            self.protocol.communicate(channel.as_mut(), token);
        }));
        if session.is_err() {
            error!("{}: protocol panicked while serving {descriptor}", self.id);
        }
    }

    fn set_state(&self, state: WorkerState) {
        lock(&self.signal.slot).state = state;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
