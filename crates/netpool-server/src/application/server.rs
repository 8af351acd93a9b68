//! The pool engine.
//!
//! A [`Server`] owns a [`Transport`], a [`Protocol`] and a pool of
//! [`Worker`]s.  The transport's accept loop hands every accepted connection
//! to [`Server::incoming_connection`], which decides, under one mutex, what
//! happens to it:
//!
//! ```text
//!                       ┌── not Running ─────────────► Dropped
//!                       ├── free worker (LIFO) ──────► Reused
//! incoming_connection ──┼── |all| < max_workers ─────► Spawned
//!                       ├── room in pending queue ───► Queued
//!                       └── otherwise ───────────────► Busy (busy message)
//! ```
//!
//! Workers report back through the [`Controller`] trait:
//!
//! - `thread_available` hands the oldest queued connection straight to the
//!   reporting worker, or parks the worker in the free stack.
//! - `thread_finished` retires an idle surplus worker into the finished set.
//!
//! The host drives [`Server::reap_finished_workers`] periodically (the
//! binary does it once per second); that is where retired threads are
//! joined.  A worker never joins itself.
//!
//! # Locking
//!
//! All pool state (worker sets, pending queue, lifecycle state) lives in one
//! [`Mutex<Pool>`].  Anything that can block is done after the guard is
//! released: joining workers, `Transport::stop_listening` (which joins the
//! accept thread) and writing the busy message.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use netpool_core::{
    Channel, OptionsError, Protocol, ServerOptions, SocketDescriptor, StopMode,
    DEFAULT_BUSY_MESSAGE,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::sync::lock;
use crate::application::transport::{
    ConnectionSink, Dispatch, Dispatcher, Transport, TransportError,
};
use crate::application::worker::{Controller, Worker, WorkerId, WorkerProtocol};

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Stopping,
    Running,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Stopped => "stopped",
            ServerState::Stopping => "stopping",
            ServerState::Running => "running",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`Server::new`] and [`Server::start`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// The pool limits are out of range or inconsistent.
    #[error("invalid server options: {0}")]
    Options(#[from] OptionsError),

    /// `start` was called while a `stop` is still in progress.
    #[error("server is stopping")]
    Stopping,

    /// The transport could not listen.  The server stays stopped and may be
    /// started again.
    #[error("failed to start listening: {0}")]
    Listen(#[from] TransportError),
}

/// Point-in-time counts of the pool, for logs, tests and status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub state: ServerState,
    pub all_workers: usize,
    pub free_workers: usize,
    pub finished_workers: usize,
    pub pending_connections: usize,
}

impl PoolSnapshot {
    /// Workers currently serving a connection.
    pub fn busy_workers(&self) -> usize {
        self.all_workers - self.free_workers
    }
}

/// Mutable pool state, guarded by `ServerCore::pool`.
///
/// Invariants while the guard is released:
/// - every id in `free` is a key of `all`;
/// - `all.len() <= max_workers`;
/// - `pending.len() <= max_pending_connections`, with no duplicates;
/// - `finished` and `all` are disjoint.
struct Pool {
    state: ServerState,
    /// Idle workers; the most recently idled is on top.
    free: Vec<WorkerId>,
    all: HashMap<WorkerId, Arc<Worker>>,
    finished: Vec<Arc<Worker>>,
    pending: VecDeque<SocketDescriptor>,
}

impl Pool {
    fn new() -> Self {
        Self {
            state: ServerState::Stopped,
            free: Vec::new(),
            all: HashMap::new(),
            finished: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            state: self.state,
            all_workers: self.all.len(),
            free_workers: self.free.len(),
            finished_workers: self.finished.len(),
            pending_connections: self.pending.len(),
        }
    }
}

/// A threaded network server: one transport, one protocol, one worker pool.
///
/// Dropping a running `Server` stops it with
/// [`StopMode::InterruptClients`].
pub struct Server {
    core: Arc<ServerCore>,
}

struct ServerCore {
    me: Weak<ServerCore>,
    id: Uuid,
    options: ServerOptions,
    busy_message: Vec<u8>,
    protocol: Arc<dyn Protocol>,
    transport: Arc<dyn Transport>,
    pool: Mutex<Pool>,
    next_worker: AtomicU64,
}

impl Server {
    /// Creates a stopped server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Options`] if `options` fail validation.
    pub fn new(
        protocol: Arc<dyn Protocol>,
        transport: Arc<dyn Transport>,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        options.validate()?;

        let busy_message = options
            .busy_message
            .clone()
            .or_else(|| protocol.busy_response())
            .unwrap_or_else(|| DEFAULT_BUSY_MESSAGE.to_vec());

        let core = Arc::new_cyclic(|me| ServerCore {
            me: me.clone(),
            id: Uuid::new_v4(),
            options,
            busy_message,
            protocol,
            transport,
            pool: Mutex::new(Pool::new()),
            next_worker: AtomicU64::new(1),
        });
        debug!(server = %core.id, "server created");
        Ok(Self { core })
    }

    /// Starts the worker floor and the transport.
    ///
    /// Returns `Ok(())` immediately if already running.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Stopping`] while a `stop` is in progress.
    /// - [`ServerError::Listen`] if the transport cannot listen.  Workers
    ///   created for the floor are kept for the next attempt.
    pub fn start(&self) -> Result<(), ServerError> {
        self.core.start()
    }

    /// Stops listening, stops every worker and waits for them.
    ///
    /// Returns `false` if the server was not running.  Connections still in
    /// the pending queue are closed without being served.
    pub fn stop(&self, mode: StopMode) -> bool {
        self.core.stop(mode)
    }

    /// Dispatches one accepted connection.  Never blocks on a worker.
    pub fn incoming_connection(&self, descriptor: SocketDescriptor) -> Dispatch {
        self.core.incoming_connection(descriptor)
    }

    /// Joins and drops every worker that retired since the last call.
    ///
    /// Returns how many were reaped.  Must not be called from a worker
    /// thread.
    pub fn reap_finished_workers(&self) -> usize {
        self.core.reap_finished_workers()
    }

    /// A dispatcher bound to this server, for transports driven by hand.
    pub fn dispatcher(&self) -> Dispatcher {
        self.core.dispatcher()
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn options(&self) -> &ServerOptions {
        &self.core.options
    }

    /// The transport's current address string.
    pub fn address(&self) -> String {
        self.core.transport.server_address()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.core.transport
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    pub fn state(&self) -> ServerState {
        lock(&self.core.pool).state
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        lock(&self.core.pool).snapshot()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.core.stop(StopMode::InterruptClients);
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.core.id)
            .field("address", &self.address())
            .field("pool", &self.snapshot())
            .finish()
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

impl ServerCore {
    fn dispatcher(&self) -> Dispatcher {
        let sink: Weak<dyn ConnectionSink> = self.me.clone();
        Dispatcher::from_weak(sink)
    }

    fn new_worker(&self) -> Arc<Worker> {
        let id = WorkerId(self.next_worker.fetch_add(1, Ordering::Relaxed));
        let controller: Weak<dyn Controller> = self.me.clone();
        Arc::new(Worker::new(
            id,
            WorkerProtocol::for_worker(&self.protocol),
            controller,
            self.options.worker_idle_timeout,
        ))
    }

    fn start(&self) -> Result<(), ServerError> {
        let mut pool = lock(&self.pool);
        match pool.state {
            ServerState::Running => return Ok(()),
            ServerState::Stopping => return Err(ServerError::Stopping),
            ServerState::Stopped => {}
        }

        for stale in pool.pending.drain(..) {
            self.transport.discard_socket(stale);
        }

        let floor = self.options.min_workers as usize;
        while pool.free.len() < floor {
            let worker = self.new_worker();
            pool.free.push(worker.id());
            pool.all.insert(worker.id(), worker);
        }

        // The accept thread only reaches `incoming_connection` after this
        // guard is released, and sees Running by then.
        if let Err(e) = self.transport.start_listening(self.dispatcher()) {
            error!(
                server = %self.id,
                address = %self.transport.server_address(),
                "failed to start listening: {e}"
            );
            return Err(ServerError::Listen(e));
        }

        pool.state = ServerState::Running;
        info!(
            server = %self.id,
            address = %self.transport.server_address(),
            min_workers = self.options.min_workers,
            max_workers = self.options.max_workers,
            "server started"
        );
        Ok(())
    }

    fn stop(&self, mode: StopMode) -> bool {
        {
            let mut pool = lock(&self.pool);
            if pool.state != ServerState::Running {
                return false;
            }
            pool.state = ServerState::Stopping;
        }

        self.transport.stop_listening();

        let workers: Vec<Arc<Worker>> = {
            let pool = lock(&self.pool);
            pool.all
                .values()
                .chain(pool.finished.iter())
                .cloned()
                .collect()
        };
        for worker in &workers {
            worker.stop(mode);
        }
        for worker in &workers {
            worker.join();
        }

        let discarded = {
            let mut pool = lock(&self.pool);
            let pending: Vec<SocketDescriptor> = pool.pending.drain(..).collect();
            pool.free.clear();
            pool.all.clear();
            pool.finished.clear();
            pool.state = ServerState::Stopped;
            pending
        };
        for descriptor in &discarded {
            self.transport.discard_socket(*descriptor);
        }

        info!(
            server = %self.id,
            ?mode,
            workers = workers.len(),
            discarded = discarded.len(),
            "server stopped"
        );
        true
    }

    fn incoming_connection(&self, descriptor: SocketDescriptor) -> Dispatch {
        let outcome = {
            let mut pool = lock(&self.pool);
            self.dispatch_locked(&mut pool, descriptor)
        };

        match outcome {
            Dispatch::Busy => self.server_busy(descriptor),
            Dispatch::Dropped => self.transport.discard_socket(descriptor),
            Dispatch::Reused(_) | Dispatch::Spawned(_) | Dispatch::Queued => {}
        }
        outcome
    }

    fn dispatch_locked(&self, pool: &mut Pool, descriptor: SocketDescriptor) -> Dispatch {
        if pool.state != ServerState::Running {
            debug!(server = %self.id, "dropping {descriptor}: server is {}", pool.state);
            return Dispatch::Dropped;
        }

        if let Some(id) = pool.free.pop() {
            let assigned = pool.all.get(&id).map(|w| w.assign(descriptor));
            return match assigned {
                Some(Ok(())) => Dispatch::Reused(id),
                Some(Err(e)) => {
                    error!(server = %self.id, "{id} could not take {descriptor}: {e}");
                    pool.all.remove(&id);
                    Dispatch::Dropped
                }
                None => {
                    warn!(server = %self.id, "{id} was free but not in the pool");
                    Dispatch::Dropped
                }
            };
        }

        if pool.all.len() < self.options.max_workers as usize {
            let worker = self.new_worker();
            let id = worker.id();
            if let Err(e) = worker.assign(descriptor) {
                error!(server = %self.id, "failed to spawn {id}: {e}");
                return Dispatch::Dropped;
            }
            pool.all.insert(id, worker);
            debug!(server = %self.id, "spawned {id} for {descriptor}");
            return Dispatch::Spawned(id);
        }

        if pool.pending.len() < self.options.max_pending_connections
            && !pool.pending.contains(&descriptor)
        {
            pool.pending.push_back(descriptor);
            debug!(
                server = %self.id,
                pending = pool.pending.len(),
                "queued {descriptor}"
            );
            return Dispatch::Queued;
        }

        Dispatch::Busy
    }

    /// Writes the busy message to `descriptor` and closes it.  Best effort.
    fn server_busy(&self, descriptor: SocketDescriptor) {
        info!(server = %self.id, "server busy, refusing {descriptor}");
        if let Err(e) = self.transport.refuse_socket(descriptor, &self.busy_message) {
            debug!(server = %self.id, "busy message to {descriptor} not delivered: {e}");
        }
    }

    fn reap_finished_workers(&self) -> usize {
        let finished = std::mem::take(&mut lock(&self.pool).finished);
        for worker in &finished {
            worker.join();
        }
        if !finished.is_empty() {
            debug!(server = %self.id, reaped = finished.len(), "reaped idle workers");
        }
        finished.len()
    }
}

impl ConnectionSink for ServerCore {
    fn incoming_connection(&self, descriptor: SocketDescriptor) -> Dispatch {
        ServerCore::incoming_connection(self, descriptor)
    }
}

impl Controller for ServerCore {
    fn thread_available(&self, worker: WorkerId) {
        let mut pool = lock(&self.pool);
        if pool.state != ServerState::Running {
            return;
        }
        let Some(handle) = pool.all.get(&worker).cloned() else {
            return;
        };

        if let Some(descriptor) = pool.pending.pop_front() {
            match handle.assign(descriptor) {
                Ok(()) => debug!(server = %self.id, "{worker} took queued {descriptor}"),
                Err(e) => {
                    error!(server = %self.id, "{worker} could not take {descriptor}: {e}");
                    drop(pool);
                    self.transport.discard_socket(descriptor);
                }
            }
            return;
        }

        pool.free.push(worker);
    }

    fn thread_finished(&self, worker: WorkerId) -> bool {
        let mut pool = lock(&self.pool);
        if pool.state != ServerState::Running
            || pool.all.len() <= self.options.min_workers as usize
        {
            return false;
        }
        let Some(position) = pool.free.iter().position(|id| *id == worker) else {
            // Assigned since its wait timed out; the next wait picks it up.
            return false;
        };

        pool.free.remove(position);
        if let Some(handle) = pool.all.remove(&worker) {
            pool.finished.push(handle);
        }
        debug!(server = %self.id, "{worker} retired; {} left", pool.all.len());
        true
    }

    fn create_socket(&self, descriptor: SocketDescriptor) -> Option<Box<dyn Channel>> {
        self.transport.create_socket(descriptor)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
