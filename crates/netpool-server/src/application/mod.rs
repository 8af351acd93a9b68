//! Application layer of the netpool server.
//!
//! # Sub-modules
//!
//! - **`server`**    – The pool engine: accept→dispatch decisions, the
//!   pending queue, busy responses, lifecycle and the finished-worker sweep.
//!
//! - **`worker`**    – One pooled OS thread that waits for, and serves, one
//!   connection at a time.  Talks back to the engine only through the
//!   [`worker::Controller`] trait.
//!
//! - **`transport`** – The port a transport adapter implements, plus the
//!   [`transport::Dispatcher`] handle its accept loop calls into.
//!
//! - **`registry`**  – Name → server directory with a default server.
//!
//! - **`echo`**      – A reentrant echo protocol used by the binary and tests.
//!
//! This layer depends on `netpool_core` and `std` only; it never opens a
//! socket itself.

pub mod echo;
pub mod registry;
pub mod server;
pub mod transport;
pub mod worker;

pub(crate) mod sync;
