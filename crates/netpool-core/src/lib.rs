//! # netpool-core
//!
//! Shared vocabulary for the netpool threaded server: the types a transport
//! adapter, the pool engine and an application protocol all agree on.
//!
//! This crate has no dependencies on OS sockets, threads or logging.  It
//! can be compiled and tested anywhere.
//!
//! # Architecture overview
//!
//! netpool accepts connections on a transport (TCP, TLS over TCP, or a local
//! Unix-domain socket) and hands every connection to a pooled worker thread
//! that runs an injected application protocol.  This crate defines:
//!
//! - **`domain`** – Pool configuration ([`ServerOptions`]), transport
//!   addresses ([`ServerAddress`]) and the [`SocketDescriptor`] that travels
//!   from the accept loop to the worker that eventually serves it.
//!
//! - **`protocol`** – The contract an application protocol implements
//!   ([`Protocol`]), the byte stream it talks over ([`Channel`]) and the
//!   cooperative cancellation token it must poll ([`CancellationToken`]).

pub mod domain;
pub mod protocol;

pub use domain::address::{AddressError, ServerAddress};
pub use domain::descriptor::SocketDescriptor;
pub use domain::options::{OptionsError, ServerOptions, StopMode};
pub use protocol::{
    CancellationToken, Channel, Protocol, DEFAULT_BUSY_MESSAGE, HTTP_BUSY_RESPONSE,
};
