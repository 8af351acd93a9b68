//! Socket transports.
//!
//! | Scheme     | Adapter                            | Descriptor             |
//! |------------|------------------------------------|------------------------|
//! | `tcp://`   | [`tcp::TcpTransport`]              | `Network(fd)`          |
//! | `ssl://`   | [`tcp::TcpTransport`] + [`tls`]    | `Network(fd)`          |
//! | `local://` | [`local::LocalTransport`] (Unix)   | `Local(fd)`            |
//!
//! All three share the accept loop and parked-stream table in `accept`.

mod accept;
#[cfg(unix)]
pub mod local;
pub mod tcp;
pub mod tls;

#[cfg(unix)]
pub use local::LocalTransport;
pub use tcp::TcpTransport;
pub use tls::{TlsSettings, BUSY_HANDSHAKE_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT};
