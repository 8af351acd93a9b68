//! netpool-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # Layers
//!
//! - **`application`** – The pool engine ([`application::server::Server`]),
//!   its worker threads, the [`application::transport::Transport`] port that
//!   adapters implement, and the named-server registry.  No socket is opened
//!   in this layer.
//! - **`infrastructure`** – TCP, TLS and Unix-socket transports, the TOML
//!   configuration file, and `launch` helpers that turn an address string
//!   into a started server.

pub mod application;
pub mod infrastructure;
