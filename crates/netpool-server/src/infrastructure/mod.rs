//! Infrastructure layer of the netpool server.
//!
//! Contains OS-facing adapters: the TCP, TLS and Unix-socket transports,
//! the TOML configuration file, and the `launch` helpers that turn an
//! address URI into a started, registered server.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `netpool_core`, but MUST NOT be imported by the `application` layer.

pub mod launch;
pub mod storage;
pub mod transport;
