//! Domain types for netpool.
//!
//! Everything in here is plain data with validation rules.  Nothing opens a
//! socket or spawns a thread; the server crate's infrastructure layer does
//! that and depends on these types, never the other way round.

/// Transport address URIs (`tcp://`, `ssl://`, `local://`).
pub mod address;

/// The opaque handle to a freshly accepted connection.
pub mod descriptor;

/// Worker-pool limits and shutdown modes.
pub mod options;
