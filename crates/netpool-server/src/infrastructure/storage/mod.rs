//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the TOML file that describes
//! the servers the binary hosts, and falls back to defaults when the file
//! does not exist yet.

pub mod config;
