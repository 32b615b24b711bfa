//! Shared building blocks for the kestrel sharding middleware: the error
//! taxonomy, scalar values and rows exchanged with backends, and the TOML
//! configuration that describes sharding and read/write splitting rules.

pub mod config;
pub mod datum;
pub mod error;
pub mod types;
