//! Adapters that live inside the domain crate for convenience.
//!
//! The in-memory repository backs unit tests, the CLI and the api-server's
//! `memory` storage mode. Durable adapters (SQLite, Redis) live in separate
//! crates.

pub mod memory_repo;
