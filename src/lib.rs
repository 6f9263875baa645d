//! Database-backed git object store with a read-only smart-HTTP front end.
//!
//! Content-addressed blob/tree/commit objects, refs, and a derived file
//! index live as rows in SQLite instead of files on disk; the HTTP side
//! speaks just enough of git's smart protocol for a standard client to
//! discover refs and clone.

pub mod config;
pub mod error;
pub mod git;
pub mod protocol;
pub mod repo;
pub mod server;
pub mod storage;

pub use error::{Error, Result};
