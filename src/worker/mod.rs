//! Client for the out-of-process database worker.
//!
//! Non-SQLite sources are reached through a separate worker binary that
//! owns the vendor drivers and connection pools. It reads NDJSON calls on
//! stdin and writes replies on stdout.

mod client;
mod error;
pub mod protocol;

pub use client::WorkerClient;
pub use error::{WorkerError, WorkerResult};
