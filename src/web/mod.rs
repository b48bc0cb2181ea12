//! JSON HTTP API over [`crate::engine::ModelingEngine`].

#[cfg(feature = "server")]
mod server;

#[cfg(feature = "server")]
pub use server::*;
