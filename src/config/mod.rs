//! Configuration module for modelforge.
//!
//! Handles source declarations, environment variables, and runtime limits.

mod connection;
mod settings;

pub use connection::{ConnectionError, Driver};
pub use settings::{
    expand_env_vars, AiSettings, LoggingSettings, PoolSettings, QuerySettings, ServerSettings,
    SessionSettings, Settings, SettingsError, SourceSettings, StorageSettings, WorkerSettings,
    MAX_SESSION_TTL_HOURS,
};
