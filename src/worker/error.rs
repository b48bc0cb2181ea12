use std::io;

use thiserror::Error;

use super::protocol::{fault, Fault};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("database worker not found; set worker.path in modelforge.toml")]
    Missing,

    #[error("could not start database worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("database worker pipe failed: {0}")]
    Pipe(#[source] io::Error),

    #[error("malformed worker message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("database worker did not answer within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("database worker exited")]
    Exited,

    /// Could not open a connection to the database.
    #[error("{0}")]
    Connect(String),

    /// Anything else the worker reported; usually the database's own message.
    #[error("{message}")]
    Rejected { code: String, message: String },
}

impl WorkerError {
    /// True when the database never got to see the request.
    pub fn is_unreachable(&self) -> bool {
        !matches!(self, Self::Rejected { .. } | Self::Codec(_))
    }
}

impl From<Fault> for WorkerError {
    fn from(fault: Fault) -> Self {
        match fault.code.as_str() {
            fault::CONNECTION_FAILED | fault::DRIVER_NOT_FOUND => Self::Connect(fault.message),
            fault::EXITED => Self::Exited,
            _ => Self::Rejected {
                code: fault.code,
                message: fault.message,
            },
        }
    }
}
