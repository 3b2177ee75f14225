use segment_assignment::AssignmentError;
use thiserror::Error;

/// Failures talking to or decoding from the assignment store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Assignment(#[from] AssignmentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("assignment of table {table} still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { table: String, attempts: usize },
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(e.into())
    }
}

impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        Self::Store(e.into())
    }
}

impl Error {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::Store(StoreError::InvalidState(msg.into()))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
