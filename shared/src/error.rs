use serde::{Deserialize, Serialize};

/// Failure of a single call against the remote table store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum StoreError {
    /// The row does not exist, usually because another client deleted it first.
    #[error("row {0} not found")]
    NotFound(u64),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("request timed out")]
    TimedOut,
    #[error("malformed payload: {0}")]
    Codec(String),
}

impl StoreError {
    /// Lost delete/update races surface as `NotFound` and are safe to ignore.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}
