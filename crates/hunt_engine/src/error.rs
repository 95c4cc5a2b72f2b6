use thiserror::Error;

use crate::geo::CoordinateError;
use crate::model::RecordId;

/// Failure talking to a remote collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("remote rejected request: {0}")]
    Rejected(String),
    #[error("record {0} not found")]
    NotFound(RecordId),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// Input rejected locally before any remote call is made.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("label must not be empty")]
    EmptyLabel,
    #[error("radius {radius_m} m outside [{min_m}, {max_m}]")]
    RadiusOutOfRange { radius_m: f64, min_m: f64, max_m: f64 },
    #[error(transparent)]
    Coordinate(#[from] CoordinateError),
    #[error("no pending point to save")]
    NoPendingPoint,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("record {0} is not in the synchronized list")]
    UnknownRecord(RecordId),
}
