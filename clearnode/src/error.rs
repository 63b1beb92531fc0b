use primitives::rpc::ErrorKind;
use thiserror::Error;
use tokio_postgres::error::SqlState;

use crate::db::PoolError;

/// Failure of an RPC handler or reconciler step. Every variant maps onto one
/// of the wire error kinds; the detail strings stay in the logs.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("connection is not authenticated")]
    Unauthenticated,
    #[error("signature does not recover the required address")]
    InvalidSignature,
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("quorum not met: {reached} of {required}")]
    QuorumNotMet { reached: i64, required: u64 },
    #[error("allocation mismatch: {0}")]
    AllocationMismatch(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("channel must be resized before closing")]
    ResizeFirst,
    #[error("postgres: {0}")]
    Db(#[from] tokio_postgres::Error),
    #[error("internal: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Malformed(_) => ErrorKind::FailsMalformed,
            HandlerError::Unauthenticated => ErrorKind::FailsUnauthenticated,
            HandlerError::InvalidSignature => ErrorKind::FailsInvalidSignature,
            HandlerError::MissingParameter(_) => ErrorKind::FailsMissingParameter,
            HandlerError::InsufficientFunds => ErrorKind::FailsInsufficientFunds,
            HandlerError::QuorumNotMet { .. } => ErrorKind::FailsQuorumNotMet,
            HandlerError::AllocationMismatch(_) => ErrorKind::FailsAllocationMismatch,
            HandlerError::NotFound(_) => ErrorKind::FailsNotFound,
            HandlerError::Conflict(_) => ErrorKind::FailsConflict,
            HandlerError::ResizeFirst => ErrorKind::FailsResizeFirst,
            HandlerError::Db(_) | HandlerError::Internal(_) => ErrorKind::FailsInternal,
        }
    }

    /// Whether the failure came from a store serialization conflict that a
    /// fresh transaction attempt can resolve.
    pub fn is_serialization_failure(&self) -> bool {
        match self {
            HandlerError::Db(error) => matches!(
                error.code(),
                Some(&SqlState::T_R_SERIALIZATION_FAILURE) | Some(&SqlState::T_R_DEADLOCK_DETECTED)
            ),
            _ => false,
        }
    }
}

impl From<PoolError> for HandlerError {
    fn from(error: PoolError) -> Self {
        HandlerError::Internal(error.to_string())
    }
}

impl From<adapter::Error> for HandlerError {
    fn from(error: adapter::Error) -> Self {
        HandlerError::Internal(error.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        let detail = error.to_string();

        // serde reports absent required keys as "missing field"
        if detail.contains("missing field") {
            HandlerError::MissingParameter(detail)
        } else {
            HandlerError::Malformed(detail)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_variant_maps_to_its_wire_kind() {
        assert_eq!(
            ErrorKind::FailsQuorumNotMet,
            HandlerError::QuorumNotMet {
                reached: 1,
                required: 2
            }
            .kind()
        );
        assert_eq!(
            ErrorKind::FailsInsufficientFunds,
            HandlerError::InsufficientFunds.kind()
        );
        assert_eq!(ErrorKind::FailsResizeFirst, HandlerError::ResizeFirst.kind());
        assert_eq!(
            ErrorKind::FailsInternal,
            HandlerError::Internal("x".into()).kind()
        );
        assert_eq!(
            "fails-allocation-mismatch",
            HandlerError::AllocationMismatch("x".into())
                .kind()
                .to_string()
        );
    }

    #[test]
    fn only_store_conflicts_are_retryable() {
        assert!(!HandlerError::InsufficientFunds.is_serialization_failure());
        assert!(!HandlerError::Internal("broken pipe".into()).is_serialization_failure());
    }
}
