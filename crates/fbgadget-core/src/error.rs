//! Engine error taxonomy.
//!
//! The `Display` text of [`FastbootError`] is exactly the reason carried in
//! the `FAIL` response, so a handler error maps onto the wire one-to-one.

use thiserror::Error;

use crate::backend::BackendError;
use crate::protocol::ResponseError;
use crate::staging::StagingError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FastbootError {
    /// Malformed, incomplete or overflowing command.
    #[error("{0}")]
    Protocol(String),

    #[error("unknown command")]
    UnknownCommand,

    #[error("Variable not implemented")]
    UnknownVariable,

    #[error("data invalid size")]
    InvalidTransferSize,

    #[error("data too large")]
    TransferTooLarge,

    /// Data phase aborted by a non-zero transfer status.
    #[error("data transfer failed ({0})")]
    TransferFailed(i32),

    /// The capability behind the command is not configured.
    #[error("{0}")]
    BackendUnavailable(&'static str),

    /// A collaborator reported an error.
    #[error("{0}")]
    BackendFailure(String),

    /// Device policy refuses the request.
    #[error("{0}")]
    Refused(String),

    #[error("not implemented")]
    UnsupportedOperation,

    #[error("response too long")]
    ResponseOverflow,

    #[error("staging buffer: {0}")]
    Staging(#[from] StagingError),
}

impl FastbootError {
    pub fn protocol(message: impl Into<String>) -> Self {
        FastbootError::Protocol(message.into())
    }

    pub fn refused(message: impl Into<String>) -> Self {
        FastbootError::Refused(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        FastbootError::BackendFailure(message.into())
    }
}

impl From<BackendError> for FastbootError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unsupported => FastbootError::UnsupportedOperation,
            BackendError::Failed(message) => FastbootError::BackendFailure(message),
        }
    }
}

impl From<ResponseError> for FastbootError {
    fn from(_: ResponseError) -> Self {
        FastbootError::ResponseOverflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_reasons() {
        assert_eq!(FastbootError::UnknownCommand.to_string(), "unknown command");
        assert_eq!(
            FastbootError::UnknownVariable.to_string(),
            "Variable not implemented"
        );
        assert_eq!(
            FastbootError::InvalidTransferSize.to_string(),
            "data invalid size"
        );
        assert_eq!(FastbootError::TransferTooLarge.to_string(), "data too large");
        assert_eq!(
            FastbootError::UnsupportedOperation.to_string(),
            "not implemented"
        );
        assert_eq!(
            FastbootError::BackendUnavailable("no flash device defined").to_string(),
            "no flash device defined"
        );
    }

    #[test]
    fn test_backend_error_mapping() {
        assert_eq!(
            FastbootError::from(BackendError::Unsupported),
            FastbootError::UnsupportedOperation
        );
        assert_eq!(
            FastbootError::from(BackendError::failed("write error")).to_string(),
            "write error"
        );
    }
}
