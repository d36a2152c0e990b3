//! Error types for the SmartKey core.
//!
//! Three families, matching how they surface: validation errors are
//! returned synchronously and change nothing; transport errors arrive
//! asynchronously and unwind the connection; security errors are always
//! paired with an automatic full security reset before the failure is
//! reported.

use thiserror::Error;

use crate::transport::RadioError;
use crate::types::StatusCode;
use skl_crypto::CryptoError;

/// Synchronous precondition failures. Non-destructive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no token is linked")]
    NoKeyLinked,

    #[error("a token is already linked")]
    AlreadyLinked,

    #[error("another operation is holding the radio channel")]
    Busy,

    #[error("the linked token has not been located")]
    NotLocated,

    #[error("the linked token's firmware is too old")]
    FirmwareOutdated,

    #[error("operation not valid in the current state")]
    WrongState,
}

/// Cryptographic verdicts that destroy the trust relationship.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("challenge response did not match")]
    ResponseMismatch,

    #[error("secure payload failed to decrypt")]
    DecryptFailed,

    #[error("malformed secure response")]
    MalformedResponse,

    #[error("invalid encrypted button event")]
    InvalidButtonEvent,
}

/// Unified error for core operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The token answered with a refusal rather than an error.
    #[error("token rejected the command")]
    Refused,

    #[error("operation timed out")]
    Timeout,
}

impl CoreError {
    /// Map to the caller-visible status vocabulary.
    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::Validation(v) => match v {
                ValidationError::NoKeyLinked => StatusCode::NoKeyLinked,
                ValidationError::AlreadyLinked => StatusCode::AlreadyLinked,
                ValidationError::Busy => StatusCode::Busy,
                ValidationError::NotLocated => StatusCode::NotLocated,
                ValidationError::FirmwareOutdated => StatusCode::FirmwareOutdated,
                ValidationError::WrongState => StatusCode::OperationFailed,
            },
            CoreError::Radio(_)
            | CoreError::Security(_)
            | CoreError::Crypto(_)
            | CoreError::Refused
            | CoreError::Timeout => StatusCode::OperationFailed,
        }
    }

    /// Whether this is one of the verdicts that must trigger the
    /// automatic security reset.
    pub fn is_security(&self) -> bool {
        matches!(self, CoreError::Security(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_their_status() {
        assert_eq!(
            CoreError::from(ValidationError::NoKeyLinked).status(),
            StatusCode::NoKeyLinked
        );
        assert_eq!(
            CoreError::from(ValidationError::AlreadyLinked).status(),
            StatusCode::AlreadyLinked
        );
        assert_eq!(CoreError::from(ValidationError::Busy).status(), StatusCode::Busy);
    }

    #[test]
    fn transport_and_security_errors_collapse_to_operation_failed() {
        assert_eq!(CoreError::from(RadioError::Timeout).status(), StatusCode::OperationFailed);
        assert_eq!(
            CoreError::from(SecurityError::ResponseMismatch).status(),
            StatusCode::OperationFailed
        );
        assert_eq!(CoreError::Timeout.status(), StatusCode::OperationFailed);
    }

    #[test]
    fn only_security_verdicts_are_flagged_destructive() {
        assert!(CoreError::from(SecurityError::DecryptFailed).is_security());
        assert!(!CoreError::Timeout.is_security());
        assert!(!CoreError::from(RadioError::Unreachable).is_security());
    }
}
