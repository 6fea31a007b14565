//! Error types for keeper-core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in Keeper core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Invalid amount (overflow, underflow, or malformed).
    #[error("invalid amount: {message}")]
    InvalidAmount {
        /// Description of the amount error.
        message: String,
    },

    /// Invalid principal encoding.
    #[error("invalid principal: {message}")]
    InvalidPrincipal {
        /// Description of the principal error.
        message: String,
    },

    /// Malformed identifier encoding.
    #[error("invalid identifier: {message}")]
    InvalidIdentifier {
        /// Description of the encoding error.
        message: String,
    },

    /// Invalid signature.
    #[error("invalid signature")]
    InvalidSignature,
}

impl CoreError {
    /// Create an invalid amount error.
    #[must_use]
    pub fn invalid_amount(message: impl Into<String>) -> Self {
        Self::InvalidAmount {
            message: message.into(),
        }
    }

    /// Create an invalid principal error.
    #[must_use]
    pub fn invalid_principal(message: impl Into<String>) -> Self {
        Self::InvalidPrincipal {
            message: message.into(),
        }
    }

    /// Create an invalid identifier error.
    #[must_use]
    pub fn invalid_identifier(message: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            message: message.into(),
        }
    }
}
