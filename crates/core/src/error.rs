//! Errors raised while constructing or changing identity values.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// A value or state change was rejected before touching storage.
///
/// Every variant surfaces to callers as a validation failure; lookups and
/// uniqueness are the store's concern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input: short names, bad emails, unknown permission keys.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A state change would break a standing rule, e.g. a principal with no roles.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier string did not parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation(msg) | Self::InvariantViolation(msg) | Self::InvalidId(msg) => msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_the_bare_reason() {
        let err = DomainError::invariant("principal must hold at least one role");
        assert_eq!(err.message(), "principal must hold at least one role");
        assert_eq!(err.to_string(), "invariant violated: principal must hold at least one role");
    }
}
