//! Error types for command authentication.

use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Request carries no hmac tag")]
    MissingTag,

    #[error("Tag is not {expected} hex digits")]
    BadTagEncoding { expected: usize },

    #[error("Signature mismatch")]
    Mismatch,

    #[error("Shared secret is empty")]
    EmptySecret,

    #[error("Secret rejected as MAC key")]
    InvalidKey,
}
