//! Error taxonomy shared by every component.
//!
//! Store helpers speak `anyhow` internally; anything that crosses a component
//! boundary is a [`ServiceError`] so the HTTP layer can pick a status code
//! without string matching.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or missing input, including self-subscription.
    #[error("{0}")]
    Validation(String),

    /// The operation needs a caller identity and none (or an invalid one) was supplied.
    #[error("{0}")]
    Unauthenticated(String),

    /// The caller is known but does not own the subject being mutated.
    #[error("{0}")]
    Forbidden(String),

    /// Missing record, or a record the caller is not allowed to see.
    #[error("{0}")]
    NotFound(String),

    /// A uniqueness constraint could not be reconciled.
    #[error("{0}")]
    Conflict(String),

    /// Unexpected failure talking to the store or the blob storage.
    #[error("{0}")]
    Persistence(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<libsql::Error> for ServiceError {
    fn from(err: libsql::Error) -> Self {
        Self::Persistence(anyhow::Error::new(err))
    }
}

/// Rejects blank text fields, returning the trimmed value.
pub fn require_text(value: Option<&str>, message: &str) -> ServiceResult<String> {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(ServiceError::validation(message)),
    }
}
