// Errors raised by the in-process identity service.
// The `Auth` handle never translates these; callers see them as raised.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Popup closed by user before sign-in completed")]
    PopupClosed,

    #[error("Popup blocked by the environment")]
    PopupBlocked,

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Invalid popup request: {0}")]
    InvalidRequest(String),

    #[error("Internal authentication error: {0}")]
    Internal(String),
}
