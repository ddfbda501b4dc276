use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Failures surfaced by the session client.
///
/// `Order` is soft at the mirror loop: it is logged where it happens and the
/// cycle moves on to the next fill. Every other variant aborts the remainder
/// of the cycle it occurred in; the loop reports it and retries on the next
/// tick.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("auth exchange rejected: {status} — {body}")]
    Auth { status: StatusCode, body: String },

    #[error("token expiry is neither numeric nor ISO-8601: {0}")]
    BadExpiry(String),

    #[error("{what} fetch failed: {status} — {body}")]
    Fetch {
        what: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("order placement rejected: {status} — {body}")]
    Order { status: StatusCode, body: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}
