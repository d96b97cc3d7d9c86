//! Error taxonomy shared by the stream client, the one-shot API and the dispatcher.

use thiserror::Error;

pub const UNKNOWN_ERROR: &str = "Unknown error occurred";

#[derive(Debug, Error)]
pub enum ApiError {
    /// No bearer credential; raised before any network call.
    #[error("not authenticated")]
    Unauthenticated,

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status. `message` is the body's `message` field.
    #[error("http {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Http { status: u16, message: Option<String> },

    #[error("malformed payload: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Text shown to the operator: the server's own message when it sent one,
    /// else this error's description, else a fixed fallback.
    pub fn user_message(&self) -> String {
        if let ApiError::Http {
            message: Some(m), ..
        } = self
        {
            if !m.trim().is_empty() {
                return m.clone();
            }
        }
        let generic = self.to_string();
        if generic.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            generic
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, ApiError::Unauthenticated)
            || matches!(self, ApiError::Http { status: 401, .. })
    }
}
