//! Error types for the assistant bridge.
//!
//! Each external seam has its own error enum. None of them escape
//! [`RunPoller::process_query`](crate::poller::RunPoller::process_query):
//! dispatch failures become error results sent back to the assistant, and
//! service failures end the query with an empty response.

use serde_json::Value;
use shared_types::error_result;
use std::path::PathBuf;
use thiserror::Error;

/// Failure talking to the hosted assistant service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure (connect, TLS, timeout)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Service answered with a non-success status
    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure loading, refreshing or obtaining an OAuth credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid credential file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Token endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("Failed to read OAuth client secret at {path}: {reason}")]
    ClientSecret { path: PathBuf, reason: String },

    #[error("Credential has no refresh token")]
    NoRefreshToken,

    #[error("Authorization was not completed: {0}")]
    AuthorizationAborted(String),

    #[error("Token lifetime of {0} seconds is out of range")]
    InvalidLifetime(i64),
}

/// Failure inside a provider action (Gmail or Calendar).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{call} failed: {message}")]
    Google { call: &'static str, message: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Failed to build HTTPS client: {0}")]
    Connector(String),

    #[error("Event window of {0} days is out of range")]
    EventWindow(i64),
}

impl ProviderError {
    pub fn google(call: &'static str, err: impl std::fmt::Display) -> Self {
        ProviderError::Google {
            call,
            message: err.to_string(),
        }
    }
}

/// Why an action could not produce a provider result.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Function not recognized")]
    ActionNotRecognized(String),

    #[error("Failed to obtain valid access token after waiting.")]
    CredentialUnavailable,

    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid email address")]
    InvalidEmail(String),

    #[error("{0}")]
    ProviderCallFailed(#[from] ProviderError),
}

impl DispatchError {
    /// Render as the `{status: "error", message}` record sent to the assistant.
    pub fn into_result(self) -> Value {
        error_result(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_results() {
        assert_eq!(
            DispatchError::ActionNotRecognized("nope".into()).into_result(),
            serde_json::json!({"status": "error", "message": "Function not recognized"})
        );
        assert_eq!(
            DispatchError::MissingArgument("draft_id").into_result()["message"],
            "Missing required argument: draft_id"
        );
        assert_eq!(
            DispatchError::InvalidEmail("x".into()).into_result()["message"],
            "Invalid email address"
        );
    }

    #[test]
    fn test_provider_failure_keeps_message() {
        let err = DispatchError::from(ProviderError::google("drafts.send", "404 Not Found"));
        assert_eq!(
            err.into_result()["message"],
            "drafts.send failed: 404 Not Found"
        );
    }
}
