use reqwest::StatusCode;

/// Message used when a failed response carries no readable `detail`.
pub const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

/// Errors returned by [`ApiClient`](super::ApiClient) calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response (connect refused, timeout, ...).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    /// The response body did not match the expected shape.
    #[error("unexpected response from {url}: {detail}")]
    Decode { url: String, detail: String },
}

impl ApiError {
    /// Build a status error from a failed response body.
    ///
    /// The message is the body's string `detail` field. Absent, empty or
    /// non-string details (validation error lists) fall back to
    /// [`DEFAULT_ERROR_MESSAGE`].
    pub fn from_body(status: StatusCode, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());
        ApiError::Status { status, message }
    }

    /// HTTP status, when the server responded.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the server rejected our credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Short text suitable for showing to a user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Transport { source, .. } if source.is_connect() => {
                "Could not reach the monitoring server".to_string()
            }
            ApiError::Transport { source, .. } if source.is_timeout() => {
                "The monitoring server did not respond in time".to_string()
            }
            ApiError::Transport { .. } => "Failed to fetch".to_string(),
            ApiError::Status { message, .. } => message.clone(),
            ApiError::Decode { .. } => DEFAULT_ERROR_MESSAGE.to_string(),
        }
    }
}
