use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Every way a round trip to ComfyUI can fail.
///
/// Nothing here is retried by this crate; callers decide what to do with
/// each kind.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIError {
    /// Backend address unset; no request was attempted.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connect, DNS, TLS or socket failure, including the server hanging
    /// up mid-stream.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        /// Underlying I/O, HTTP or WebSocket error, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// ComfyUI answered with a non-2xx status.
    #[error("ComfyUI API error ({status}): {body}")]
    Backend {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A response or frame did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The prompt did not finish within the stream budget.
    #[error("Timed out after {0:?} waiting for images")]
    Timeout(Duration),

    /// ComfyUI reported an exception while executing the prompt.
    #[error("Execution failed in node {node_id}: {message}")]
    Execution { node_id: String, message: String },
}

impl ComfyUIError {
    /// Transport failure with no underlying error, such as the server
    /// hanging up mid-stream.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Transport failure caused by `source`.
    pub fn transport_from(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<reqwest::Error> for ComfyUIError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Protocol(format!("Malformed response body: {e}"))
        } else {
            Self::transport_from("HTTP request failed", e)
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ComfyUIError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::transport_from("WebSocket error", e)
    }
}
