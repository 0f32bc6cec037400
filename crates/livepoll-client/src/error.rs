use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
    /// The server refused the event.
    #[error("{message} ({code})")]
    Rejected { code: String, message: String },
}

impl ClientError {
    /// Wire code of a rejected event, e.g. `DUPLICATE_ANSWER`.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}
