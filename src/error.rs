use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed status payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("logging initialization failed: {0}")]
    Logging(String),
}
