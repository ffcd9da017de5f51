//! Error types for the visualization client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Config: {0}")]
    Config(String),

    /// Terminal: the session gave up reconnecting.
    #[error("reconnect attempts exhausted after {attempts} failures")]
    ReconnectExhausted { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, ClientError>;
