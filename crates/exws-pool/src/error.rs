//! WebSocket pool error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("No available Websocket connections are ready.")]
    NoConnectionAvailable,

    #[error("Unable to send message — connection is not available.")]
    ConnectionUnavailable,

    #[error("id is required for promise-based sending.")]
    MissingRequestId,

    #[error("Request timeout for id: {0}")]
    RequestTimeout(String),

    #[error("Websocket connection timed out")]
    ConnectTimeout,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type WsResult<T> = Result<T, WsError>;
