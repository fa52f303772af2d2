#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("RPC communication failure: {0}")]
    Rpc(#[from] RpcError),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization failure: {0}")]
    Serialization(String),

    #[error("request queue closed before the request was resolved")]
    QueueClosed,
}

/// Failures of a single JSON-RPC exchange.
///
/// Transport-level variants are retried by the connection pool; node
/// reported errors and malformed envelopes are deterministic and are not.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("node returned error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("response id {actual} does not match request id {expected}")]
    IdMismatch { expected: u64, actual: u64 },

    #[error("invalid JSON-RPC response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout | Self::HttpStatus { .. }
        )
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl CoreError {
    /// The node-reported message, if this failure came from an `error`
    /// envelope.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Rpc(RpcError::ServerError { message, .. }) => Some(message),
            _ => None,
        }
    }
}
