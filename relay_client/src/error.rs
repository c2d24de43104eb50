use relay_rpc::rpc::ErrorData;
pub use tokio_tungstenite::tungstenite::protocol::CloseFrame;

pub type TransportError = tokio_tungstenite::tungstenite::Error;
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Wrapper around the websocket [`CloseFrame`] providing info about the
/// connection closing reason.
#[derive(Debug, Clone)]
pub struct CloseReason(pub Option<CloseFrame<'static>>);

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(frame) = &self.0 {
            frame.fmt(f)
        } else {
            f.write_str("<close frame unavailable>")
        }
    }
}

/// Errors generated while parsing
/// [`ConnectionOptions`][crate::ConnectionOptions] and creating an HTTP
/// request for the websocket connection.
#[derive(Debug, thiserror::Error)]
pub enum RequestBuildError {
    #[error("Failed to serialize connection query: {0}")]
    Query(#[from] serde_qs::Error),

    #[error("Failed to add request headers")]
    Headers,

    #[error("Failed to create websocket request: {0}")]
    Other(TransportError),
}

/// Possible relay client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to build connection request: {0}")]
    RequestBuilder(#[from] RequestBuildError),

    /// The relay endpoint could not be reached. Covers refused connections,
    /// failed DNS resolution and connect timeouts. Operations failing with
    /// this error may be retried once connectivity recovers.
    #[error("Relay unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to connect: {0}")]
    ConnectionFailed(TransportError),

    #[error("Connection closed: {0}")]
    ConnectionClosed(CloseReason),

    #[error("Failed to close connection: {0}")]
    ClosingFailed(TransportError),

    #[error("Websocket transport error: {0}")]
    Transport(TransportError),

    #[error("Not connected")]
    NotConnected,

    #[error("Internal error: Channel closed")]
    ChannelClosed,

    #[error("Internal error: Duplicate request ID")]
    DuplicateRequestId,

    #[error("Invalid response ID")]
    InvalidResponseId,

    #[error("Serialization failed: {0}")]
    Serialization(serde_json::Error),

    #[error("Deserialization failed: {0}")]
    Deserialization(serde_json::Error),

    #[error("RPC error ({code}): {message}")]
    Rpc { code: i32, message: String },

    #[error("Invalid request type")]
    InvalidRequestType,
}

impl ClientError {
    /// Whether the error indicates an unreachable relay endpoint.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<ErrorData> for ClientError {
    fn from(err: ErrorData) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// Well-known connectivity failures are surfaced as
/// [`ClientError::Unavailable`] so that the upper layers can schedule a
/// reconnect instead of failing hard.
pub(crate) fn is_transport_unavailable(err: &TransportError) -> bool {
    if let TransportError::Io(err) = err {
        if matches!(
            err.kind(),
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::TimedOut
        ) {
            return true;
        }
    }

    // DNS failures surface as opaque IO errors with platform-specific
    // messages (`ENOTFOUND` on some stacks, `failed to lookup address` on
    // others).
    let message = err.to_string();

    message.contains("ECONNREFUSED")
        || message.contains("ENOTFOUND")
        || message.contains("failed to lookup address")
        || message.contains("dns error")
}
