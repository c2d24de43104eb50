use {
    crate::{crypto::payload::PayloadError, pairing::uri::ParseError, storage::StorageError},
    relay_rpc::domain::Topic,
};

pub type Result<T> = std::result::Result<T, Error>;

/// Domain-stable error kinds of the core client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed pairing URI.
    #[error("Invalid pairing URI: {0}")]
    InvalidUri(#[from] ParseError),

    /// The keychain, a record store or the subscription registry has no
    /// entry for the given key.
    #[error("No matching key: {0}")]
    NoMatchingKey(String),

    /// The topic reached its expiry. Teardown has already been performed
    /// when this error surfaces.
    #[error("Expired topic: {0}")]
    Expired(Topic),

    /// AEAD tag verification failed while decrypting an envelope.
    #[error("Envelope authentication failed")]
    AuthenticationFailed,

    /// The envelope framing is broken: unknown type byte, short frame, or a
    /// type that does not fit the operation.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The relay endpoint cannot be reached. Retryable.
    #[error("Relay transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Request timed out")]
    Timeout,

    /// The pairing was deleted locally or by the peer.
    #[error("User disconnected")]
    UserDisconnected,

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// Pairing control operations require an activated pairing.
    #[error("Pairing is not active: {0}")]
    PairingInactive(Topic),

    /// Key material that does not decode or has the wrong length.
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Relay client error: {0}")]
    Client(relay_client::ClientError),

    /// The peer answered a request with a JSON RPC error.
    #[error("Peer responded with an error ({code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("Internal error: channel closed")]
    ChannelClosed,
}

impl From<relay_client::ClientError> for Error {
    fn from(err: relay_client::ClientError) -> Self {
        if err.is_unavailable() {
            Self::TransportUnavailable(err.to_string())
        } else {
            Self::Client(err)
        }
    }
}

impl From<PayloadError> for Error {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::Authentication => Self::AuthenticationFailed,
            other => Self::InvalidEnvelope(other.to_string()),
        }
    }
}

impl From<crate::rpc::ParamsError> for Error {
    fn from(err: crate::rpc::ParamsError) -> Self {
        match err {
            crate::rpc::ParamsError::Serde(err) => Self::Serialization(err),
            other => Self::InvalidEnvelope(other.to_string()),
        }
    }
}
