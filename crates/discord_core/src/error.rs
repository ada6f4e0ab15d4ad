use thiserror::Error;

/// Errors raised while obtaining or tearing down a client session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The credential is empty or otherwise unusable.
    #[error("invalid credential")]
    InvalidCredential,

    /// The SDK could not log in with the credential.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The SDK failed to shut the session down.
    #[error("disconnect failed: {0}")]
    Disconnect(String),
}

/// A correlation key that is unknown or has already expired.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no entry for key '{key}', it may have expired")]
pub struct CorrelationMiss {
    pub key: String,
}

/// Errors from the snapshot encoder/decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// NaN and the infinities have no JSON representation.
    #[error("number {0} cannot be represented in JSON")]
    NonFiniteNumber(String),

    /// A `$ref` marker points at a container that was never emitted.
    #[error("reference to unknown container #{0}")]
    InvalidReference(u64),

    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> SerializationError {
        SerializationError::Malformed(err.to_string())
    }
}

/// Errors raised when binding a client grant to a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrantError {
    #[error("message id missing; cannot bind a client deterministically")]
    MissingMessageId,

    #[error("message already carries a client grant; refusing to overwrite it")]
    AlreadyBound,

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
