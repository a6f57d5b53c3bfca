use thiserror::Error;

/// Errors returned by payload codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Value could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),
    /// Bytes could not be deserialized into the requested type.
    #[error("decode error: {0}")]
    Decode(String),
}
