//! Peril payload codecs.
//!
//! A [`Codec`] turns a serde value into message bytes and back. Two encodings
//! ship here: JSON for event-style messages and CBOR for records that carry
//! exact-precision fields.

pub mod cbor;
pub mod error;
pub mod json;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use cbor::{CborCodec, CONTENT_TYPE_CBOR};
pub use error::CodecError;
pub use json::{JsonCodec, CONTENT_TYPE_JSON};

/// Encoding strategy injected into publishers and consumption loops.
pub trait Codec: Send + Sync + 'static {
    /// MIME type stamped on published messages.
    fn content_type(&self) -> &'static str;

    /// Encodes `value` into message body bytes.
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized;

    /// Decodes a message body. Malformed input is an error, never a panic.
    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned;
}
