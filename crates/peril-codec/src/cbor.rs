use std::io::Cursor;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;
use crate::Codec;

pub const CONTENT_TYPE_CBOR: &str = "application/cbor";

/// Compact, self-describing binary encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_CBOR
    }

    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(value, &mut bytes)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes exactly one CBOR item; trailing bytes are rejected.
    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        let mut cursor = Cursor::new(bytes);
        let value: T = ciborium::de::from_reader(&mut cursor)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        if cursor.position() as usize != bytes.len() {
            return Err(CodecError::Decode("trailing bytes after cbor item".into()));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::CborCodec;
    use crate::Codec;

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = CborCodec.encode(&42_u32).expect("should encode");
        bytes.push(0x00);
        let err = CborCodec
            .decode::<u32>(&bytes)
            .expect_err("trailing byte should fail");
        assert!(err.to_string().contains("trailing bytes"));
    }

    #[test]
    fn decode_rejects_empty_input() {
        assert!(CborCodec.decode::<String>(&[]).is_err());
    }

    #[test]
    fn binary_is_more_compact_than_text_for_numbers() {
        let values: Vec<u64> = (0..64).collect();
        let cbor = CborCodec.encode(&values).expect("should encode");
        let json = crate::JsonCodec.encode(&values).expect("should encode");
        assert!(cbor.len() < json.len());
    }
}
