use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;
use crate::Codec;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Human-readable, schema-less structured text encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }

    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::JsonCodec;
    use crate::Codec;

    #[test]
    fn encodes_compact_text() {
        let mut value = BTreeMap::new();
        value.insert("isPaused", true);
        let bytes = JsonCodec.encode(&value).expect("should encode");
        assert_eq!(bytes, br#"{"isPaused":true}"#);
    }

    #[test]
    fn decode_reports_malformed_input() {
        let err = JsonCodec
            .decode::<BTreeMap<String, bool>>(b"{not json")
            .expect_err("malformed json should fail");
        assert!(err.to_string().starts_with("decode error:"));
    }

    #[test]
    fn decode_reports_type_mismatch() {
        let err = JsonCodec
            .decode::<u32>(br#""seven""#)
            .expect_err("string is not a u32");
        assert!(err.to_string().contains("decode error"));
    }
}
