//! Document payload encoding.
//!
//! The binary wire uses MessagePack via `rmp-serde`. Structs are always
//! written with `write_named` so each document is a map keyed by field name;
//! readers address fields by name and ignore ones they do not know.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Encoding of document payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    /// MessagePack maps.
    #[default]
    Binary,
    /// JSON objects, handy for debugging captures.
    Json,
}

impl WireType {
    /// Encode `value` into `buf`, replacing its previous content.
    pub fn encode_into<T: Serialize + ?Sized>(self, buf: &mut Vec<u8>, value: &T) -> Result<()> {
        buf.clear();
        match self {
            WireType::Binary => rmp_serde::encode::write_named(buf, value)?,
            WireType::Json => serde_json::to_writer(&mut *buf, value)?,
        }
        Ok(())
    }

    /// Decode a document payload.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        let value = match self {
            WireType::Binary => rmp_serde::from_slice(bytes)?,
            WireType::Json => serde_json::from_slice(bytes)?,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WireError;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
    }

    #[derive(Deserialize, PartialEq, Debug)]
    struct OnlyName {
        name: String,
    }

    #[test]
    fn test_binary_struct_is_a_named_map() {
        let mut buf = Vec::new();
        let value = TestStruct {
            id: 42,
            name: "test".to_string(),
        };
        WireType::Binary.encode_into(&mut buf, &value).unwrap();

        // fixmap with 2 entries, first key "id"
        assert_eq!(buf[0], 0x82);
        assert_eq!(&buf[1..4], &[0xa2, b'i', b'd']);

        let decoded: TestStruct = WireType::Binary.decode(&buf).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_fields_addressed_by_name() {
        let mut buf = Vec::new();
        let value = TestStruct {
            id: 7,
            name: "seven".to_string(),
        };
        for wire_type in [WireType::Binary, WireType::Json] {
            wire_type.encode_into(&mut buf, &value).unwrap();
            let decoded: OnlyName = wire_type.decode(&buf).unwrap();
            assert_eq!(decoded.name, "seven");
        }
    }

    #[test]
    fn test_encode_replaces_previous_content() {
        let mut buf = b"stale".to_vec();
        WireType::Json.encode_into(&mut buf, &1u8).unwrap();
        assert_eq!(buf, b"1");
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<TestStruct> = WireType::Binary.decode(&[0xc1]);
        assert!(matches!(result, Err(WireError::MsgPackDecode(_))));

        let result: Result<TestStruct> = WireType::Json.decode(b"{");
        assert!(matches!(result, Err(WireError::Json(_))));
    }
}
