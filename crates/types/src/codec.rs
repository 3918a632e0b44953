//! Centralized serialization and deserialization functions.
//!
//! This module provides a unified interface for encoding and decoding data
//! using postcard serialization, with consistent error handling via snafu.
//! Versioned records are built on top of the sequential [`write_field`] /
//! [`read_field`] pair, which lets a record encode exactly the field set its
//! format version defines and nothing more.

use serde::{de::DeserializeOwned, Serialize};
use snafu::Snafu;

/// Error type for codec operations.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// Encoding failed.
    #[snafu(display("encoding failed: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Decoding failed.
    #[snafu(display("decoding failed: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// The record envelope was empty.
    #[snafu(display("empty record envelope"))]
    EmptyRecord,

    /// The record carried a version tag this build does not know.
    #[snafu(display("unknown record version tag {tag:#04x}"))]
    UnknownVersion {
        /// The unrecognized tag byte.
        tag: u8,
    },

    /// A primary record carried the extension version, or vice versa.
    #[snafu(display("version tag {tag:#04x} is not valid for this record class"))]
    VersionClass {
        /// The offending tag byte.
        tag: u8,
    },

    /// Bytes remained after the last field defined for the record's version.
    #[snafu(display("record has {count} trailing bytes after the last field"))]
    TrailingBytes {
        /// Number of unconsumed bytes.
        count: usize,
    },

    /// A tagged union carried an unknown variant tag.
    #[snafu(display("unknown {what} tag {tag}"))]
    UnknownTag {
        /// Which union the tag belongs to.
        what: &'static str,
        /// The unrecognized tag.
        tag: u8,
    },
}

/// Encodes a value to bytes using postcard serialization.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|source| CodecError::Encode { source })
}

/// Decodes bytes to a value using postcard deserialization.
///
/// # Errors
///
/// Returns `CodecError::Decode` if deserialization fails.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|source| CodecError::Decode { source })
}

/// Appends one serialized field to `buf`.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn write_field<T: Serialize>(buf: &mut Vec<u8>, value: &T) -> Result<(), CodecError> {
    let bytes = postcard::to_allocvec(value).map_err(|source| CodecError::Encode { source })?;
    buf.extend_from_slice(&bytes);
    Ok(())
}

/// Consumes one serialized field from the front of `bytes`.
///
/// # Errors
///
/// Returns `CodecError::Decode` if deserialization fails.
pub fn read_field<T: DeserializeOwned>(bytes: &mut &[u8]) -> Result<T, CodecError> {
    let (value, rest) =
        postcard::take_from_bytes(*bytes).map_err(|source| CodecError::Decode { source })?;
    *bytes = rest;
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u64,
        name: String,
        data: Vec<u8>,
    }

    #[test]
    fn test_roundtrip_struct() {
        let original = Sample {
            id: 12345,
            name: "replica".to_string(),
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        let bytes = encode(&original).expect("encode");
        let decoded: Sample = decode(&bytes).expect("decode");
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_decode_malformed_input() {
        let malformed = [0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<Sample, _> = decode(&malformed);
        assert!(matches!(result.unwrap_err(), CodecError::Decode { .. }));
    }

    #[test]
    fn test_decode_truncated_data() {
        let bytes = encode(&Sample { id: 1, name: "x".into(), data: vec![1, 2, 3] }).unwrap();
        let result: Result<Sample, _> = decode(&bytes[..2]);
        assert!(result.is_err());
    }

    #[test]
    fn test_sequential_fields_roundtrip() {
        let mut buf = Vec::new();
        write_field(&mut buf, &7u64).unwrap();
        write_field(&mut buf, &"hello".to_string()).unwrap();
        write_field(&mut buf, &Some(3u32)).unwrap();

        let mut rest = buf.as_slice();
        assert_eq!(read_field::<u64>(&mut rest).unwrap(), 7);
        assert_eq!(read_field::<String>(&mut rest).unwrap(), "hello");
        assert_eq!(read_field::<Option<u32>>(&mut rest).unwrap(), Some(3));
        assert!(rest.is_empty());
    }

    #[test]
    fn test_read_field_leaves_remainder() {
        let mut buf = Vec::new();
        write_field(&mut buf, &1u8).unwrap();
        write_field(&mut buf, &2u8).unwrap();

        let mut rest = buf.as_slice();
        let _: u8 = read_field(&mut rest).unwrap();
        assert_eq!(rest.len(), 1);
    }
}
