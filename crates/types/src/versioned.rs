//! Versioned on-disk record envelope.
//!
//! Every durable metadata record is stored as `[version tag: u8][fields...]`.
//! The tag names the format version the fields were written under; decoding
//! dispatches on it, so one build can read every version from the oldest
//! still-deployed format up to the current one.
//!
//! One tag ([`Version::Ext`]) is reserved exclusively for extension side
//! records: auxiliary records that carry fields the primary encodings omit
//! for backward compatibility. Deployments that predate the extension
//! concept never read `*_ext` keys, so they never see the tag.

use crate::codec::CodecError;

/// On-disk format version of a metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    /// Initial on-disk schema.
    V1,
    /// Added the durability mode to the table configuration.
    V2,
    /// Extension side records only. Never used for primary records.
    Ext,
}

impl Version {
    /// The version newly written primary records carry.
    pub const LATEST: Version = Version::V2;

    /// The envelope tag byte for this version.
    pub const fn tag(self) -> u8 {
        match self {
            Version::V1 => 1,
            Version::V2 => 2,
            Version::Ext => 0x7f,
        }
    }

    /// Resolves a tag byte back to a version, if recognized.
    pub const fn from_tag(tag: u8) -> Option<Version> {
        match tag {
            1 => Some(Version::V1),
            2 => Some(Version::V2),
            0x7f => Some(Version::Ext),
            _ => None,
        }
    }

    /// Whether this is the extension-record version.
    pub const fn is_extension(self) -> bool {
        matches!(self, Version::Ext)
    }
}

/// A record whose field set depends on the format version.
///
/// `encode_fields` writes exactly the fields defined at `version` — fields
/// introduced later are omitted entirely (zero bytes, not an absence flag).
/// `decode_fields` reads that same field set and substitutes each type's
/// default for fields the version does not define. Each implementation keeps
/// its per-version dispatch in a single `match` so the one-field-set-per-
/// version correctness check stays visible in one place.
pub trait VersionedRecord: Sized {
    /// Appends the fields defined at `version` to `buf`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if a field fails to serialize or `version`
    /// is not valid for this record class.
    fn encode_fields(&self, version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Reads the fields defined at `version` from the front of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if a field fails to deserialize or `version`
    /// is not valid for this record class.
    fn decode_fields(version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError>;
}

/// Encodes a record under the given version, envelope tag included.
///
/// # Errors
///
/// Returns a [`CodecError`] if a field fails to serialize.
pub fn encode_record<R: VersionedRecord>(
    record: &R,
    version: Version,
) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(64);
    buf.push(version.tag());
    record.encode_fields(version, &mut buf)?;
    Ok(buf)
}

fn split_version(bytes: &[u8]) -> Result<(Version, &[u8]), CodecError> {
    let (&tag, rest) = bytes.split_first().ok_or(CodecError::EmptyRecord)?;
    let version = Version::from_tag(tag).ok_or(CodecError::UnknownVersion { tag })?;
    Ok((version, rest))
}

/// Decodes a primary record, dispatching on its stored version tag.
///
/// # Errors
///
/// Returns a [`CodecError`] for an empty envelope, an unknown tag, the
/// extension tag, a field decode failure, or trailing bytes.
pub fn decode_primary<R: VersionedRecord>(bytes: &[u8]) -> Result<R, CodecError> {
    let (version, mut rest) = split_version(bytes)?;
    if version.is_extension() {
        return Err(CodecError::VersionClass { tag: version.tag() });
    }
    let record = R::decode_fields(version, &mut rest)?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes { count: rest.len() });
    }
    Ok(record)
}

/// Decodes an extension side record, which must carry the extension tag.
///
/// # Errors
///
/// Returns a [`CodecError`] for an empty envelope, an unknown tag, a
/// non-extension tag, a field decode failure, or trailing bytes.
pub fn decode_extension<R: VersionedRecord>(bytes: &[u8]) -> Result<R, CodecError> {
    let (version, mut rest) = split_version(bytes)?;
    if !version.is_extension() {
        return Err(CodecError::VersionClass { tag: version.tag() });
    }
    let record = R::decode_fields(version, &mut rest)?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes { count: rest.len() });
    }
    Ok(record)
}
