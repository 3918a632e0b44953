//! Durable record shapes for a table's raft state, and the helpers that
//! move them through the metadata store.
//!
//! Primary records are written at [`Version::LATEST`]; extension side
//! records at [`Version::Ext`]. Reading tolerates every supported version.
//! A record that is missing where one must exist, or that fails to decode,
//! is fatal: durable metadata is defined never to be malformed absent a bug
//! or disk corruption, so there is nothing to recover to.

use snafu::ResultExt;

use tabledb_store::{ReadTxn, WriteTxn};
use tabledb_types::codec::{read_field, write_field, CodecError};
use tabledb_types::config::{ClusterConfig, TableRaftState, UserData};
use tabledb_types::versioned::{
    decode_extension, decode_primary, encode_record, Version, VersionedRecord,
};
use tabledb_types::{LogIndex, MemberId, Term};

use crate::error::{EncodeRecordSnafu, Result};
use crate::log::PersistentState;

/// The header record: the three fields mutated independently of the log.
/// Always rewritten in full, never field-at-a-time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredHeader {
    /// Latest term this member has seen.
    pub current_term: Term,
    /// Who this member voted for in `current_term`, if anyone.
    pub voted_for: Option<MemberId>,
    /// Index of the newest entry known to be committed.
    pub commit_index: LogIndex,
}

impl StoredHeader {
    pub(crate) fn from_state(state: &PersistentState) -> Self {
        Self {
            current_term: state.current_term,
            voted_for: state.voted_for,
            commit_index: state.commit_index,
        }
    }
}

impl VersionedRecord for StoredHeader {
    fn encode_fields(&self, _version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        write_field(buf, &self.current_term)?;
        write_field(buf, &self.voted_for)?;
        write_field(buf, &self.commit_index)
    }

    fn decode_fields(_version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let current_term = read_field(bytes)?;
        let voted_for = read_field(bytes)?;
        let commit_index = read_field(bytes)?;
        Ok(Self { current_term, voted_for, commit_index })
    }
}

/// The snapshot record: compacted state, cluster config, and the log's
/// compaction boundary. The boundary is stored here rather than in its own
/// record because snapshot and boundary always change together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    /// State machine state as of `prev_index`.
    pub state: TableRaftState,
    /// Cluster configuration as of `prev_index`.
    pub config: ClusterConfig,
    /// Index of the last compacted entry.
    pub prev_index: LogIndex,
    /// Term of the last compacted entry.
    pub prev_term: Term,
}

impl VersionedRecord for StoredSnapshot {
    fn encode_fields(&self, version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.state.encode_fields(version, buf)?;
        write_field(buf, &self.config)?;
        write_field(buf, &self.prev_index)?;
        write_field(buf, &self.prev_term)
    }

    fn decode_fields(version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let state = TableRaftState::decode_fields(version, bytes)?;
        let config = read_field(bytes)?;
        let prev_index = read_field(bytes)?;
        let prev_term = read_field(bytes)?;
        Ok(Self { state, config, prev_index, prev_term })
    }
}

/// The snapshot's extension side record: the user-data payload the primary
/// snapshot encoding omits, tagged with the compaction boundary it belongs
/// to. On load the payload is accepted only if the embedded boundary equals
/// the primary snapshot's; otherwise the default is substituted, so a stale
/// extension can never attach to a snapshot that has since moved on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedUserData {
    /// Term component of the owning snapshot's boundary.
    pub prev_term: Term,
    /// Index component of the owning snapshot's boundary.
    pub prev_index: LogIndex,
    /// The payload.
    pub user_data: UserData,
}

impl VersionedRecord for VersionedUserData {
    fn encode_fields(&self, version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        if !version.is_extension() {
            return Err(CodecError::VersionClass { tag: version.tag() });
        }
        write_field(buf, &self.prev_term)?;
        write_field(buf, &self.prev_index)?;
        self.user_data.encode_fields(version, buf)
    }

    fn decode_fields(version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError> {
        if !version.is_extension() {
            return Err(CodecError::VersionClass { tag: version.tag() });
        }
        let prev_term = read_field(bytes)?;
        let prev_index = read_field(bytes)?;
        let user_data = UserData::decode_fields(version, bytes)?;
        Ok(Self { prev_term, prev_index, user_data })
    }
}

/// Encodes and writes a primary record at the current version.
pub(crate) fn write_record<R: VersionedRecord>(
    txn: &mut WriteTxn,
    key: &str,
    record: &R,
) -> Result<()> {
    let bytes = encode_record(record, Version::LATEST).context(EncodeRecordSnafu { key })?;
    txn.write(key, &bytes)?;
    Ok(())
}

/// Encodes and writes an extension side record.
pub(crate) fn write_extension_record<R: VersionedRecord>(
    txn: &mut WriteTxn,
    key: &str,
    record: &R,
) -> Result<()> {
    let bytes = encode_record(record, Version::Ext).context(EncodeRecordSnafu { key })?;
    txn.write(key, &bytes)?;
    Ok(())
}

/// Decodes a primary record read from `key`.
///
/// # Panics
///
/// Panics if the bytes do not decode — corrupt metadata is fatal.
pub(crate) fn must_decode_primary<R: VersionedRecord>(bytes: &[u8], key: &str) -> R {
    decode_primary(bytes)
        .unwrap_or_else(|err| panic!("corrupt metadata record at key {key}: {err}"))
}

/// Reads and decodes the primary record at `key`.
///
/// # Panics
///
/// Panics if the record is absent or corrupt — both are fatal on paths
/// where the record must exist.
pub(crate) fn read_record<R: VersionedRecord>(txn: &ReadTxn, key: &str) -> Result<R> {
    let bytes = txn
        .read(key)?
        .unwrap_or_else(|| panic!("missing metadata record at key {key}"));
    Ok(must_decode_primary(&bytes, key))
}

/// Reads and decodes the extension side record at `key`, if present.
///
/// # Panics
///
/// Panics if a present record is corrupt.
pub(crate) fn read_extension_record<R: VersionedRecord>(
    txn: &ReadTxn,
    key: &str,
) -> Result<Option<R>> {
    match txn.read(key)? {
        None => Ok(None),
        Some(bytes) => Ok(Some(decode_extension(&bytes).unwrap_or_else(|err| {
            panic!("corrupt extension record at key {key}: {err}")
        }))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tabledb_types::versioned::decode_primary;

    #[test]
    fn test_header_roundtrip() {
        let header = StoredHeader {
            current_term: 8,
            voted_for: Some(MemberId::random()),
            commit_index: 21,
        };
        let bytes = encode_record(&header, Version::LATEST).unwrap();
        let decoded: StoredHeader = decode_primary(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_roundtrip_without_vote() {
        let header = StoredHeader { current_term: 0, voted_for: None, commit_index: 0 };
        let bytes = encode_record(&header, Version::V1).unwrap();
        let decoded: StoredHeader = decode_primary(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_snapshot_roundtrip_strips_user_data() {
        let mut state = TableRaftState::default();
        state.config.user_data.insert("k", "v");
        let snapshot = StoredSnapshot {
            state,
            config: ClusterConfig::default(),
            prev_index: 4,
            prev_term: 2,
        };
        let bytes = encode_record(&snapshot, Version::LATEST).unwrap();
        let decoded: StoredSnapshot = decode_primary(&bytes).unwrap();
        assert_eq!(decoded.prev_index, 4);
        assert_eq!(decoded.prev_term, 2);
        // The payload travels only in the extension side record.
        assert_eq!(decoded.state.config.user_data, UserData::default());
    }

    #[test]
    fn test_versioned_user_data_requires_extension_version() {
        let record = VersionedUserData {
            prev_term: 1,
            prev_index: 2,
            user_data: UserData::default(),
        };
        let result = encode_record(&record, Version::LATEST);
        assert!(matches!(result.unwrap_err(), CodecError::VersionClass { .. }));

        let bytes = encode_record(&record, Version::Ext).unwrap();
        let decoded: VersionedUserData = decode_extension(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    #[should_panic(expected = "corrupt metadata record")]
    fn test_corrupt_record_is_fatal() {
        let _: StoredHeader = must_decode_primary(&[0xEE, 1, 2, 3], "table/raft/header/x");
    }
}
