//! Branch history records.
//!
//! Each branch of a table's data store gets one durable record under
//! `table/history/<T>/<B>`. The records are written as branches are born
//! and erased wholesale when the table deactivates or is dropped.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use tabledb_store::{ReadTxn, WriteTxn};
use tabledb_types::codec::{read_field, write_field, CodecError};
use tabledb_types::versioned::{Version, VersionedRecord};
use tabledb_types::{BranchId, TableId};

use crate::error::Result;
use crate::keys;
use crate::records::{must_decode_primary, write_record};

/// Birth certificate of one branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchRecord {
    /// When the branch was created, microseconds since the epoch.
    pub initial_timestamp: u64,
    /// The branches this one descends from, newest first.
    pub origin: Vec<BranchId>,
}

impl VersionedRecord for BranchRecord {
    fn encode_fields(&self, _version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        write_field(buf, &self.initial_timestamp)?;
        write_field(buf, &self.origin)
    }

    fn decode_fields(_version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let initial_timestamp = read_field(bytes)?;
        let origin = read_field(bytes)?;
        Ok(Self { initial_timestamp, origin })
    }
}

/// Writes one branch record into the caller's transaction.
///
/// # Errors
///
/// Returns an error on store I/O or encoding failure.
pub fn write_branch(
    txn: &mut WriteTxn,
    table_id: TableId,
    branch: BranchId,
    record: &BranchRecord,
) -> Result<()> {
    write_record(txn, &keys::history_key(table_id, branch), record)
}

/// Reads every branch record for `table_id`, in branch-id order.
///
/// # Errors
///
/// Returns an error on store I/O failure or cancellation.
pub fn read_all_branches(
    txn: &ReadTxn,
    table_id: TableId,
    cancel: &CancellationToken,
) -> Result<BTreeMap<BranchId, BranchRecord>> {
    let prefix = keys::history_prefix(table_id);
    let mut branches = BTreeMap::new();
    txn.read_many(&prefix, cancel, |suffix, bytes| {
        let branch = keys::parse_branch_id(suffix);
        branches.insert(branch, must_decode_primary(bytes, &format!("{prefix}{suffix}")));
        Ok(())
    })?;
    Ok(branches)
}

/// Erases every branch record for `table_id` from the caller's transaction.
///
/// # Errors
///
/// Returns an error on store I/O failure.
pub fn erase(txn: &mut WriteTxn, table_id: TableId) -> Result<()> {
    let prefix = keys::history_prefix(table_id);
    let mut suffixes = Vec::new();
    txn.read_many(&prefix, |suffix, _| {
        suffixes.push(suffix.to_string());
        Ok(())
    })?;
    for suffix in &suffixes {
        txn.erase(&format!("{prefix}{suffix}"))?;
    }
    Ok(())
}
