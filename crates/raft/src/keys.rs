//! Durable key layout and the ordered log index codec.
//!
//! All metadata lives in one flat string-key namespace:
//!
//! ```text
//! table/active/<T>              Active record
//! table/inactive/<T>            Inactive record
//! table/raft/header/<T>         {current_term, voted_for, commit_index}
//! table/raft/snapshot/<T>       {state, config, prev_index, prev_term}
//! table/raft/snapshot_ext/<T>   extension: {prev_term, prev_index, user data}
//! table/raft/log/<T>/<I>        log entry
//! table/raft/log_ext/<T>/<I>    extension: user data for the entry at <I>
//! table/history/<T>/<B>         branch history record
//! ```
//!
//! and, in the data engine's own namespace:
//!
//! ```text
//! table/store_exists/<T>        presence marker, written after store creation
//! table/data/<T>/<row>          primary rows
//! ```
//!
//! `<T>` and `<B>` are canonical UUID strings; `<I>` is a log index encoded
//! as exactly 16 lowercase hex digits so that lexicographic key order equals
//! numeric index order.

use tabledb_types::{BranchId, LogIndex, TableId};

/// Prefix under which Active records live.
pub(crate) const TABLE_ACTIVE_PREFIX: &str = "table/active/";

/// Prefix under which Inactive records live.
pub(crate) const TABLE_INACTIVE_PREFIX: &str = "table/inactive/";

pub(crate) fn table_active_key(table_id: TableId) -> String {
    format!("{TABLE_ACTIVE_PREFIX}{table_id}")
}

pub(crate) fn table_inactive_key(table_id: TableId) -> String {
    format!("{TABLE_INACTIVE_PREFIX}{table_id}")
}

pub(crate) fn raft_header_key(table_id: TableId) -> String {
    format!("table/raft/header/{table_id}")
}

pub(crate) fn raft_snapshot_key(table_id: TableId) -> String {
    format!("table/raft/snapshot/{table_id}")
}

pub(crate) fn raft_snapshot_ext_key(table_id: TableId) -> String {
    format!("table/raft/snapshot_ext/{table_id}")
}

pub(crate) fn raft_log_prefix(table_id: TableId) -> String {
    format!("table/raft/log/{table_id}/")
}

pub(crate) fn raft_log_key(table_id: TableId, index: LogIndex) -> String {
    format!("table/raft/log/{table_id}/{}", log_index_to_str(index))
}

pub(crate) fn raft_log_ext_key(table_id: TableId, index: LogIndex) -> String {
    format!("table/raft/log_ext/{table_id}/{}", log_index_to_str(index))
}

pub(crate) fn raft_log_ext_key_from_suffix(table_id: TableId, suffix: &str) -> String {
    format!("table/raft/log_ext/{table_id}/{suffix}")
}

pub(crate) fn history_prefix(table_id: TableId) -> String {
    format!("table/history/{table_id}/")
}

pub(crate) fn history_key(table_id: TableId, branch: BranchId) -> String {
    format!("table/history/{table_id}/{branch}")
}

pub(crate) fn store_exists_key(table_id: TableId) -> String {
    format!("table/store_exists/{table_id}")
}

pub(crate) fn data_row_prefix(table_id: TableId) -> String {
    format!("table/data/{table_id}/")
}

pub(crate) fn data_row_key(table_id: TableId, row: &str) -> String {
    format!("table/data/{table_id}/{row}")
}

/// Parses a table id out of a key suffix.
///
/// # Panics
///
/// Panics on a malformed id — a key under a `table/...` prefix whose suffix
/// is not a UUID signals on-disk corruption.
pub(crate) fn parse_table_id(suffix: &str) -> TableId {
    suffix
        .parse()
        .unwrap_or_else(|_| panic!("malformed table id in metadata key suffix {suffix:?}"))
}

/// Parses a branch id out of a key suffix.
///
/// # Panics
///
/// Panics on a malformed id, which signals on-disk corruption.
pub(crate) fn parse_branch_id(suffix: &str) -> BranchId {
    suffix
        .parse()
        .unwrap_or_else(|_| panic!("malformed branch id in metadata key suffix {suffix:?}"))
}

/// Encodes a log index as exactly 16 lowercase hex digits.
///
/// Fixed width is the invariant that makes lexicographic order of the
/// encodings equal numeric order of the indices, for every representable
/// index.
pub fn log_index_to_str(index: LogIndex) -> String {
    format!("{index:016x}")
}

/// Decodes a 16-hex-digit key suffix back to a log index.
///
/// # Panics
///
/// Panics unless the input is exactly 16 characters of `[0-9a-f]`. Anything
/// else under a log prefix signals on-disk corruption, which has no
/// recovery path.
pub fn str_to_log_index(s: &str) -> LogIndex {
    assert_eq!(s.len(), 16, "log index key suffix {s:?} is not 16 characters");
    let mut index: u64 = 0;
    for byte in s.bytes() {
        let nibble = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => 10 + byte - b'a',
            _ => panic!("bad character in log index key suffix {s:?}"),
        };
        index = index << 4 | u64::from(nibble);
    }
    index
}
