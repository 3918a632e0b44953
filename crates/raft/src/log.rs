//! In-memory model of a table's durable raft state.
//!
//! [`RaftLog`] mirrors the contiguous tail of durable log records;
//! [`PersistentState`] is the unit the consensus runtime reads and mutates
//! through the storage interface. Range violations on the log are fatal
//! assertions: the consensus runtime is trusted to only issue indices
//! consistent with its own log-matching guarantees, so a bad index here is
//! a bug, not an input error.

use tabledb_types::codec::{read_field, write_field, CodecError};
use tabledb_types::config::{ClusterConfig, ShardScheme, TableConfig, TableRaftState, UserData};
use tabledb_types::versioned::{Version, VersionedRecord};
use tabledb_types::{LogIndex, MemberId, ServerId, Term};

/// One state-machine mutation carried by a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Replace the table's configuration.
    SetConfig {
        /// The configuration to install.
        new_config: TableConfig,
    },
    /// Replace the shard boundaries.
    SetShardScheme {
        /// The boundaries to install.
        scheme: ShardScheme,
    },
    /// Remove a server from the table entirely.
    RemoveServer {
        /// The server being removed.
        server: ServerId,
    },
}

impl Change {
    const TAG_SET_CONFIG: u8 = 0;
    const TAG_SET_SHARD_SCHEME: u8 = 1;
    const TAG_REMOVE_SERVER: u8 = 2;

    /// The user-data payload this change carries in an extension side
    /// record, if any. Only configuration changes carry one.
    pub fn extension_payload(&self) -> Option<&UserData> {
        match self {
            Change::SetConfig { new_config } => Some(&new_config.user_data),
            Change::SetShardScheme { .. } | Change::RemoveServer { .. } => None,
        }
    }

    /// Mutable access to the extension payload, if any.
    pub fn extension_payload_mut(&mut self) -> Option<&mut UserData> {
        match self {
            Change::SetConfig { new_config } => Some(&mut new_config.user_data),
            Change::SetShardScheme { .. } | Change::RemoveServer { .. } => None,
        }
    }
}

impl VersionedRecord for Change {
    fn encode_fields(&self, version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            Change::SetConfig { new_config } => {
                write_field(buf, &Self::TAG_SET_CONFIG)?;
                new_config.encode_fields(version, buf)
            }
            Change::SetShardScheme { scheme } => {
                write_field(buf, &Self::TAG_SET_SHARD_SCHEME)?;
                write_field(buf, scheme)
            }
            Change::RemoveServer { server } => {
                write_field(buf, &Self::TAG_REMOVE_SERVER)?;
                write_field(buf, server)
            }
        }
    }

    fn decode_fields(version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let tag: u8 = read_field(bytes)?;
        match tag {
            Self::TAG_SET_CONFIG => {
                Ok(Change::SetConfig { new_config: TableConfig::decode_fields(version, bytes)? })
            }
            Self::TAG_SET_SHARD_SCHEME => {
                Ok(Change::SetShardScheme { scheme: read_field(bytes)? })
            }
            Self::TAG_REMOVE_SERVER => Ok(Change::RemoveServer { server: read_field(bytes)? }),
            other => Err(CodecError::UnknownTag { what: "change", tag: other }),
        }
    }
}

/// One replicated log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Term under which the entry was proposed.
    pub term: Term,
    /// The carried mutation; `None` is a no-op entry (leader heartbeat
    /// commitment point).
    pub change: Option<Change>,
}

impl LogEntry {
    /// A no-op entry for `term`.
    pub fn noop(term: Term) -> Self {
        Self { term, change: None }
    }

    /// An entry carrying `change`.
    pub fn with_change(term: Term, change: Change) -> Self {
        Self { term, change: Some(change) }
    }

    /// The entry's extension payload, if its change carries one.
    pub fn extension_payload(&self) -> Option<&UserData> {
        self.change.as_ref().and_then(Change::extension_payload)
    }

    /// Mutable access to the entry's extension payload, if any.
    pub fn extension_payload_mut(&mut self) -> Option<&mut UserData> {
        self.change.as_mut().and_then(Change::extension_payload_mut)
    }
}

impl VersionedRecord for LogEntry {
    fn encode_fields(&self, version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        write_field(buf, &self.term)?;
        write_field(buf, &self.change.is_some())?;
        if let Some(change) = &self.change {
            change.encode_fields(version, buf)?;
        }
        Ok(())
    }

    fn decode_fields(version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let term = read_field(bytes)?;
        let has_change: bool = read_field(bytes)?;
        let change =
            if has_change { Some(Change::decode_fields(version, bytes)?) } else { None };
        Ok(Self { term, change })
    }
}

/// The contiguous tail of a table's replicated log.
///
/// Entry `entries[i]` has index `prev_index + 1 + i`; everything at or
/// before `prev_index` has been compacted into the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaftLog {
    /// Index of the last compacted entry.
    pub prev_index: LogIndex,
    /// Term of the last compacted entry.
    pub prev_term: Term,
    /// Entries after the compaction boundary, in index order.
    pub entries: Vec<LogEntry>,
}

impl RaftLog {
    /// An empty log whose compaction boundary is (`prev_index`, `prev_term`).
    pub fn new(prev_index: LogIndex, prev_term: Term) -> Self {
        Self { prev_index, prev_term, entries: Vec::new() }
    }

    /// Index of the newest entry, or `prev_index` if the log is empty.
    pub fn latest_index(&self) -> LogIndex {
        self.prev_index + self.entries.len() as u64
    }

    /// The entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside `(prev_index, latest_index]`.
    pub fn entry(&self, index: LogIndex) -> &LogEntry {
        assert!(
            index > self.prev_index && index <= self.latest_index(),
            "log index {index} outside ({}, {}]",
            self.prev_index,
            self.latest_index()
        );
        &self.entries[(index - self.prev_index - 1) as usize]
    }

    /// Term of the entry at `index`; the compaction boundary itself reports
    /// `prev_term`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside `[prev_index, latest_index]`.
    pub fn entry_term(&self, index: LogIndex) -> Term {
        if index == self.prev_index {
            self.prev_term
        } else {
            self.entry(index).term
        }
    }

    /// Appends one entry at `latest_index() + 1`.
    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Drops every entry at or after `first`, keeping the boundary.
    ///
    /// # Panics
    ///
    /// Panics if `first` is outside `(prev_index, latest_index + 1]`.
    pub fn delete_entries_from(&mut self, first: LogIndex) {
        assert!(
            first > self.prev_index && first <= self.latest_index() + 1,
            "truncation point {first} outside ({}, {}]",
            self.prev_index,
            self.latest_index() + 1
        );
        self.entries.truncate((first - self.prev_index - 1) as usize);
    }

    /// Drops every entry up to and including `index`, advancing the
    /// compaction boundary to (`index`, `term`).
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside `[prev_index, latest_index]` or the
    /// entry being trimmed does not have term `term` — a boundary/term
    /// mismatch means the caller and the log disagree about history.
    pub fn delete_entries_to(&mut self, index: LogIndex, term: Term) {
        assert!(
            index >= self.prev_index && index <= self.latest_index(),
            "compaction boundary {index} outside [{}, {}]",
            self.prev_index,
            self.latest_index()
        );
        let boundary_term = self.entry_term(index);
        assert_eq!(boundary_term, term, "compaction boundary term mismatch at index {index}");
        self.entries.drain(..(index - self.prev_index) as usize);
        self.prev_index = index;
        self.prev_term = term;
    }
}

/// Everything the consensus runtime persists for one table: header fields,
/// the compacted snapshot, and the log tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentState {
    /// Latest term this member has seen.
    pub current_term: Term,
    /// Who this member voted for in `current_term`, if anyone.
    pub voted_for: Option<MemberId>,
    /// Index of the newest entry known to be committed.
    pub commit_index: LogIndex,
    /// State machine state as of the log's compaction boundary.
    pub snapshot_state: TableRaftState,
    /// Cluster configuration as of the compaction boundary.
    pub snapshot_config: ClusterConfig,
    /// The log tail.
    pub log: RaftLog,
}

impl PersistentState {
    /// The state of a freshly activated table: term 0, no vote, nothing
    /// committed, an empty log whose snapshot at boundary (0, 0) holds the
    /// initial state and configuration.
    pub fn initial(snapshot_state: TableRaftState, snapshot_config: ClusterConfig) -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            commit_index: 0,
            snapshot_state,
            snapshot_config,
            log: RaftLog::new(0, 0),
        }
    }

    /// Index of the newest log entry.
    pub fn latest_index(&self) -> LogIndex {
        self.log.latest_index()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tabledb_types::versioned::{decode_primary, encode_record};

    fn entry(term: Term) -> LogEntry {
        LogEntry::noop(term)
    }

    #[test]
    fn test_empty_log() {
        let log = RaftLog::new(5, 2);
        assert_eq!(log.latest_index(), 5);
        assert_eq!(log.entry_term(5), 2);
    }

    #[test]
    fn test_append_and_lookup() {
        let mut log = RaftLog::new(0, 0);
        log.append(entry(1));
        log.append(entry(1));
        log.append(entry(2));

        assert_eq!(log.latest_index(), 3);
        assert_eq!(log.entry(1).term, 1);
        assert_eq!(log.entry(3).term, 2);
        assert_eq!(log.entry_term(0), 0);
        assert_eq!(log.entry_term(3), 2);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_lookup_before_boundary_is_fatal() {
        let mut log = RaftLog::new(2, 1);
        log.append(entry(1));
        let _ = log.entry(2);
    }

    #[test]
    fn test_delete_entries_from() {
        let mut log = RaftLog::new(0, 0);
        for term in [1, 1, 2, 2] {
            log.append(entry(term));
        }
        log.delete_entries_from(3);
        assert_eq!(log.latest_index(), 2);
        assert_eq!(log.entry(2).term, 1);

        // Truncating at latest + 1 is a no-op.
        log.delete_entries_from(3);
        assert_eq!(log.latest_index(), 2);
    }

    #[test]
    fn test_delete_entries_to() {
        let mut log = RaftLog::new(0, 0);
        for term in [1, 1, 2] {
            log.append(entry(term));
        }
        log.delete_entries_to(2, 1);
        assert_eq!(log.prev_index, 2);
        assert_eq!(log.prev_term, 1);
        assert_eq!(log.latest_index(), 3);
        assert_eq!(log.entry(3).term, 2);
    }

    #[test]
    fn test_delete_entries_to_boundary_is_noop() {
        let mut log = RaftLog::new(4, 3);
        log.append(entry(3));
        log.delete_entries_to(4, 3);
        assert_eq!(log.prev_index, 4);
        assert_eq!(log.latest_index(), 5);
    }

    #[test]
    #[should_panic(expected = "term mismatch")]
    fn test_delete_entries_to_wrong_term_is_fatal() {
        let mut log = RaftLog::new(0, 0);
        log.append(entry(1));
        log.delete_entries_to(1, 9);
    }

    #[test]
    fn test_log_entry_roundtrip_noop() {
        let e = LogEntry::noop(7);
        let bytes = encode_record(&e, Version::LATEST).unwrap();
        let decoded: LogEntry = decode_primary(&bytes).unwrap();
        assert_eq!(decoded, e);
    }

    #[test]
    fn test_log_entry_roundtrip_with_change() {
        let e = LogEntry::with_change(
            3,
            Change::SetShardScheme { scheme: ShardScheme { split_points: vec![b"k".to_vec()] } },
        );
        let bytes = encode_record(&e, Version::LATEST).unwrap();
        let decoded: LogEntry = decode_primary(&bytes).unwrap();
        assert_eq!(decoded, e);
    }

    #[test]
    fn test_unknown_change_tag_rejected() {
        let mut buf = vec![Version::LATEST.tag()];
        write_field(&mut buf, &5u64).unwrap(); // term
        write_field(&mut buf, &true).unwrap(); // has change
        write_field(&mut buf, &99u8).unwrap(); // bogus change tag
        let result: Result<LogEntry, _> = decode_primary(&buf);
        assert!(matches!(result.unwrap_err(), CodecError::UnknownTag { what: "change", tag: 99 }));
    }

    #[test]
    fn test_extension_payload_dispatch() {
        let mut config = TableConfig::default();
        config.user_data.insert("k", "v");
        let mut with = LogEntry::with_change(1, Change::SetConfig { new_config: config });
        assert!(with.extension_payload().is_some());
        assert!(with.extension_payload_mut().is_some());

        let without = LogEntry::with_change(1, Change::RemoveServer { server: ServerId::random() });
        assert!(without.extension_payload().is_none());
        assert!(LogEntry::noop(1).extension_payload().is_none());
    }

    #[test]
    fn test_initial_persistent_state() {
        let state = PersistentState::initial(TableRaftState::default(), ClusterConfig::default());
        assert_eq!(state.current_term, 0);
        assert_eq!(state.voted_for, None);
        assert_eq!(state.commit_index, 0);
        assert_eq!(state.log.prev_index, 0);
        assert_eq!(state.latest_index(), 0);
    }
}
