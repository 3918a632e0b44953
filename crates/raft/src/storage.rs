//! Durable storage interface for one table's raft state.
//!
//! A [`TableRaftStorage`] is constructed once per active table — either by
//! loading the table's records from the metadata store, or by writing a
//! fresh initial state when the table first activates — and destroyed when
//! the table deactivates. In between, the consensus runtime mutates it
//! through the `write_*` operations, one call at a time per table.
//!
//! Every mutation opens its own write transaction, stages all durable
//! writes, commits, and only then updates the in-memory mirror. A crash or
//! I/O failure mid-operation therefore leaves durable state unchanged, and
//! a restart reloads the mirror exactly as of the last committed operation.

use std::mem;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use tabledb_store::{MetadataStore, ReadTxn, WriteTxn};
use tabledb_types::config::{ClusterConfig, TableRaftState};
use tabledb_types::{LogIndex, MemberId, TableId, Term};

use crate::error::Result;
use crate::keys;
use crate::log::{LogEntry, PersistentState, RaftLog};
use crate::records::{
    must_decode_primary, read_extension_record, read_record, write_extension_record,
    write_record, StoredHeader, StoredSnapshot, VersionedUserData,
};

/// Builds the snapshot extension record by moving the user-data payload out
/// of the snapshot. The caller moves it back with
/// [`restore_user_data_into_snapshot`] once the record is written; the
/// payload can be large, and it never travels in the primary encoding, so
/// copying it would be pure waste.
fn take_user_data_from_snapshot(snapshot: &mut StoredSnapshot) -> VersionedUserData {
    VersionedUserData {
        prev_term: snapshot.prev_term,
        prev_index: snapshot.prev_index,
        user_data: mem::take(&mut snapshot.state.config.user_data),
    }
}

fn restore_user_data_into_snapshot(snapshot: &mut StoredSnapshot, record: VersionedUserData) {
    snapshot.state.config.user_data = record.user_data;
}

/// Writes one log entry and, when its change carries a user-data payload,
/// the entry's extension side record.
fn write_entry_records(
    txn: &mut WriteTxn,
    table_id: TableId,
    index: LogIndex,
    entry: &LogEntry,
) -> Result<()> {
    write_record(txn, &keys::raft_log_key(table_id, index), entry)?;
    if let Some(user_data) = entry.extension_payload() {
        write_extension_record(txn, &keys::raft_log_ext_key(table_id, index), user_data)?;
    }
    Ok(())
}

/// Persistence handle for one table's raft state.
///
/// Not internally synchronized: a single logical owner issues all mutation
/// calls for a given table serially.
pub struct TableRaftStorage {
    store: Arc<MetadataStore>,
    table_id: TableId,
    state: PersistentState,
}

impl TableRaftStorage {
    /// Loads a table's state from the metadata store.
    ///
    /// Reads the header and snapshot, merges the snapshot's extension
    /// record when its boundary cross-check matches, then scans log records
    /// in index order starting at `prev_index + 1`, merging each entry's
    /// extension record keyed by its own index.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure or cancellation.
    ///
    /// # Panics
    ///
    /// Panics on missing or undecodable records and on a log that is not
    /// strictly contiguous — both signal on-disk corruption.
    pub fn load(
        store: &Arc<MetadataStore>,
        txn: &ReadTxn,
        table_id: TableId,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let header: StoredHeader = read_record(txn, &keys::raft_header_key(table_id))?;
        let mut snapshot: StoredSnapshot = read_record(txn, &keys::raft_snapshot_key(table_id))?;

        if let Some(ext) = read_extension_record::<VersionedUserData>(
            txn,
            &keys::raft_snapshot_ext_key(table_id),
        )? {
            if ext.prev_index == snapshot.prev_index && ext.prev_term == snapshot.prev_term {
                restore_user_data_into_snapshot(&mut snapshot, ext);
            }
        }

        let mut log = RaftLog::new(snapshot.prev_index, snapshot.prev_term);
        let log_prefix = keys::raft_log_prefix(table_id);
        txn.read_many(&log_prefix, cancel, |index_str, bytes| {
            let index = keys::str_to_log_index(index_str);
            assert_eq!(
                index,
                log.latest_index() + 1,
                "non-contiguous log for table {table_id}: found index {index} \
                 ({index_str:?}) after {}",
                log.latest_index()
            );

            let mut entry: LogEntry =
                must_decode_primary(bytes, &format!("{log_prefix}{index_str}"));
            if entry.extension_payload().is_some() {
                let ext_key = keys::raft_log_ext_key(table_id, index);
                if let Some(bytes) = txn.read(&ext_key)? {
                    let user_data = tabledb_types::versioned::decode_extension(&bytes)
                        .unwrap_or_else(|err| {
                            panic!("corrupt extension record at key {ext_key}: {err}")
                        });
                    if let Some(slot) = entry.extension_payload_mut() {
                        *slot = user_data;
                    }
                }
                // Absent extension: the primary decode already left the
                // type's default in place.
            }
            log.append(entry);
            Ok(())
        })?;

        debug!(
            table_id = %table_id,
            prev_index = log.prev_index,
            entries = log.entries.len(),
            commit_index = header.commit_index,
            "loaded raft state"
        );

        Ok(Self {
            store: Arc::clone(store),
            table_id,
            state: PersistentState {
                current_term: header.current_term,
                voted_for: header.voted_for,
                commit_index: header.commit_index,
                snapshot_state: snapshot.state,
                snapshot_config: snapshot.config,
                log,
            },
        })
    }

    /// Writes a fresh initial state into the caller's transaction and
    /// returns the handle. Used when a table transitions to Active for the
    /// first time; the caller commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O or encoding failure.
    pub fn create(
        store: &Arc<MetadataStore>,
        txn: &mut WriteTxn,
        table_id: TableId,
        mut state: PersistentState,
    ) -> Result<Self> {
        write_record(txn, &keys::raft_header_key(table_id), &StoredHeader::from_state(&state))?;

        // Move the snapshot payload into the stored record and back instead
        // of copying it; state-machine snapshots can be large.
        let mut snapshot = StoredSnapshot {
            state: mem::take(&mut state.snapshot_state),
            config: mem::take(&mut state.snapshot_config),
            prev_index: state.log.prev_index,
            prev_term: state.log.prev_term,
        };
        write_record(txn, &keys::raft_snapshot_key(table_id), &snapshot)?;

        let ext = take_user_data_from_snapshot(&mut snapshot);
        write_extension_record(txn, &keys::raft_snapshot_ext_key(table_id), &ext)?;
        restore_user_data_into_snapshot(&mut snapshot, ext);

        state.snapshot_state = snapshot.state;
        state.snapshot_config = snapshot.config;

        for index in state.log.prev_index + 1..=state.log.latest_index() {
            write_entry_records(txn, table_id, index, state.log.entry(index))?;
        }

        debug!(table_id = %table_id, latest_index = state.log.latest_index(), "wrote initial raft state");

        Ok(Self { store: Arc::clone(store), table_id, state })
    }

    /// Erases every durable record belonging to `table_id`: header,
    /// snapshot, snapshot extension, and all log entries and entry
    /// extensions. Static — used when a table is deactivated or dropped and
    /// no handle exists.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure.
    pub fn erase(txn: &mut WriteTxn, table_id: TableId) -> Result<()> {
        txn.erase(&keys::raft_header_key(table_id))?;
        txn.erase(&keys::raft_snapshot_key(table_id))?;
        txn.erase(&keys::raft_snapshot_ext_key(table_id))?;

        let log_prefix = keys::raft_log_prefix(table_id);
        let mut index_suffixes = Vec::new();
        txn.read_many(&log_prefix, |suffix, _| {
            index_suffixes.push(suffix.to_string());
            Ok(())
        })?;
        for suffix in &index_suffixes {
            txn.erase(&format!("{log_prefix}{suffix}"))?;
            txn.erase(&keys::raft_log_ext_key_from_suffix(table_id, suffix))?;
        }
        Ok(())
    }

    /// The table this handle persists.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// The in-memory mirror: the union of all committed operations, in call
    /// order.
    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    /// Durably records a new term and vote. Rewrites the header in full.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure; neither durable state nor the
    /// mirror changes.
    pub fn write_term_and_vote(
        &mut self,
        current_term: Term,
        voted_for: Option<MemberId>,
    ) -> Result<()> {
        let mut txn = self.store.begin_write()?;
        let header = StoredHeader {
            current_term,
            voted_for,
            commit_index: self.state.commit_index,
        };
        write_record(&mut txn, &keys::raft_header_key(self.table_id), &header)?;
        txn.commit()?;

        self.state.current_term = current_term;
        self.state.voted_for = voted_for;
        Ok(())
    }

    /// Durably records a new commit index. Rewrites the header in full.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure; neither durable state nor the
    /// mirror changes.
    pub fn write_commit_index(&mut self, commit_index: LogIndex) -> Result<()> {
        let mut txn = self.store.begin_write()?;
        let header = StoredHeader {
            current_term: self.state.current_term,
            voted_for: self.state.voted_for,
            commit_index,
        };
        write_record(&mut txn, &keys::raft_header_key(self.table_id), &header)?;
        txn.commit()?;

        self.state.commit_index = commit_index;
        Ok(())
    }

    /// Durably appends one entry at `latest_index() + 1`.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure; neither durable state nor the
    /// mirror changes.
    pub fn write_log_append_one(&mut self, entry: LogEntry) -> Result<()> {
        let index = self.state.log.latest_index() + 1;
        let mut txn = self.store.begin_write()?;
        write_entry_records(&mut txn, self.table_id, index, &entry)?;
        txn.commit()?;

        self.state.log.append(entry);
        Ok(())
    }

    /// Replaces the log tail from `first_replaced` onward with the entries
    /// of `source`. Durable records for old indices beyond `source`'s
    /// latest are erased; records inside the replaced range are
    /// overwritten. Passing `first_replaced == latest_index() + 1` with a
    /// source of purely new entries is a plain append.
    ///
    /// # Panics
    ///
    /// Panics unless `log.prev_index < first_replaced <= latest_index() + 1`
    /// — anything else means the consensus runtime violated its own
    /// log-matching guarantees.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure; neither durable state nor the
    /// mirror changes.
    pub fn write_log_replace_tail(
        &mut self,
        source: &RaftLog,
        first_replaced: LogIndex,
    ) -> Result<()> {
        assert!(
            first_replaced > self.state.log.prev_index,
            "replace-tail start {first_replaced} is at or before the compaction boundary {}",
            self.state.log.prev_index
        );
        assert!(
            first_replaced <= self.state.log.latest_index() + 1,
            "replace-tail start {first_replaced} leaves a gap after latest index {}",
            self.state.log.latest_index()
        );

        let old_latest = self.state.log.latest_index();
        let new_latest = source.latest_index();

        let mut txn = self.store.begin_write()?;
        for index in first_replaced..=old_latest.max(new_latest) {
            if index <= new_latest {
                write_entry_records(&mut txn, self.table_id, index, source.entry(index))?;
            } else {
                txn.erase(&keys::raft_log_key(self.table_id, index))?;
                txn.erase(&keys::raft_log_ext_key(self.table_id, index))?;
            }
        }
        txn.commit()?;

        if first_replaced != old_latest + 1 {
            self.state.log.delete_entries_from(first_replaced);
        }
        for index in first_replaced..=new_latest {
            self.state.log.append(source.entry(index).clone());
        }
        Ok(())
    }

    /// Installs a new snapshot at boundary (`prev_index`, `prev_term`),
    /// records `commit_index`, and erases compacted log records — all of
    /// them when `clear_log` is set (the snapshot came from elsewhere and
    /// the local log is being discarded), otherwise only those at or before
    /// `prev_index`.
    ///
    /// # Panics
    ///
    /// Panics if `prev_index` is before the current compaction boundary,
    /// or — when trimming — if the entry at `prev_index` does not carry
    /// `prev_term`.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure; neither durable state nor the
    /// mirror changes.
    #[allow(clippy::too_many_arguments)]
    pub fn write_snapshot(
        &mut self,
        snapshot_state: TableRaftState,
        snapshot_config: ClusterConfig,
        clear_log: bool,
        prev_index: LogIndex,
        prev_term: Term,
        commit_index: LogIndex,
    ) -> Result<()> {
        assert!(
            prev_index >= self.state.log.prev_index,
            "snapshot boundary {prev_index} is before the current boundary {}",
            self.state.log.prev_index
        );

        let mut txn = self.store.begin_write()?;

        let header = StoredHeader {
            current_term: self.state.current_term,
            voted_for: self.state.voted_for,
            commit_index,
        };
        write_record(&mut txn, &keys::raft_header_key(self.table_id), &header)?;

        let mut snapshot = StoredSnapshot {
            state: snapshot_state,
            config: snapshot_config,
            prev_index,
            prev_term,
        };
        write_record(&mut txn, &keys::raft_snapshot_key(self.table_id), &snapshot)?;

        let ext = take_user_data_from_snapshot(&mut snapshot);
        write_extension_record(&mut txn, &keys::raft_snapshot_ext_key(self.table_id), &ext)?;
        restore_user_data_into_snapshot(&mut snapshot, ext);

        let erase_to = if clear_log { self.state.log.latest_index() } else { prev_index };
        for index in self.state.log.prev_index + 1..=erase_to {
            txn.erase(&keys::raft_log_key(self.table_id, index))?;
            txn.erase(&keys::raft_log_ext_key(self.table_id, index))?;
        }
        txn.commit()?;

        self.state.commit_index = commit_index;
        self.state.snapshot_state = snapshot.state;
        self.state.snapshot_config = snapshot.config;
        if clear_log {
            self.state.log.entries.clear();
            self.state.log.prev_index = prev_index;
            self.state.log.prev_term = prev_term;
        } else {
            self.state.log.delete_entries_to(prev_index, prev_term);
        }
        Ok(())
    }
}
