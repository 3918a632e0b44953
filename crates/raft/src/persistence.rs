//! Table metadata registry.
//!
//! [`TablePersistence`] owns the durable lifecycle of every table on this
//! server: exactly one Active or Inactive record exists per table id, and
//! each transition atomically creates or destroys the raft records behind
//! it. The registry also owns one [`TableRaftStorage`] per currently-active
//! table; the consensus runtime reaches them through
//! [`TablePersistence::storage_mut`] and issues mutations serially per
//! table.
//!
//! This is instance-owned process state with an explicit init/teardown
//! lifecycle — one registry per process, owned by the table-management
//! subsystem, never a module global.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use tabledb_store::{MetadataStore, ReadTxn};
use tabledb_types::codec::{read_field, write_field, CodecError};
use tabledb_types::config::{TableBasicConfig, TableEpoch};
use tabledb_types::versioned::{Version, VersionedRecord};
use tabledb_types::{MemberId, TableId};

use crate::error::Result;
use crate::history;
use crate::keys;
use crate::log::PersistentState;
use crate::multistore::{DataEngine, TableDataStore};
use crate::records::{must_decode_primary, write_record};
use crate::storage::TableRaftStorage;

/// Durable record for a table that currently has a running replicated log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveTableState {
    /// The activation epoch this server is participating in.
    pub epoch: TableEpoch,
    /// This server's raft member identity for the epoch.
    pub member: MemberId,
}

impl VersionedRecord for ActiveTableState {
    fn encode_fields(&self, _version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        write_field(buf, &self.epoch)?;
        write_field(buf, &self.member)
    }

    fn decode_fields(_version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let epoch = read_field(bytes)?;
        let member = read_field(bytes)?;
        Ok(Self { epoch, member })
    }
}

/// Durable record for a table this server knows about but holds no log
/// for. Keeps enough basic metadata to answer name lookups while inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InactiveTableState {
    /// Name, database, primary key — carried second-hand from the last
    /// active configuration.
    pub basic: TableBasicConfig,
    /// The epoch the table was last seen active in.
    pub epoch: TableEpoch,
}

impl VersionedRecord for InactiveTableState {
    fn encode_fields(&self, _version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        write_field(buf, &self.basic)?;
        write_field(buf, &self.epoch)
    }

    fn decode_fields(_version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let basic = read_field(bytes)?;
        let epoch = read_field(bytes)?;
        Ok(Self { basic, epoch })
    }
}

/// The registry: per-table metadata records plus the storage interface of
/// every active table.
///
/// Not internally synchronized; the owning subsystem serializes calls.
pub struct TablePersistence {
    store: Arc<MetadataStore>,
    engine: Arc<DataEngine>,
    storages: BTreeMap<TableId, TableRaftStorage>,
}

impl TablePersistence {
    /// Creates a registry over the given metadata store and data engine.
    /// Call [`TablePersistence::read_all_metadata`] next to populate it.
    pub fn new(store: Arc<MetadataStore>, engine: Arc<DataEngine>) -> Self {
        Self { store, engine, storages: BTreeMap::new() }
    }

    /// The storage interface for an active table, if any.
    pub fn storage(&self, table_id: TableId) -> Option<&TableRaftStorage> {
        self.storages.get(&table_id)
    }

    /// Mutable access to an active table's storage interface. The consensus
    /// runtime issues all mutations for one table through here, serially.
    pub fn storage_mut(&mut self, table_id: TableId) -> Option<&mut TableRaftStorage> {
        self.storages.get_mut(&table_id)
    }

    /// Loads every table record in one consistent read transaction.
    ///
    /// Rebuilds the interface table: for each Active record a storage
    /// interface is constructed (Load) and registered, then `active_cb` is
    /// invoked with the record, the interface, and the transaction; then
    /// every Inactive record is reported through `inactive_cb`. No durable
    /// mutation occurs on this path.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure, or a cancellation error if
    /// `cancel` triggers mid-scan — the caller must then treat the scan as
    /// not having happened.
    pub fn read_all_metadata<A, I>(
        &mut self,
        mut active_cb: A,
        mut inactive_cb: I,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        A: FnMut(TableId, &ActiveTableState, &TableRaftStorage, &ReadTxn),
        I: FnMut(TableId, &InactiveTableState, &ReadTxn),
    {
        let txn = self.store.begin_read()?;

        let mut active: BTreeMap<TableId, ActiveTableState> = BTreeMap::new();
        txn.read_many(keys::TABLE_ACTIVE_PREFIX, cancel, |suffix, bytes| {
            let table_id = keys::parse_table_id(suffix);
            active.insert(
                table_id,
                must_decode_primary(bytes, &format!("{}{suffix}", keys::TABLE_ACTIVE_PREFIX)),
            );
            Ok(())
        })?;

        self.storages.clear();
        for (table_id, state) in &active {
            let storage = TableRaftStorage::load(&self.store, &txn, *table_id, cancel)?;
            let storage = self.storages.entry(*table_id).or_insert(storage);
            active_cb(*table_id, state, storage, &txn);
        }

        txn.read_many(keys::TABLE_INACTIVE_PREFIX, cancel, |suffix, bytes| {
            let table_id = keys::parse_table_id(suffix);
            let state = must_decode_primary(
                bytes,
                &format!("{}{suffix}", keys::TABLE_INACTIVE_PREFIX),
            );
            inactive_cb(table_id, &state, &txn);
            Ok(())
        })?;

        Ok(())
    }

    /// Transitions a table to Active.
    ///
    /// In one transaction: erases any Inactive record and residual raft
    /// records for `table_id`, writes the Active record, and writes the
    /// initial raft state (Construct-new). The fresh storage interface is
    /// registered only after the transaction commits, and returned.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure; the registry and durable
    /// state are then unchanged.
    pub fn write_metadata_active(
        &mut self,
        table_id: TableId,
        state: ActiveTableState,
        raft_state: PersistentState,
    ) -> Result<&mut TableRaftStorage> {
        self.storages.remove(&table_id);

        let mut txn = self.store.begin_write()?;
        txn.erase(&keys::table_inactive_key(table_id))?;
        TableRaftStorage::erase(&mut txn, table_id)?;
        write_record(&mut txn, &keys::table_active_key(table_id), &state)?;
        let storage = TableRaftStorage::create(&self.store, &mut txn, table_id, raft_state)?;
        txn.commit()?;

        info!(table_id = %table_id, "table activated");
        Ok(self.storages.entry(table_id).or_insert(storage))
    }

    /// Transitions a table to Inactive.
    ///
    /// In one transaction: erases the Active record, the raft records, and
    /// the branch history, and writes the Inactive record. Any registered
    /// storage interface is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure; the registry and durable
    /// state are then unchanged.
    pub fn write_metadata_inactive(
        &mut self,
        table_id: TableId,
        state: InactiveTableState,
    ) -> Result<()> {
        let mut txn = self.store.begin_write()?;
        txn.erase(&keys::table_active_key(table_id))?;
        write_record(&mut txn, &keys::table_inactive_key(table_id), &state)?;
        TableRaftStorage::erase(&mut txn, table_id)?;
        history::erase(&mut txn, table_id)?;
        txn.commit()?;

        self.storages.remove(&table_id);
        info!(table_id = %table_id, "table deactivated");
        Ok(())
    }

    /// Removes a table entirely: Active record, Inactive record, raft
    /// records, and branch history, in one transaction. Any registered
    /// storage interface is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error on store I/O failure; the registry and durable
    /// state are then unchanged.
    pub fn delete_metadata(&mut self, table_id: TableId) -> Result<()> {
        let mut txn = self.store.begin_write()?;
        txn.erase(&keys::table_active_key(table_id))?;
        txn.erase(&keys::table_inactive_key(table_id))?;
        TableRaftStorage::erase(&mut txn, table_id)?;
        history::erase(&mut txn, table_id)?;
        txn.commit()?;

        self.storages.remove(&table_id);
        info!(table_id = %table_id, "table metadata deleted");
        Ok(())
    }

    /// Opens (creating if necessary) the table's primary data store.
    ///
    /// # Errors
    ///
    /// Returns an error on data engine I/O failure.
    pub fn create_multistore(&self, table_id: TableId) -> Result<TableDataStore> {
        self.engine.create_store(table_id)
    }

    /// Physically removes the table's primary data store.
    ///
    /// # Errors
    ///
    /// Returns an error on data engine I/O failure.
    pub fn destroy_multistore(&self, handle: TableDataStore) -> Result<()> {
        self.engine.destroy_store(handle)
    }
}
