//! Lifecycle of the per-table primary data store.
//!
//! All tables' primary rows live in one data engine, keyed under
//! `table/data/<T>/`. A store "exists" only once its marker key
//! `table/store_exists/<T>` is present, and the marker is written in a
//! separate transaction after initialization commits: a crash between the
//! two leaves the marker absent, so the next activation re-creates the
//! store from scratch instead of resuming a half-initialized one.

use std::sync::Arc;

use tracing::{debug, info};

use tabledb_store::{MetadataStore, WriteTxn};
use tabledb_types::TableId;

use crate::error::Result;
use crate::keys;

/// Row under which a store keeps its metainfo. Written empty at creation;
/// the owning store fills it on first use.
const METAINFO_ROW: &str = "metainfo";

/// The engine holding every table's primary rows.
///
/// This is a separate database from the metadata store: raft metadata and
/// table data have different lifetimes and flush policies.
pub struct DataEngine {
    store: MetadataStore,
}

impl DataEngine {
    /// Opens or creates the data engine at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self { store: MetadataStore::open(path)? })
    }

    /// Creates an in-memory data engine for tests and ephemeral
    /// deployments.
    ///
    /// # Errors
    ///
    /// Returns an error if backend initialization fails.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { store: MetadataStore::open_in_memory()? })
    }

    /// Whether `table_id`'s store has been fully created.
    ///
    /// # Errors
    ///
    /// Returns an error on engine I/O failure.
    pub fn store_exists(&self, table_id: TableId) -> Result<bool> {
        let txn = self.store.begin_read()?;
        Ok(txn.read(&keys::store_exists_key(table_id))?.is_some())
    }

    /// Opens `table_id`'s store, creating it if its existence marker is
    /// absent. Creation wipes any residual rows first — rows without a
    /// marker belong to a creation that never finished.
    ///
    /// # Errors
    ///
    /// Returns an error on engine I/O failure.
    pub fn create_store(self: &Arc<Self>, table_id: TableId) -> Result<TableDataStore> {
        if !self.store_exists(table_id)? {
            let mut txn = self.store.begin_write()?;
            erase_prefix(&mut txn, &keys::data_row_prefix(table_id))?;
            txn.write(&keys::data_row_key(table_id, METAINFO_ROW), b"")?;
            txn.commit()?;

            // The marker goes in its own transaction, after the store's
            // initial contents are durable.
            let mut txn = self.store.begin_write()?;
            txn.write(&keys::store_exists_key(table_id), b"1")?;
            txn.commit()?;

            info!(table_id = %table_id, "created table data store");
        } else {
            debug!(table_id = %table_id, "opened existing table data store");
        }

        Ok(TableDataStore { engine: Arc::clone(self), table_id })
    }

    /// Destroys a table's store: consumes the handle, then range-deletes
    /// the table's rows and erases the marker in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error on engine I/O failure.
    pub fn destroy_store(&self, handle: TableDataStore) -> Result<()> {
        let TableDataStore { table_id, .. } = handle;
        let mut txn = self.store.begin_write()?;
        erase_prefix(&mut txn, &keys::data_row_prefix(table_id))?;
        txn.erase(&keys::store_exists_key(table_id))?;
        txn.commit()?;
        info!(table_id = %table_id, "destroyed table data store");
        Ok(())
    }
}

/// Erases every key under `prefix` within the caller's transaction.
fn erase_prefix(txn: &mut WriteTxn, prefix: &str) -> Result<()> {
    let mut suffixes = Vec::new();
    txn.read_many(prefix, |suffix, _| {
        suffixes.push(suffix.to_string());
        Ok(())
    })?;
    for suffix in &suffixes {
        txn.erase(&format!("{prefix}{suffix}"))?;
    }
    Ok(())
}

/// Open handle to one table's rows in the data engine.
pub struct TableDataStore {
    engine: Arc<DataEngine>,
    table_id: TableId,
}

impl TableDataStore {
    /// The table this handle belongs to.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Writes one row.
    ///
    /// # Errors
    ///
    /// Returns an error on engine I/O failure.
    pub fn write_row(&self, row: &str, value: &[u8]) -> Result<()> {
        let mut txn = self.engine.store.begin_write()?;
        txn.write(&keys::data_row_key(self.table_id, row), value)?;
        txn.commit()?;
        Ok(())
    }

    /// Reads one row, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error on engine I/O failure.
    pub fn read_row(&self, row: &str) -> Result<Option<Vec<u8>>> {
        let txn = self.engine.store.begin_read()?;
        Ok(txn.read(&keys::data_row_key(self.table_id, row))?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn engine() -> Arc<DataEngine> {
        Arc::new(DataEngine::open_in_memory().unwrap())
    }

    #[test]
    fn test_create_writes_marker_and_metainfo() {
        let engine = engine();
        let table_id = TableId::random();
        assert!(!engine.store_exists(table_id).unwrap());

        let store = engine.create_store(table_id).unwrap();
        assert!(engine.store_exists(table_id).unwrap());
        assert_eq!(store.read_row(METAINFO_ROW).unwrap().as_deref(), Some(&b""[..]));
    }

    #[test]
    fn test_reopen_preserves_rows() {
        let engine = engine();
        let table_id = TableId::random();

        let store = engine.create_store(table_id).unwrap();
        store.write_row("doc:1", b"payload").unwrap();
        drop(store);

        let store = engine.create_store(table_id).unwrap();
        assert_eq!(store.read_row("doc:1").unwrap().as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn test_missing_marker_forces_recreation() {
        let engine = engine();
        let table_id = TableId::random();

        // Rows exist but the marker was never written: the creation that
        // produced them crashed before finishing.
        {
            let mut txn = engine.store.begin_write().unwrap();
            txn.write(&keys::data_row_key(table_id, "doc:1"), b"stale").unwrap();
            txn.commit().unwrap();
        }

        let store = engine.create_store(table_id).unwrap();
        assert_eq!(store.read_row("doc:1").unwrap(), None, "residual rows must be wiped");
        assert!(engine.store_exists(table_id).unwrap());
    }

    #[test]
    fn test_destroy_removes_rows_and_marker() {
        let engine = engine();
        let table_id = TableId::random();

        let store = engine.create_store(table_id).unwrap();
        store.write_row("doc:1", b"payload").unwrap();
        engine.destroy_store(store).unwrap();

        assert!(!engine.store_exists(table_id).unwrap());
        let txn = engine.store.begin_read().unwrap();
        assert_eq!(txn.read(&keys::data_row_key(table_id, "doc:1")).unwrap(), None);
    }

    #[test]
    fn test_destroy_is_scoped_to_one_table() {
        let engine = engine();
        let table_a = TableId::random();
        let table_b = TableId::random();

        let store_a = engine.create_store(table_a).unwrap();
        let store_b = engine.create_store(table_b).unwrap();
        store_a.write_row("doc:1", b"a").unwrap();
        store_b.write_row("doc:1", b"b").unwrap();

        engine.destroy_store(store_a).unwrap();

        assert!(engine.store_exists(table_b).unwrap());
        assert_eq!(store_b.read_row("doc:1").unwrap().as_deref(), Some(&b"b"[..]));
    }
}
