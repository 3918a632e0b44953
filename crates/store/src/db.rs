//! Transactional metadata store over redb.
//!
//! The store is a single flat namespace of string keys mapping to record
//! bytes. Read transactions capture a snapshot-isolated view; write
//! transactions buffer mutations and make them durable atomically on
//! commit (single-writer model). Interpretation of the stored bytes is the
//! caller's concern — this layer moves bytes.
//!
//! Prefix scans ([`ReadTxn::read_many`]) yield entries in key order and
//! hand the callback the key *suffix* after the prefix, which is how the
//! persistence layer recovers table ids and log indices from key paths.

use std::path::Path;

use redb::{backends::InMemoryBackend, Database, ReadableTable, TableDefinition};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::error::{
    CommitSnafu, DatabaseSnafu, InterruptedSnafu, Result, StorageSnafu, TableSnafu,
    TransactionSnafu,
};

/// The one table holding every metadata record.
const METADATA: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("metadata");

/// Handle to the metadata database.
///
/// Thread-safe; reads never block writes. Mutation of any single record
/// family is expected to be serialized by the owning subsystem.
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    /// Opens or creates the metadata database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created, or if the
    /// initial table-creating transaction fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).context(DatabaseSnafu)?;
        Self::from_database(db)
    }

    /// Creates an in-memory metadata database. Used by tests and ephemeral
    /// deployments; contents are lost on drop.
    ///
    /// # Errors
    ///
    /// Returns an error if backend initialization fails.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .context(DatabaseSnafu)?;
        Self::from_database(db)
    }

    fn from_database(db: Database) -> Result<Self> {
        // Create the table eagerly so a fresh store reads as empty instead
        // of "table does not exist".
        let txn = db.begin_write().context(TransactionSnafu)?;
        txn.open_table(METADATA).context(TableSnafu)?;
        txn.commit().context(CommitSnafu)?;
        Ok(Self { db })
    }

    /// Begins a snapshot-isolated read transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    pub fn begin_read(&self) -> Result<ReadTxn> {
        let txn = self.db.begin_read().context(TransactionSnafu)?;
        Ok(ReadTxn { txn })
    }

    /// Begins a write transaction. At most one is active at a time; callers
    /// block until the current writer finishes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    pub fn begin_write(&self) -> Result<WriteTxn> {
        let txn = self.db.begin_write().context(TransactionSnafu)?;
        Ok(WriteTxn { txn })
    }
}

/// A snapshot-isolated read transaction.
pub struct ReadTxn {
    txn: redb::ReadTransaction,
}

impl ReadTxn {
    /// Reads the record at `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(METADATA).context(TableSnafu)?;
        Ok(table.get(key).context(StorageSnafu)?.map(|guard| guard.value().to_vec()))
    }

    /// Scans every record whose key starts with `prefix`, in key order.
    ///
    /// The callback receives the key suffix after `prefix` and the record
    /// bytes. The cancellation token is checked before each entry; a
    /// triggered token aborts the scan with [`crate::Error::Interrupted`]
    /// and no side effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan is cancelled, a read fails, or the
    /// callback returns an error.
    pub fn read_many<F>(&self, prefix: &str, cancel: &CancellationToken, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &[u8]) -> Result<()>,
    {
        let table = self.txn.open_table(METADATA).context(TableSnafu)?;
        for item in table.range(prefix..).context(StorageSnafu)? {
            if cancel.is_cancelled() {
                return InterruptedSnafu.fail();
            }
            let (key_guard, value_guard) = item.context(StorageSnafu)?;
            let key = key_guard.value();
            let Some(suffix) = key.strip_prefix(prefix) else {
                break;
            };
            f(suffix, value_guard.value())?;
        }
        Ok(())
    }
}

/// A write transaction. Mutations are buffered and become durable together
/// on [`WriteTxn::commit`]; dropping without committing discards them.
pub struct WriteTxn {
    txn: redb::WriteTransaction,
}

impl WriteTxn {
    /// Reads the record at `key`, observing this transaction's own
    /// uncommitted writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(METADATA).context(TableSnafu)?;
        let value = table.get(key).context(StorageSnafu)?.map(|guard| guard.value().to_vec());
        Ok(value)
    }

    /// Scans every record whose key starts with `prefix`, in key order,
    /// observing this transaction's own uncommitted writes. Mutation paths
    /// accept no cancellation, so none is taken here.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails or the callback returns an error.
    pub fn read_many<F>(&self, prefix: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &[u8]) -> Result<()>,
    {
        let table = self.txn.open_table(METADATA).context(TableSnafu)?;
        for item in table.range(prefix..).context(StorageSnafu)? {
            let (key_guard, value_guard) = item.context(StorageSnafu)?;
            let key = key_guard.value();
            let Some(suffix) = key.strip_prefix(prefix) else {
                break;
            };
            f(suffix, value_guard.value())?;
        }
        Ok(())
    }

    /// Writes (inserts or replaces) the record at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    pub fn write(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let mut table = self.txn.open_table(METADATA).context(TableSnafu)?;
        table.insert(key, value).context(StorageSnafu)?;
        Ok(())
    }

    /// Erases the record at `key`. Erasing an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    pub fn erase(&mut self, key: &str) -> Result<()> {
        let mut table = self.txn.open_table(METADATA).context(TableSnafu)?;
        table.remove(key).context(StorageSnafu)?;
        Ok(())
    }

    /// Commits the transaction, making every buffered write durable
    /// atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; no buffered write takes effect.
    pub fn commit(self) -> Result<()> {
        self.txn.commit().context(CommitSnafu)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn store() -> MetadataStore {
        MetadataStore::open_in_memory().expect("open in-memory store")
    }

    #[test]
    fn test_write_then_read() {
        let store = store();

        let mut txn = store.begin_write().unwrap();
        txn.write("table/active/abc", b"payload").unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        assert_eq!(txn.read("table/active/abc").unwrap().as_deref(), Some(&b"payload"[..]));
        assert_eq!(txn.read("table/active/zzz").unwrap(), None);
    }

    #[test]
    fn test_uncommitted_writes_are_invisible() {
        let store = store();

        let mut txn = store.begin_write().unwrap();
        txn.write("k", b"v").unwrap();
        drop(txn);

        let txn = store.begin_read().unwrap();
        assert_eq!(txn.read("k").unwrap(), None);
    }

    #[test]
    fn test_write_txn_reads_its_own_writes() {
        let store = store();

        let mut txn = store.begin_write().unwrap();
        txn.write("k", b"v").unwrap();
        assert_eq!(txn.read("k").unwrap().as_deref(), Some(&b"v"[..]));

        let mut seen = Vec::new();
        txn.read_many("", |suffix, _| {
            seen.push(suffix.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["k".to_string()]);
    }

    #[test]
    fn test_read_snapshot_isolation() {
        let store = store();

        let mut txn = store.begin_write().unwrap();
        txn.write("k", b"old").unwrap();
        txn.commit().unwrap();

        let reader = store.begin_read().unwrap();
        let mut txn = store.begin_write().unwrap();
        txn.write("k", b"new").unwrap();
        txn.commit().unwrap();

        // The earlier reader still sees the earlier committed state.
        assert_eq!(reader.read("k").unwrap().as_deref(), Some(&b"old"[..]));
    }

    #[test]
    fn test_erase() {
        let store = store();

        let mut txn = store.begin_write().unwrap();
        txn.write("k", b"v").unwrap();
        txn.commit().unwrap();

        let mut txn = store.begin_write().unwrap();
        txn.erase("k").unwrap();
        txn.erase("never-existed").unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        assert_eq!(txn.read("k").unwrap(), None);
    }

    #[test]
    fn test_read_many_yields_suffixes_in_key_order() {
        let store = store();

        let mut txn = store.begin_write().unwrap();
        txn.write("log/0000000000000002", b"b").unwrap();
        txn.write("log/0000000000000001", b"a").unwrap();
        txn.write("log/0000000000000003", b"c").unwrap();
        txn.write("other/x", b"not scanned").unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        txn.read_many("log/", &cancel, |suffix, value| {
            seen.push((suffix.to_string(), value.to_vec()));
            Ok(())
        })
        .unwrap();

        assert_eq!(
            seen,
            vec![
                ("0000000000000001".to_string(), b"a".to_vec()),
                ("0000000000000002".to_string(), b"b".to_vec()),
                ("0000000000000003".to_string(), b"c".to_vec()),
            ]
        );
    }

    #[test]
    fn test_read_many_stops_at_prefix_end() {
        let store = store();

        let mut txn = store.begin_write().unwrap();
        txn.write("a/1", b"x").unwrap();
        txn.write("a/2", b"y").unwrap();
        txn.write("b/1", b"z").unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let cancel = CancellationToken::new();
        let mut count = 0;
        txn.read_many("a/", &cancel, |_, _| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_read_many_cancellation() {
        let store = store();

        let mut txn = store.begin_write().unwrap();
        txn.write("a/1", b"x").unwrap();
        txn.write("a/2", b"y").unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = txn.read_many("a/", &cancel, |_, _| Ok(())).unwrap_err();
        assert!(err.is_interrupted());
    }

    #[test]
    fn test_on_disk_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.db");

        {
            let store = MetadataStore::open(&path).unwrap();
            let mut txn = store.begin_write().unwrap();
            txn.write("k", b"v").unwrap();
            txn.commit().unwrap();
        }

        let store = MetadataStore::open(&path).unwrap();
        let txn = store.begin_read().unwrap();
        assert_eq!(txn.read("k").unwrap().as_deref(), Some(&b"v"[..]));
    }
}
