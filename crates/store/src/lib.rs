//! tabledb-store: the transactional key-value metadata store for tabledb.
//!
//! A thin adapter over redb exposing the interface the persistence layer
//! consumes:
//!
//! - One flat namespace of string keys mapping to record bytes
//! - Snapshot-isolated read transactions with key-ordered prefix scans and
//!   cancellation at scan granularity
//! - Single-writer write transactions: buffered writes and erases become
//!   durable atomically on commit
//!
//! ## Quick start
//!
//! ```no_run
//! use tabledb_store::MetadataStore;
//!
//! let store = MetadataStore::open_in_memory()?;
//!
//! let mut txn = store.begin_write()?;
//! txn.write("table/active/abc", b"record")?;
//! txn.commit()?;
//!
//! let txn = store.begin_read()?;
//! let value = txn.read("table/active/abc")?;
//! # Ok::<(), tabledb_store::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod db;
mod error;

pub use db::{MetadataStore, ReadTxn, WriteTxn};
pub use error::{Error, Result};
