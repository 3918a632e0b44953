//! Per-table raft log persistence and table metadata lifecycle.
//!
//! This crate persists the state of each table's replicated consensus log
//! — term, vote, commit index, log entries, and compacting snapshots — to
//! the transactional metadata store, and manages the per-table
//! active/inactive/deleted lifecycle records that reference it.
//!
//! The main pieces:
//! - [`keys`] — the flat durable key layout and the ordered log index codec
//! - [`log`] — the in-memory model: [`log::RaftLog`], [`log::LogEntry`],
//!   [`log::PersistentState`]
//! - [`storage`] — [`storage::TableRaftStorage`], the per-table durable
//!   storage interface
//! - [`persistence`] — [`persistence::TablePersistence`], the table
//!   metadata registry owning one storage interface per active table
//! - [`multistore`] — lifecycle of the per-table primary data store
//! - [`history`] — branch history records tied to a table's data store
//!
//! ## Failure policy
//!
//! Storage I/O failures are returned as [`error::Error`]; the triggering
//! transaction never commits, so durable state stays consistent and the
//! in-memory mirrors stay at the last committed operation. Corrupt durable
//! data and violated caller invariants abort the process: they are defined
//! never to occur absent a bug or disk corruption, and no recovery path
//! exists for them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod history;
pub mod keys;
pub mod log;
pub mod multistore;
pub mod persistence;
pub mod records;
pub mod storage;

pub use error::{Error, Result};
pub use log::{Change, LogEntry, PersistentState, RaftLog};
pub use multistore::{DataEngine, TableDataStore};
pub use persistence::{ActiveTableState, InactiveTableState, TablePersistence};
pub use records::{StoredHeader, StoredSnapshot, VersionedUserData};
pub use storage::TableRaftStorage;
