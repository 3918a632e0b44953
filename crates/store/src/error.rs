//! Error types for the metadata store adapter.

use snafu::Snafu;

/// Result type alias for metadata store operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur during metadata store operations.
///
/// Every variant except [`Error::Interrupted`] wraps a failure of the
/// underlying storage engine. None of them leave partial durable state:
/// a transaction either commits or has no effect.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The database could not be opened or created.
    #[snafu(display("failed to open metadata database: {source}"))]
    Database {
        /// The underlying redb error.
        source: redb::DatabaseError,
    },

    /// A transaction could not be started.
    #[snafu(display("failed to begin transaction: {source}"))]
    Transaction {
        /// The underlying redb error.
        source: redb::TransactionError,
    },

    /// The metadata table could not be opened.
    #[snafu(display("failed to open metadata table: {source}"))]
    Table {
        /// The underlying redb error.
        source: redb::TableError,
    },

    /// A read or write inside a transaction failed.
    #[snafu(display("storage operation failed: {source}"))]
    Storage {
        /// The underlying redb error.
        source: redb::StorageError,
    },

    /// A transaction failed to commit.
    #[snafu(display("transaction commit failed: {source}"))]
    Commit {
        /// The underlying redb error.
        source: redb::CommitError,
    },

    /// A read scan was cancelled before it finished. No side effects
    /// occurred; the caller must treat the scan as not having happened.
    #[snafu(display("metadata scan interrupted"))]
    Interrupted,
}

impl Error {
    /// Whether this error is a cancellation rather than a storage failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}
