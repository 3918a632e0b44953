//! Error types for the table persistence crate using snafu.
//!
//! Only recoverable failures appear here: metadata store I/O and record
//! encoding. Corruption of durable data (malformed keys, undecodable
//! records, a non-contiguous log) and violated caller invariants are fatal
//! by design — they abort the process at the point of detection, because
//! that data is defined never to occur absent a bug or disk corruption and
//! no recovery path exists.

use snafu::Snafu;

use tabledb_types::CodecError;

/// Result type alias for persistence operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur during persistence operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A metadata store operation failed. The triggering transaction did
    /// not commit, so no partial durable state results.
    #[snafu(context(false))]
    #[snafu(display("metadata store operation failed: {source}"))]
    Store {
        /// The underlying store error.
        source: tabledb_store::Error,
    },

    /// A record could not be encoded for writing.
    #[snafu(display("failed to encode record for key {key}: {source}"))]
    EncodeRecord {
        /// The durable key the record was being written to.
        key: String,
        /// The underlying codec error.
        source: CodecError,
    },
}

impl Error {
    /// Whether this error is a read-scan cancellation rather than a
    /// storage failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Store { source } if source.is_interrupted())
    }
}
