//! Identifier newtypes used across the persistence crates.
//!
//! All ids are UUIDs; the canonical string form (lowercase hyphenated) is
//! what appears in durable metadata keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raft term counter. Monotonic per table.
pub type Term = u64;

/// Position of an entry in a table's replicated log, 1-based.
pub type LogIndex = u64;

/// Generates a newtype wrapper around [`Uuid`] for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `Display`/`FromStr` using the canonical hyphenated form
/// - `new()`, `random()`, and `nil()` constructors and a `uuid()` accessor
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates an identifier from a raw UUID.
            #[inline]
            pub const fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Creates a fresh random (v4) identifier.
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            /// The all-zero identifier.
            #[inline]
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Returns the raw UUID.
            #[inline]
            pub const fn uuid(self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Identifies one replicated table.
    TableId
);

define_id!(
    /// Identifies the database a table belongs to.
    DatabaseId
);

define_id!(
    /// Identifies a physical server in the cluster.
    ServerId
);

define_id!(
    /// Identifies a raft member. Regenerated whenever a table enters a new
    /// epoch, so stale members from a previous epoch can never vote.
    MemberId
);

define_id!(
    /// Identifies one branch in a table's data-store history.
    BranchId
);

define_id!(
    /// Tie-breaker component of a table activation epoch.
    EpochId
);
