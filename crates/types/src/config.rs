//! Table configuration model carried by the replicated state machine.
//!
//! These are the concrete types whose fields exercise on-disk schema
//! evolution: `durability` exists only since format v2, and `user_data`
//! exists only in extension side records — its primary encoding is
//! zero-length under every format version, so deployments that predate it
//! read and write these records unchanged.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::codec::{read_field, write_field, CodecError};
use crate::ids::{DatabaseId, EpochId, MemberId, ServerId};
use crate::versioned::{Version, VersionedRecord};

/// Free-form per-table key/value settings owned by the user.
///
/// Defaults to an empty map, never to an absent value, so that a config
/// written by a deployment without the extension concept reads back as "no
/// settings" rather than as a distinguishable null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData(pub BTreeMap<String, String>);

impl UserData {
    /// Looks up one setting.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Inserts one setting, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }
}

impl VersionedRecord for UserData {
    fn encode_fields(&self, version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        match version {
            // Primary encodings carry no user data at any version; the real
            // value travels in the extension side record.
            Version::V1 | Version::V2 => Ok(()),
            Version::Ext => write_field(buf, &self.0),
        }
    }

    fn decode_fields(version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError> {
        match version {
            Version::V1 | Version::V2 => Ok(Self::default()),
            Version::Ext => Ok(Self(read_field(bytes)?)),
        }
    }
}

/// Identity of a table: what it is called and where it lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableBasicConfig {
    /// Table name, unique within its database.
    pub name: String,
    /// Owning database.
    pub database: DatabaseId,
    /// Name of the primary key field.
    pub primary_key: String,
}

/// Replica placement for one shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardReplicas {
    /// Every server holding a replica of this shard.
    pub all_replicas: BTreeSet<ServerId>,
    /// Replicas that do not vote in consensus.
    pub nonvoting_replicas: BTreeSet<ServerId>,
    /// The server acting as primary for this shard.
    pub primary_replica: ServerId,
}

/// Write durability mode. Exists on disk since format v2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Durability {
    /// Writes are acknowledged only once flushed.
    #[default]
    Hard,
    /// Writes may be acknowledged before they are flushed.
    Soft,
}

/// Full user-visible configuration of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableConfig {
    /// Name, database, primary key.
    pub basic: TableBasicConfig,
    /// Per-shard replica placement.
    pub shards: Vec<ShardReplicas>,
    /// Durability mode. Since v2; defaults to [`Durability::Hard`] when read
    /// from a v1 record.
    pub durability: Durability,
    /// User settings. Extension-only; zero-length in primary encodings.
    pub user_data: UserData,
}

impl VersionedRecord for TableConfig {
    fn encode_fields(&self, version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        if version.is_extension() {
            return Err(CodecError::VersionClass { tag: version.tag() });
        }
        write_field(buf, &self.basic)?;
        write_field(buf, &self.shards)?;
        match version {
            Version::V1 => {}
            Version::V2 | Version::Ext => write_field(buf, &self.durability)?,
        }
        self.user_data.encode_fields(version, buf)
    }

    fn decode_fields(version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError> {
        if version.is_extension() {
            return Err(CodecError::VersionClass { tag: version.tag() });
        }
        let basic = read_field(bytes)?;
        let shards = read_field(bytes)?;
        let durability = match version {
            Version::V1 => Durability::default(),
            Version::V2 | Version::Ext => read_field(bytes)?,
        };
        let user_data = UserData::decode_fields(version, bytes)?;
        Ok(Self { basic, shards, durability, user_data })
    }
}

/// Shard boundaries: an ordered sequence of split-point keys. The keys are
/// opaque here; N split points define N+1 shards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardScheme {
    /// Boundary keys in ascending order.
    pub split_points: Vec<Vec<u8>>,
}

impl ShardScheme {
    /// A scheme with a single shard covering the whole key space.
    pub fn one_shard() -> Self {
        Self::default()
    }

    /// Number of shards this scheme defines.
    pub fn shard_count(&self) -> usize {
        self.split_points.len() + 1
    }
}

/// The replicated state machine's state as carried by snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRaftState {
    /// Current table configuration.
    pub config: TableConfig,
    /// Current shard boundaries.
    pub shard_scheme: ShardScheme,
    /// Raft member identity per participating server for the current epoch.
    pub members: BTreeMap<ServerId, MemberId>,
}

impl VersionedRecord for TableRaftState {
    fn encode_fields(&self, version: Version, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.config.encode_fields(version, buf)?;
        write_field(buf, &self.shard_scheme)?;
        write_field(buf, &self.members)
    }

    fn decode_fields(version: Version, bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let config = TableConfig::decode_fields(version, bytes)?;
        let shard_scheme = read_field(bytes)?;
        let members = read_field(bytes)?;
        Ok(Self { config, shard_scheme, members })
    }
}

/// One raft membership set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Members that vote.
    pub voting: BTreeSet<MemberId>,
    /// Members that replicate but do not vote.
    pub learners: BTreeSet<MemberId>,
}

/// Cluster configuration as stored with a snapshot. `joint` is present while
/// a membership change is in flight (joint consensus).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// The committed membership.
    pub current: RaftConfig,
    /// The target membership during a joint-consensus transition.
    pub joint: Option<RaftConfig>,
}

/// Orders table activations. A higher timestamp wins; the id breaks ties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEpoch {
    /// Activation time, microseconds since the epoch.
    pub timestamp: u64,
    /// Tie-breaker.
    pub id: EpochId,
}

impl TableEpoch {
    /// Whether this epoch supersedes `other`.
    pub fn supersedes(&self, other: &TableEpoch) -> bool {
        if self.timestamp != other.timestamp {
            return self.timestamp > other.timestamp;
        }
        self.id > other.id
    }
}

/// How often a table's writes are flushed to disk, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushInterval(pub i64);

/// Flush interval applied when the user has not configured one.
pub const DEFAULT_FLUSH_INTERVAL_MS: i64 = 1_000;

/// Sentinel meaning "never flush on a timer". Also the cap for configured
/// values, chosen so a millisecond count never overflows when converted to
/// nanoseconds.
pub const NEVER_FLUSH_INTERVAL_MS: i64 = 0x1_0000_0000 * 1000;

/// Reads the flush interval from a table's user settings.
///
/// The `"flush_interval"` entry is either a number of seconds or the string
/// `"never"`. Missing, unparseable, or non-positive values fall back to the
/// default; values at or beyond the never-flush sentinel mean never flush.
pub fn flush_interval(config: &TableConfig) -> FlushInterval {
    let Some(raw) = config.user_data.get("flush_interval") else {
        return FlushInterval(DEFAULT_FLUSH_INTERVAL_MS);
    };

    if raw == "never" {
        return FlushInterval(NEVER_FLUSH_INTERVAL_MS);
    }

    match raw.parse::<f64>() {
        Ok(seconds) => {
            let value_ms = seconds * 1000.0;
            if value_ms <= 0.0 {
                FlushInterval(DEFAULT_FLUSH_INTERVAL_MS)
            } else if value_ms >= NEVER_FLUSH_INTERVAL_MS as f64 {
                FlushInterval(NEVER_FLUSH_INTERVAL_MS)
            } else {
                FlushInterval(value_ms.ceil() as i64)
            }
        }
        Err(_) => FlushInterval(DEFAULT_FLUSH_INTERVAL_MS),
    }
}
