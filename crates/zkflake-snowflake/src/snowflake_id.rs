use jiff::Timestamp;
use modular_bitfield::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Reference instant for the timestamp field, in Unix milliseconds
/// (2015-09-07T10:33:54.706Z).
pub const EPOCH_MS: i64 = 1_441_622_034_706;

pub const TIMESTAMP_BITS: u32 = 42;
pub const WORKER_ID_BITS: u32 = 9;
pub const SEQUENCE_BITS: u32 = 12;

const TIMESTAMP_SPAN: i64 = 1 << TIMESTAMP_BITS;
const WORKER_ID_SPAN: u16 = 1 << WORKER_ID_BITS;
const SEQUENCE_SPAN: u16 = 1 << SEQUENCE_BITS;

pub const MAX_WORKER_ID: u16 = WORKER_ID_SPAN - 1;
pub const MAX_SEQUENCE: u16 = SEQUENCE_SPAN - 1;

/// A 64-bit Snowflake identifier.
///
/// Fields are laid out from the least significant bit upwards; the top bit is
/// reserved so the value stays non-negative as an `i64`.
#[bitfield]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnowflakeId {
    /// 12 bits for the intra-millisecond sequence.
    pub sequence: B12,
    /// 9 bits for the worker id assigned to the issuing process.
    pub worker_id: B9,
    /// 42 bits for milliseconds elapsed since [`EPOCH_MS`].
    pub timestamp: B42,
    #[skip]
    __: B1,
}

impl SnowflakeId {
    /// Packs the three components into an id.
    ///
    /// Every input is reduced modulo its field width instead of being
    /// rejected, so out-of-range values wrap silently. Validate beforehand if
    /// that matters.
    pub fn encode(timestamp_ms: i64, worker_id: u16, sequence: u16) -> Self {
        let elapsed = (timestamp_ms - EPOCH_MS).rem_euclid(TIMESTAMP_SPAN) as u64;
        SnowflakeId::new()
            .with_sequence(sequence % SEQUENCE_SPAN)
            .with_worker_id(worker_id % WORKER_ID_SPAN)
            .with_timestamp(elapsed)
    }

    /// Splits the id back into `(timestamp_ms, worker_id, sequence)`, with the
    /// timestamp offset back to Unix milliseconds.
    pub fn decode(self) -> (i64, u16, u16) {
        (self.timestamp_ms(), self.worker_id(), self.sequence())
    }

    /// Unix milliseconds at which this id was issued.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp() as i64 + EPOCH_MS
    }

    pub fn issued_at(&self) -> Timestamp {
        Timestamp::from_millisecond(self.timestamp_ms())
            .expect("42-bit timestamp past the epoch is within jiff's range")
    }

    pub fn from_i64(value: i64) -> Self {
        SnowflakeId::from_bytes(value.to_le_bytes())
    }

    pub fn to_i64(self) -> i64 {
        i64::from_le_bytes(self.into_bytes())
    }
}

impl From<SnowflakeId> for i64 {
    fn from(id: SnowflakeId) -> Self {
        id.to_i64()
    }
}

impl From<i64> for SnowflakeId {
    fn from(value: i64) -> Self {
        SnowflakeId::from_i64(value)
    }
}

impl PartialOrd for SnowflakeId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SnowflakeId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_i64().cmp(&other.to_i64())
    }
}

impl fmt::Debug for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeId")
            .field("timestamp", &self.timestamp())
            .field("worker_id", &self.worker_id())
            .field("sequence", &self.sequence())
            .finish()
    }
}

impl fmt::Display for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_i64())
    }
}

impl Serialize for SnowflakeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.to_i64())
    }
}

impl<'de> Deserialize<'de> for SnowflakeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        if raw < 0 {
            return Err(serde::de::Error::invalid_value(
                serde::de::Unexpected::Signed(raw),
                &"a non-negative snowflake id",
            ));
        }
        Ok(SnowflakeId::from_i64(raw))
    }
}

/// The largest value the codec can represent.
pub const fn max_id() -> i64 {
    ((TIMESTAMP_SPAN - 1) << (WORKER_ID_BITS + SEQUENCE_BITS))
        + ((WORKER_ID_SPAN as i64 - 1) << SEQUENCE_BITS)
        + (SEQUENCE_SPAN as i64 - 1)
}

/// The instant the timestamp field overflows.
///
/// Ids issued at or after this point wrap around and may collide with ids
/// issued right after [`EPOCH_MS`]. This is a hard lifetime bound on every
/// deployment using this layout.
pub fn expiry_instant() -> Timestamp {
    Timestamp::from_millisecond(EPOCH_MS + TIMESTAMP_SPAN)
        .expect("epoch plus 2^42 ms is within jiff's range")
}

/// Informational summary of the codec: a sample round trip, the largest id
/// and the overflow instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub sample: SnowflakeId,
    pub decoded: (i64, u16, u16),
    pub max_id: i64,
    pub expires_at: Timestamp,
}

impl Diagnostics {
    pub fn capture(now: Timestamp) -> Self {
        let sample = SnowflakeId::encode(now.as_millisecond(), 1, 2);
        Self {
            sample,
            decoded: sample.decode(),
            max_id: max_id(),
            expires_at: expiry_instant(),
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (timestamp_ms, worker_id, sequence) = self.decoded;
        writeln!(f, "sample id: {}", self.sample)?;
        writeln!(
            f,
            "decoded: timestamp_ms={timestamp_ms} worker_id={worker_id} sequence={sequence}"
        )?;
        writeln!(f, "max id: {}", self.max_id)?;
        write!(f, "layout expires at: {}", self.expires_at)
    }
}
