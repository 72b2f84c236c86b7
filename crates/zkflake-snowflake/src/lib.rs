//! Snowflake id layout and the per-process sequencer.
//!
//! An id packs a 42-bit millisecond timestamp, a 9-bit worker id and a 12-bit
//! sequence into a non-negative `i64`. See [`SnowflakeId`] for the codec and
//! [`Snowflake`] for the generator.

mod clock;
pub mod error;
mod snowflake;
mod snowflake_id;

pub use clock::{Clock, SystemClock};
pub use error::{Error, Result};
pub use snowflake::{IdGenStatus, Snowflake, SnowflakeSettings};
pub use snowflake_id::{
    expiry_instant, max_id, Diagnostics, SnowflakeId, EPOCH_MS, MAX_SEQUENCE, MAX_WORKER_ID,
    SEQUENCE_BITS, TIMESTAMP_BITS, WORKER_ID_BITS,
};
