use jiff::Timestamp;
use thiserror::Error;

/// Errors returned by Snowflake initialization and ID generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid worker id {worker_id}; expected 0..={max_worker_id}")]
    InvalidWorkerId { worker_id: u16, max_worker_id: u16 },
    #[error("clock moved backwards by {drift_ms}ms (last issued at {last}, now {now})")]
    ClockMovedBackwards {
        drift_ms: i64,
        last: Timestamp,
        now: Timestamp,
    },
    #[error("timestamp field overflowed; ids expired at {expired_at}")]
    OverTimeLimit { expired_at: Timestamp },
    #[error("generator state lock is poisoned")]
    StatePoisoned,
}

pub type Result<T> = std::result::Result<T, Error>;
