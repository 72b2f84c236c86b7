use crate::{
    clock::{remaining, Clock, SystemClock},
    error::{Error, Result},
    snowflake_id::{expiry_instant, SnowflakeId, MAX_SEQUENCE, MAX_WORKER_ID},
};
use jiff::{SignedDuration, Timestamp};
use std::sync::Mutex;
use tracing::warn;
use typed_builder::TypedBuilder;

/// Configures a Snowflake generator instance.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct SnowflakeSettings {
    /// Worker id embedded in every issued id, in the range `[0, 511]`.
    #[builder]
    pub worker_id: u16,
    /// How far the wall clock may step backwards before generation fails.
    ///
    /// Smaller regressions are absorbed by waiting until the clock reaches
    /// the last issued millisecond again.
    #[builder(default = SignedDuration::from_secs(5))]
    pub max_backward_drift: SignedDuration,
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_timestamp_ms: i64,
    last_sequence: u16,
}

/// Outcome of a single non-blocking generation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenStatus {
    /// A fresh id was issued.
    Ready { id: SnowflakeId },
    /// Nothing can be issued before `until`; try again then.
    Pending { until: Timestamp },
}

/// Snowflake generator bound to a single worker id.
///
/// Every call is serialized by an internal lock, so a generator can be shared
/// across threads. Within one generator no `(timestamp, sequence)` pair is
/// issued twice, and ids never decrease while the clock does not.
pub struct Snowflake<C: Clock> {
    worker_id: u16,
    max_backward_drift_ms: i64,
    clock: C,
    state: Mutex<GeneratorState>,
}

impl Snowflake<SystemClock> {
    /// Creates a generator backed by the real system clock.
    pub fn new(settings: SnowflakeSettings) -> Result<Self> {
        Self::with_clock(settings, SystemClock)
    }
}

impl<C: Clock> Snowflake<C> {
    pub fn with_clock(settings: SnowflakeSettings, clock: C) -> Result<Self> {
        if settings.worker_id > MAX_WORKER_ID {
            return Err(Error::InvalidWorkerId {
                worker_id: settings.worker_id,
                max_worker_id: MAX_WORKER_ID,
            });
        }

        Ok(Self {
            worker_id: settings.worker_id,
            max_backward_drift_ms: settings.max_backward_drift.as_millis() as i64,
            clock,
            state: Mutex::new(GeneratorState::default()),
        })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// Attempts to issue an id without blocking.
    pub fn poll_id(&self) -> Result<IdGenStatus> {
        let mut state = self.state.lock().map_err(|_| Error::StatePoisoned)?;
        self.step(&mut state)
    }

    /// Issues the next id, blocking the calling thread while the sequence is
    /// exhausted for the current millisecond.
    pub fn next_id(&self) -> Result<SnowflakeId> {
        let mut state = self.state.lock().map_err(|_| Error::StatePoisoned)?;
        loop {
            match self.step(&mut state)? {
                IdGenStatus::Ready { id } => return Ok(id),
                IdGenStatus::Pending { until } => self.clock.wait_until(until),
            }
        }
    }

    /// Issues the next id, yielding to the runtime instead of parking the
    /// thread while waiting. Dropping the future abandons the wait.
    pub async fn next_id_async(&self) -> Result<SnowflakeId> {
        loop {
            match self.poll_id()? {
                IdGenStatus::Ready { id } => return Ok(id),
                IdGenStatus::Pending { until } => {
                    tokio::time::sleep(remaining(self.clock.now(), until)).await
                }
            }
        }
    }

    fn step(&self, state: &mut GeneratorState) -> Result<IdGenStatus> {
        let now = self.clock.now();
        let timestamp_ms = now.as_millisecond();

        let expired_at = expiry_instant();
        if now >= expired_at {
            return Err(Error::OverTimeLimit { expired_at });
        }

        if timestamp_ms < state.last_timestamp_ms {
            let drift_ms = state.last_timestamp_ms - timestamp_ms;
            let last = Timestamp::from_millisecond(state.last_timestamp_ms)
                .expect("last issued timestamp is a valid timestamp");
            if drift_ms > self.max_backward_drift_ms {
                warn!(
                    worker_id = self.worker_id,
                    drift_ms, "clock moved backwards beyond tolerance"
                );
                return Err(Error::ClockMovedBackwards { drift_ms, last, now });
            }
            warn!(
                worker_id = self.worker_id,
                drift_ms, "clock moved backwards; waiting for it to catch up"
            );
            return Ok(IdGenStatus::Pending { until: last });
        }

        let sequence = (state.last_sequence + 1) & MAX_SEQUENCE;
        if timestamp_ms == state.last_timestamp_ms && sequence <= state.last_sequence {
            // The sequence wrapped within this millisecond; move on to the next.
            let until = Timestamp::from_millisecond(timestamp_ms + 1)
                .expect("next millisecond is a valid timestamp");
            return Ok(IdGenStatus::Pending { until });
        }

        state.last_timestamp_ms = timestamp_ms;
        state.last_sequence = sequence;

        Ok(IdGenStatus::Ready {
            id: SnowflakeId::encode(timestamp_ms, self.worker_id, sequence),
        })
    }
}
