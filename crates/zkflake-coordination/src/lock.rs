use crate::coordinator::{Coordinator, CreateMode};
use crate::error::{CoordinationError, Result};
use crate::path::name;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const LOCK_PREFIX: &str = "lock-";
/// Deletes [`DistributedLock::release`] tries before giving up.
pub const RELEASE_ATTEMPTS: u32 = 3;
const RELEASE_BACKOFF: Duration = Duration::from_millis(20);

/// A mutual-exclusion lock shared by every session of the coordination
/// service.
///
/// Contenders queue up as ephemeral sequential children of the lock path.
/// The lowest sequence holds the lock and everyone else waits for their
/// immediate predecessor to disappear, so a release wakes exactly one waiter.
/// A holder whose session dies releases the lock implicitly.
///
/// The lock path itself must already exist.
///
/// Dropping a held lock without [`release`](Self::release) schedules the
/// node's deletion on the current tokio runtime, if there is one.
pub struct DistributedLock {
    coordinator: Arc<dyn Coordinator>,
    path: String,
    held: Option<String>,
}

impl DistributedLock {
    pub fn new(coordinator: Arc<dyn Coordinator>, path: impl Into<String>) -> Self {
        Self {
            coordinator,
            path: path.into(),
            held: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Blocks until the lock is held. There is no timeout.
    pub async fn acquire(&mut self) -> Result<()> {
        if self.held.is_some() {
            return Ok(());
        }

        let node = self
            .coordinator
            .create(
                &format!("{}/{LOCK_PREFIX}", self.path),
                &[],
                CreateMode::EphemeralSequential,
            )
            .await?;

        match self.wait_for_turn(&node).await {
            Ok(()) => {
                debug!(lock = %self.path, node = %node, "acquired distributed lock");
                self.held = Some(node);
                Ok(())
            }
            Err(e) => {
                // leave the queue so nobody waits on us
                if let Err(cleanup) = self.coordinator.delete(&node).await {
                    warn!(node = %node, error = %cleanup, "failed to withdraw lock node");
                }
                Err(e)
            }
        }
    }

    async fn wait_for_turn(&self, node: &str) -> Result<()> {
        let own = name(node);
        loop {
            let mut contenders: Vec<(u64, String)> = self
                .coordinator
                .children(&self.path)
                .await?
                .into_iter()
                .filter_map(|child| sequence_of(&child).map(|sequence| (sequence, child)))
                .collect();
            contenders.sort();

            let position = contenders
                .iter()
                .position(|(_, child)| child == own)
                .ok_or_else(|| CoordinationError::LockLost(node.to_string()))?;
            if position == 0 {
                return Ok(());
            }

            let predecessor = format!("{}/{}", self.path, contenders[position - 1].1);
            debug!(lock = %self.path, waiting_on = %predecessor, "waiting for distributed lock");
            self.coordinator.wait_deleted(&predecessor).await?;
        }
    }

    /// Releases the lock if held. A lock node that is already gone, or whose
    /// session has expired, counts as released.
    ///
    /// Failed deletes are retried a few times. If they keep failing the lock
    /// stays held, and calling `release` again retries.
    pub async fn release(&mut self) -> Result<()> {
        let Some(node) = self.held.clone() else {
            return Ok(());
        };

        let mut attempt = 1;
        loop {
            match self.coordinator.delete(&node).await {
                Ok(()) | Err(CoordinationError::NoNode(_) | CoordinationError::SessionExpired) => {
                    debug!(lock = %self.path, node = %node, "released distributed lock");
                    self.held = None;
                    return Ok(());
                }
                Err(e) if attempt >= RELEASE_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(node = %node, attempt, error = %e, "failed to delete lock node; retrying");
                    tokio::time::sleep(RELEASE_BACKOFF * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        let Some(node) = self.held.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(node = %node, "lock dropped outside a runtime; node lives until its session ends");
            return;
        };
        let coordinator = Arc::clone(&self.coordinator);
        runtime.spawn(async move {
            match coordinator.delete(&node).await {
                Ok(()) | Err(CoordinationError::NoNode(_) | CoordinationError::SessionExpired) => {
                    debug!(node = %node, "released dropped distributed lock");
                }
                Err(e) => warn!(node = %node, error = %e, "failed to release dropped lock"),
            }
        });
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("path", &self.path)
            .field("held", &self.held)
            .finish()
    }
}

fn sequence_of(child: &str) -> Option<u64> {
    child.strip_prefix(LOCK_PREFIX)?.parse().ok()
}
