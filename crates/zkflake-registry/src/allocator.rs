use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use zkflake_coordination::{ensure_path, Coordinator, CreateMode, DistributedLock, NamespacePaths};
use zkflake_snowflake::MAX_WORKER_ID;

/// Lowest worker id handed out by the allocator. `0` is never assigned.
pub const FIRST_WORKER_ID: u16 = 1;

/// Picks the worker id for a newcomer, given the ids currently alive.
///
/// - nothing alive: [`FIRST_WORKER_ID`]
/// - a hole between two live ids: the lowest such hole
/// - otherwise one past the highest live id, while that stays in range
/// - at the ceiling with room below the lowest live id: [`FIRST_WORKER_ID`]
///
/// Returns `None` once every id in `[FIRST_WORKER_ID, MAX_WORKER_ID]` is
/// taken.
pub fn next_worker_id(live: &[u16]) -> Option<u16> {
    let mut ids = live.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let (&lowest, &highest) = match (ids.first(), ids.last()) {
        (Some(lowest), Some(highest)) => (lowest, highest),
        _ => return Some(FIRST_WORKER_ID),
    };

    if let Some(hole) = ids
        .windows(2)
        .find(|pair| pair[1] != pair[0] + 1)
        .map(|pair| pair[0] + 1)
    {
        return Some(hole);
    }
    if highest < MAX_WORKER_ID {
        return Some(highest + 1);
    }
    if lowest > FIRST_WORKER_ID {
        return Some(FIRST_WORKER_ID);
    }
    None
}

/// A worker id claimed for one namespace.
///
/// The claim lives exactly as long as the coordination session that created
/// `node_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLease {
    pub namespace: String,
    pub worker_id: u16,
    pub node_path: String,
}

/// Claims worker ids that are unique among all live sessions sharing a
/// namespace.
///
/// Locks whose release failed are kept and released again before the next
/// allocation queues up. Until that succeeds, allocations fail fast with
/// [`Error::LockRelease`] rather than wait behind their own session's node.
pub struct WorkerIdAllocator {
    coordinator: Arc<dyn Coordinator>,
    stranded: Mutex<Vec<DistributedLock>>,
}

impl WorkerIdAllocator {
    pub fn new(coordinator: Arc<dyn Coordinator>) -> Self {
        Self {
            coordinator,
            stranded: Mutex::new(Vec::new()),
        }
    }

    /// Runs the allocation protocol for `namespace`.
    ///
    /// Ensures the namespace paths, takes the namespace lock, reads the live
    /// worker nodes, creates an ephemeral node for the chosen id and releases
    /// the lock. Blocks for as long as the lock is contended.
    ///
    /// The lock is released on every path out of the critical section. If
    /// the release itself fails, the freshly created worker node is deleted
    /// again, so a failed allocation never holds a worker id.
    #[instrument(skip(self))]
    pub async fn allocate(&self, namespace: &str) -> Result<WorkerLease> {
        let paths = NamespacePaths::for_namespace(namespace).map_err(Error::InvalidNamespace)?;
        self.release_stranded().await?;

        for path in [paths.lock_path(), paths.node_path()] {
            ensure_path(self.coordinator.as_ref(), path)
                .await
                .map_err(|source| Error::PathEnsure {
                    path: path.to_string(),
                    source,
                })?;
        }

        let mut lock = DistributedLock::new(Arc::clone(&self.coordinator), paths.lock_path());
        lock.acquire().await.map_err(|source| Error::LockAcquire {
            path: paths.lock_path().to_string(),
            source,
        })?;

        let claimed = self.claim(&paths).await;
        if let Err(source) = lock.release().await {
            if let Ok(worker_id) = claimed {
                self.withdraw(&paths.worker_node(worker_id)).await;
            }
            warn!(lock = %paths.lock_path(), error = %source, "keeping unreleased lock for a later retry");
            self.stranded.lock().await.push(lock);
            return Err(match claimed {
                Err(e) => e,
                Ok(_) => Error::LockRelease {
                    path: paths.lock_path().to_string(),
                    source,
                },
            });
        }
        let worker_id = claimed?;

        info!(namespace, worker_id, "allocated worker id");
        Ok(WorkerLease {
            namespace: namespace.to_string(),
            worker_id,
            node_path: paths.worker_node(worker_id),
        })
    }

    async fn claim(&self, paths: &NamespacePaths) -> Result<u16> {
        let children = self
            .coordinator
            .children(paths.node_path())
            .await
            .map_err(|source| Error::ChildrenList {
                path: paths.node_path().to_string(),
                source,
            })?;
        let live = parse_worker_ids(paths.node_path(), &children);

        let worker_id = next_worker_id(&live).ok_or_else(|| Error::WorkerIdSpaceExhausted {
            namespace: paths.namespace().to_string(),
            live: live.len(),
        })?;

        // the node's payload names the owning process, for operators
        let node = paths.worker_node(worker_id);
        let owner = std::process::id().to_string();
        self.coordinator
            .create(&node, owner.as_bytes(), CreateMode::Ephemeral)
            .await
            .map_err(|source| Error::NodeCreate { path: node, source })?;

        Ok(worker_id)
    }

    async fn release_stranded(&self) -> Result<()> {
        let mut stranded = self.stranded.lock().await;
        let mut failed = None;
        let mut remaining = Vec::new();
        for mut lock in stranded.drain(..) {
            match lock.release().await {
                Ok(()) => info!(lock = %lock.path(), "released previously stranded lock"),
                Err(source) => {
                    failed.get_or_insert_with(|| Error::LockRelease {
                        path: lock.path().to_string(),
                        source,
                    });
                    remaining.push(lock);
                }
            }
        }
        *stranded = remaining;
        failed.map_or(Ok(()), Err)
    }

    async fn withdraw(&self, node: &str) {
        match self.coordinator.delete(node).await {
            Ok(()) => info!(node, "withdrew worker node of failed allocation"),
            Err(e) => warn!(node, error = %e, "worker node stays until the session ends"),
        }
    }
}

/// Worker ids encoded in the child names under `node_path`. Names that are
/// not an in-range decimal id are skipped.
fn parse_worker_ids(node_path: &str, children: &[String]) -> Vec<u16> {
    children
        .iter()
        .filter_map(|child| match child.parse::<u16>() {
            Ok(id) if id <= MAX_WORKER_ID => Some(id),
            _ => {
                warn!(node_path, child = %child, "ignoring unexpected worker node");
                None
            }
        })
        .collect()
}
