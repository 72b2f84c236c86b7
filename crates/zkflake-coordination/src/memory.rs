use crate::coordinator::{ConnectSettings, Connector, Coordinator, CreateMode};
use crate::error::{CoordinationError, Result};
use crate::path::{name, parent, validate_path};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

type SessionId = u64;

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    owner: Option<SessionId>,
    children: BTreeSet<String>,
    next_sequence: u64,
}

impl Node {
    fn new(data: &[u8], owner: Option<SessionId>) -> Self {
        Self {
            data: data.to_vec(),
            owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<String, Node>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::new(&[], None));
        Self { nodes }
    }

    fn create(
        &mut self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        session: SessionId,
    ) -> Result<String> {
        validate_path(path)?;
        let parent_path = parent(path).ok_or_else(|| CoordinationError::NodeExists("/".into()))?;
        let parent_node = self
            .nodes
            .get_mut(parent_path)
            .ok_or_else(|| CoordinationError::NoNode(parent_path.to_string()))?;
        if parent_node.owner.is_some() {
            return Err(CoordinationError::Operation(format!(
                "ephemeral node {parent_path} cannot have children"
            )));
        }

        let full = match mode {
            CreateMode::EphemeralSequential => {
                let sequence = parent_node.next_sequence;
                parent_node.next_sequence += 1;
                format!("{path}{sequence:010}")
            }
            CreateMode::Persistent | CreateMode::Ephemeral => path.to_string(),
        };
        if parent_node.children.contains(name(&full)) {
            return Err(CoordinationError::NodeExists(full));
        }
        parent_node.children.insert(name(&full).to_string());

        let owner = mode.is_ephemeral().then_some(session);
        self.nodes.insert(full.clone(), Node::new(data, owner));
        Ok(full)
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        validate_path(path)?;
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
        if !node.children.is_empty() {
            return Err(CoordinationError::NotEmpty(path.to_string()));
        }
        let Some(parent_path) = parent(path) else {
            return Err(CoordinationError::InvalidPath("cannot delete the root".into()));
        };

        self.nodes.remove(path);
        if let Some(parent_node) = self.nodes.get_mut(parent_path) {
            parent_node.children.remove(name(path));
        }
        Ok(())
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        validate_path(path)?;
        self.nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    /// Removes every ephemeral node owned by `session`.
    fn expire(&mut self, session: SessionId) -> usize {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            // ephemeral nodes never have children, so this cannot fail
            let _ = self.delete(path);
        }
        owned.len()
    }
}

struct Shared {
    tree: Mutex<Tree>,
    changes: watch::Sender<u64>,
    next_session: AtomicU64,
}

impl Shared {
    fn mutate<T>(&self, op: impl FnOnce(&mut Tree) -> Result<T>) -> Result<T> {
        let result = {
            let mut tree = self.tree.lock();
            op(&mut tree)
        };
        if result.is_ok() {
            self.changes.send_modify(|version| *version = version.wrapping_add(1));
        }
        result
    }
}

/// An in-process stand-in for a coordination service ensemble.
///
/// Every [`InMemorySession`] opened on the same ensemble sees the same tree,
/// so several sessions behave like several processes sharing one service.
/// Closing or dropping a session removes its ephemeral nodes, which is how a
/// crashed process looks to its peers.
#[derive(Clone)]
pub struct InMemoryEnsemble {
    shared: Arc<Shared>,
}

impl InMemoryEnsemble {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                tree: Mutex::new(Tree::new()),
                changes,
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Opens a new session on this ensemble.
    pub fn session(&self) -> InMemorySession {
        let id = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = id, "opened in-memory coordination session");
        InMemorySession {
            id,
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Payload of the node at `path`, if it exists.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.shared
            .tree
            .lock()
            .nodes
            .get(path)
            .map(|node| node.data.clone())
    }

    /// Total number of nodes, the root included.
    pub fn node_count(&self) -> usize {
        self.shared.tree.lock().nodes.len()
    }
}

impl Default for InMemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEnsemble")
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[async_trait]
impl Connector for InMemoryEnsemble {
    async fn connect(&self, settings: &ConnectSettings) -> Result<Arc<dyn Coordinator>> {
        settings.validate()?;
        Ok(Arc::new(self.session()))
    }
}

/// A session operation that can be made to fail with
/// [`InMemorySession::inject_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOp {
    Create,
    Delete,
    Children,
}

#[derive(Debug)]
struct Fault {
    op: SessionOp,
    path_prefix: String,
    remaining: usize,
}

/// One client session on an [`InMemoryEnsemble`].
pub struct InMemorySession {
    id: SessionId,
    shared: Arc<Shared>,
    closed: AtomicBool,
    faults: Mutex<Vec<Fault>>,
}

impl InMemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ends the session and removes its ephemeral nodes. Further operations
    /// fail with [`CoordinationError::SessionExpired`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let removed = self
            .shared
            .mutate(|tree| Ok(tree.expire(self.id)))
            .unwrap_or_default();
        debug!(session_id = self.id, removed, "closed in-memory coordination session");
    }

    /// Makes the next `times` calls of `op` on paths starting with
    /// `path_prefix` fail with [`CoordinationError::Operation`], the way a
    /// dropped connection would. The tree is left untouched.
    pub fn inject_failure(&self, op: SessionOp, path_prefix: impl Into<String>, times: usize) {
        self.faults.lock().push(Fault {
            op,
            path_prefix: path_prefix.into(),
            remaining: times,
        });
    }

    fn check_fault(&self, op: SessionOp, path: &str) -> Result<()> {
        let mut faults = self.faults.lock();
        let Some(fault) = faults
            .iter_mut()
            .find(|fault| fault.op == op && fault.remaining > 0 && path.starts_with(&fault.path_prefix))
        else {
            return Ok(());
        };
        fault.remaining -= 1;
        Err(CoordinationError::Operation(format!(
            "connection loss during {op:?} on {path}"
        )))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(CoordinationError::SessionExpired)
        } else {
            Ok(())
        }
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for InMemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySession")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Coordinator for InMemorySession {
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        self.ensure_open()?;
        self.check_fault(SessionOp::Create, path)?;
        self.shared
            .mutate(|tree| tree.create(path, data, mode, self.id))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.ensure_open()?;
        self.check_fault(SessionOp::Delete, path)?;
        self.shared.mutate(|tree| tree.delete(path))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.check_fault(SessionOp::Children, path)?;
        self.shared.tree.lock().children(path)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.ensure_open()?;
        validate_path(path)?;
        Ok(self.shared.tree.lock().nodes.contains_key(path))
    }

    async fn wait_deleted(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut changes = self.shared.changes.subscribe();
        loop {
            self.ensure_open()?;
            let present = { self.shared.tree.lock().nodes.contains_key(path) };
            if !present {
                return Ok(());
            }
            changes
                .changed()
                .await
                .map_err(|_| CoordinationError::SessionExpired)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn create_requires_parent() {
        let ensemble = InMemoryEnsemble::new();
        let session = ensemble.session();
        assert_eq!(
            session.create("/a/b", b"", CreateMode::Persistent).await,
            Err(CoordinationError::NoNode("/a".to_string()))
        );
    }

    #[tokio::test]
    async fn duplicate_create_reports_exists() {
        let ensemble = InMemoryEnsemble::new();
        let session = ensemble.session();
        session.create("/a", b"", CreateMode::Persistent).await.unwrap();
        assert_eq!(
            session.create("/a", b"", CreateMode::Persistent).await,
            Err(CoordinationError::NodeExists("/a".to_string()))
        );
    }

    #[tokio::test]
    async fn sequential_nodes_get_padded_suffix() {
        let ensemble = InMemoryEnsemble::new();
        let session = ensemble.session();
        session.create("/l", b"", CreateMode::Persistent).await.unwrap();

        let first = session
            .create("/l/lock-", b"", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        let second = session
            .create("/l/lock-", b"", CreateMode::EphemeralSequential)
            .await
            .unwrap();

        assert_eq!(first, "/l/lock-0000000000");
        assert_eq!(second, "/l/lock-0000000001");
        assert_eq!(
            session.children("/l").await.unwrap(),
            vec!["lock-0000000000", "lock-0000000001"]
        );
    }

    #[tokio::test]
    async fn delete_refuses_non_empty_nodes() {
        let ensemble = InMemoryEnsemble::new();
        let session = ensemble.session();
        session.create("/a", b"", CreateMode::Persistent).await.unwrap();
        session.create("/a/b", b"", CreateMode::Persistent).await.unwrap();

        assert_eq!(
            session.delete("/a").await,
            Err(CoordinationError::NotEmpty("/a".to_string()))
        );
        session.delete("/a/b").await.unwrap();
        session.delete("/a").await.unwrap();
        assert!(!session.exists("/a").await.unwrap());
    }

    #[tokio::test]
    async fn closing_session_drops_only_its_ephemerals() {
        let ensemble = InMemoryEnsemble::new();
        let alive = ensemble.session();
        let doomed = ensemble.session();
        alive.create("/n", b"", CreateMode::Persistent).await.unwrap();
        alive.create("/n/1", b"", CreateMode::Ephemeral).await.unwrap();
        doomed.create("/n/2", b"", CreateMode::Ephemeral).await.unwrap();

        doomed.close();

        assert_eq!(alive.children("/n").await.unwrap(), vec!["1"]);
        assert_eq!(
            doomed.children("/n").await,
            Err(CoordinationError::SessionExpired)
        );
    }

    #[tokio::test]
    async fn ephemeral_nodes_cannot_have_children() {
        let ensemble = InMemoryEnsemble::new();
        let session = ensemble.session();
        session.create("/e", b"", CreateMode::Ephemeral).await.unwrap();
        assert!(matches!(
            session.create("/e/x", b"", CreateMode::Persistent).await,
            Err(CoordinationError::Operation(_))
        ));
    }

    #[tokio::test]
    async fn wait_deleted_wakes_on_session_end() {
        let ensemble = InMemoryEnsemble::new();
        let watcher = ensemble.session();
        let holder = ensemble.session();
        holder.create("/held", b"", CreateMode::Ephemeral).await.unwrap();

        let waiting = tokio::spawn(async move { watcher.wait_deleted("/held").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(holder);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("waiter should wake up")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn node_data_is_readable() {
        let ensemble = InMemoryEnsemble::new();
        let session = ensemble.session();
        session.create("/d", b"4242", CreateMode::Persistent).await.unwrap();
        assert_eq!(ensemble.data("/d"), Some(b"4242".to_vec()));
        assert_eq!(ensemble.data("/missing"), None);
    }

    #[tokio::test]
    async fn injected_failures_are_counted_and_scoped() {
        let ensemble = InMemoryEnsemble::new();
        let session = ensemble.session();
        session.create("/a", b"", CreateMode::Persistent).await.unwrap();
        session.create("/b", b"", CreateMode::Persistent).await.unwrap();
        session.inject_failure(SessionOp::Delete, "/a", 2);

        for _ in 0..2 {
            assert!(matches!(
                session.delete("/a").await,
                Err(CoordinationError::Operation(_))
            ));
        }
        session.delete("/b").await.unwrap();
        session.delete("/a").await.unwrap();
        assert_eq!(ensemble.node_count(), 1);
    }

    #[tokio::test]
    async fn wait_deleted_returns_immediately_for_missing_node() {
        let ensemble = InMemoryEnsemble::new();
        let session = ensemble.session();
        session.wait_deleted("/never").await.unwrap();
    }

    #[tokio::test]
    async fn connector_validates_settings() {
        let ensemble = InMemoryEnsemble::new();
        let settings = ConnectSettings::builder().endpoints(vec![]).build();
        assert!(matches!(
            ensemble.connect(&settings).await,
            Err(CoordinationError::InvalidSettings(_))
        ));

        let settings = ConnectSettings::builder()
            .endpoints(vec!["memory".to_string()])
            .build();
        let coordinator = ensemble.connect(&settings).await.unwrap();
        coordinator.create("/c", b"", CreateMode::Ephemeral).await.unwrap();
        assert_eq!(ensemble.node_count(), 2);

        drop(coordinator);
        assert_eq!(ensemble.node_count(), 1);
    }
}
