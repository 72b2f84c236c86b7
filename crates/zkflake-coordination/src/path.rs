use crate::coordinator::{Coordinator, CreateMode};
use crate::error::{CoordinationError, Result};
use tracing::trace;

/// Root of every node this crate manages.
pub const ROOT: &str = "/_snowflake_";

/// Coordination sub-tree owned by one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePaths {
    namespace: String,
    lock_path: String,
    node_path: String,
}

impl NamespacePaths {
    /// Derives `/_snowflake_/lock/{namespace}` and `/_snowflake_/nodes/{namespace}`.
    pub fn for_namespace(namespace: &str) -> Result<Self> {
        validate_namespace(namespace)?;
        Ok(Self {
            namespace: namespace.to_string(),
            lock_path: format!("{ROOT}/lock/{namespace}"),
            node_path: format!("{ROOT}/nodes/{namespace}"),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Parent of the namespace's distributed-lock nodes.
    pub fn lock_path(&self) -> &str {
        &self.lock_path
    }

    /// Parent of the namespace's ephemeral worker nodes.
    pub fn node_path(&self) -> &str {
        &self.node_path
    }

    pub fn worker_node(&self, worker_id: u16) -> String {
        format!("{}/{worker_id}", self.node_path)
    }
}

fn validate_namespace(namespace: &str) -> Result<()> {
    let reason = if namespace.is_empty() {
        "must not be empty"
    } else if namespace.contains('/') {
        "must not contain '/'"
    } else if namespace == "." || namespace == ".." {
        "must not be a relative path segment"
    } else if namespace.chars().any(char::is_control) {
        "must not contain control characters"
    } else {
        return Ok(());
    };
    Err(CoordinationError::InvalidNamespace(format!(
        "'{}' {reason}",
        namespace.escape_debug()
    )))
}

/// Checks that `path` is absolute with no empty segments.
pub fn validate_path(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path[1..].split('/').any(str::is_empty) {
        return Err(CoordinationError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Parent path of `path`, `None` for the root.
pub(crate) fn parent(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(index) => Some(&path[..index]),
    }
}

/// Last segment of `path`.
pub(crate) fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Creates every segment of `path` as a persistent node.
///
/// Segments that already exist are left alone; any other failure is
/// returned as-is.
pub async fn ensure_path(coordinator: &dyn Coordinator, path: &str) -> Result<()> {
    validate_path(path)?;

    let mut current = String::with_capacity(path.len());
    for segment in path.split('/').skip(1).filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        match coordinator.create(&current, &[], CreateMode::Persistent).await {
            Ok(_) => trace!(path = %current, "created path segment"),
            Err(CoordinationError::NodeExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEnsemble;

    #[test]
    fn namespace_paths_follow_layout() {
        let paths = NamespacePaths::for_namespace("orders").unwrap();
        assert_eq!(paths.lock_path(), "/_snowflake_/lock/orders");
        assert_eq!(paths.node_path(), "/_snowflake_/nodes/orders");
        assert_eq!(paths.worker_node(17), "/_snowflake_/nodes/orders/17");
    }

    #[test]
    fn invalid_namespaces_are_rejected() {
        for bad in ["", "a/b", ".", "..", "tab\tbed"] {
            assert!(
                matches!(
                    NamespacePaths::for_namespace(bad),
                    Err(CoordinationError::InvalidNamespace(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn validate_path_cases() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/a/b").is_ok());
        assert!(validate_path("a/b").is_err());
        assert!(validate_path("/a/").is_err());
        assert!(validate_path("/a//b").is_err());
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(name("/a/b/c"), "c");
    }

    #[tokio::test]
    async fn ensure_path_is_idempotent() {
        let ensemble = InMemoryEnsemble::new();
        let session = ensemble.session();

        ensure_path(&session, "/_snowflake_/nodes/orders").await.unwrap();
        ensure_path(&session, "/_snowflake_/nodes/orders").await.unwrap();
        ensure_path(&session, "/_snowflake_/lock/orders").await.unwrap();

        assert!(session.exists("/_snowflake_/nodes/orders").await.unwrap());
        let mut roots = session.children("/_snowflake_").await.unwrap();
        roots.sort();
        assert_eq!(roots, vec!["lock", "nodes"]);
    }

    #[tokio::test]
    async fn ensure_path_survives_session_end() {
        let ensemble = InMemoryEnsemble::new();
        {
            let session = ensemble.session();
            ensure_path(&session, "/x/y").await.unwrap();
        }
        let session = ensemble.session();
        assert!(session.exists("/x/y").await.unwrap());
    }
}
