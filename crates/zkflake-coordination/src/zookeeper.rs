use crate::coordinator::{ConnectSettings, Connector, Coordinator, CreateMode};
use crate::error::{CoordinationError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use zookeeper_client as zk;

/// Opens sessions against a ZooKeeper ensemble.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZookeeperConnector;

#[async_trait]
impl Connector for ZookeeperConnector {
    async fn connect(&self, settings: &ConnectSettings) -> Result<Arc<dyn Coordinator>> {
        settings.validate()?;
        let cluster = settings.connect_string();

        let client = zk::Client::connector()
            .session_timeout(settings.session_timeout)
            .connect(&cluster)
            .await
            .map_err(|e| CoordinationError::Connect {
                endpoints: cluster.clone(),
                message: e.to_string(),
            })?;

        info!(
            endpoints = %cluster,
            session_timeout_ms = settings.session_timeout.as_millis() as u64,
            "connected to zookeeper"
        );
        Ok(Arc::new(ZookeeperCoordinator::new(client)))
    }
}

/// [`Coordinator`] over an established ZooKeeper client session.
///
/// Nodes are created with the open `anyone_all` ACL.
#[derive(Debug, Clone)]
pub struct ZookeeperCoordinator {
    client: zk::Client,
}

impl ZookeeperCoordinator {
    /// Wraps a client that is already connected.
    pub fn new(client: zk::Client) -> Self {
        Self { client }
    }

    /// Returns a reference to the underlying client.
    pub fn client(&self) -> &zk::Client {
        &self.client
    }
}

fn map_zk_error(path: &str, err: zk::Error) -> CoordinationError {
    match err {
        zk::Error::NodeExists => CoordinationError::NodeExists(path.to_string()),
        zk::Error::NoNode => CoordinationError::NoNode(path.to_string()),
        zk::Error::NotEmpty => CoordinationError::NotEmpty(path.to_string()),
        zk::Error::SessionExpired => CoordinationError::SessionExpired,
        other => CoordinationError::Operation(format!("{path}: {other}")),
    }
}

#[async_trait]
impl Coordinator for ZookeeperCoordinator {
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let zk_mode = match mode {
            CreateMode::Persistent => zk::CreateMode::Persistent,
            CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
            CreateMode::EphemeralSequential => zk::CreateMode::EphemeralSequential,
        };
        let options = zk_mode.with_acls(zk::Acls::anyone_all());

        let (_, sequence) = self
            .client
            .create(path, data, &options)
            .await
            .map_err(|e| map_zk_error(path, e))?;

        let created = match mode {
            CreateMode::EphemeralSequential => format!("{path}{:010}", sequence.into_i64()),
            CreateMode::Persistent | CreateMode::Ephemeral => path.to_string(),
        };
        debug!(path = %created, ?mode, "created zookeeper node");
        Ok(created)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete(path, None)
            .await
            .map_err(|e| map_zk_error(path, e))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.client
            .list_children(path)
            .await
            .map_err(|e| map_zk_error(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let stat = self
            .client
            .check_stat(path)
            .await
            .map_err(|e| map_zk_error(path, e))?;
        Ok(stat.is_some())
    }

    async fn wait_deleted(&self, path: &str) -> Result<()> {
        loop {
            let (stat, watcher) = self
                .client
                .check_and_watch_stat(path)
                .await
                .map_err(|e| map_zk_error(path, e))?;
            if stat.is_none() {
                return Ok(());
            }
            // any event, including session state changes, triggers a re-check
            let event = watcher.changed().await;
            debug!(path = %path, event = ?event.event_type, "watched node changed");
        }
    }
}
