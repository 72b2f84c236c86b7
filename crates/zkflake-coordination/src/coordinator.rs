use crate::error::{CoordinationError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use typed_builder::TypedBuilder;

pub const ENDPOINTS_ENV: &str = "ZKFLAKE_ZK_ENDPOINTS";
pub const SESSION_TIMEOUT_MS_ENV: &str = "ZKFLAKE_ZK_SESSION_TIMEOUT_MS";

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifetime of a node created through a [`Coordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Removed automatically when the creating session ends.
    Ephemeral,
    /// Ephemeral, with a zero-padded, monotonically increasing suffix
    /// appended to the requested path by the service.
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        !matches!(self, CreateMode::Persistent)
    }
}

/// A session against a hierarchical coordination service.
///
/// Paths are absolute and slash separated, like `/a/b/c`. Every operation
/// is a blocking round trip from the caller's point of view.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// Creates a node and returns its full path, including the suffix the
    /// service appended for [`CreateMode::EphemeralSequential`].
    ///
    /// Returns `Err(NodeExists)` if the path is taken and `Err(NoNode)` if
    /// the parent is missing.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String>;

    /// Deletes a childless node.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists the names (not paths) of the direct children of a node.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Resolves once the node is gone. Returns immediately if it does not
    /// exist at call time.
    async fn wait_deleted(&self, path: &str) -> Result<()>;
}

/// Opens new coordination sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, settings: &ConnectSettings) -> Result<Arc<dyn Coordinator>>;
}

/// Where and how to reach the coordination service.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use zkflake_coordination::ConnectSettings;
///
/// let settings = ConnectSettings::builder()
///     .endpoints(vec!["10.0.0.1:2181".to_string(), "10.0.0.2:2181".to_string()])
///     .session_timeout(Duration::from_secs(6))
///     .build();
/// assert_eq!(settings.connect_string(), "10.0.0.1:2181,10.0.0.2:2181");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct ConnectSettings {
    /// `host:port` pairs of the service ensemble.
    pub endpoints: Vec<String>,
    /// Session expiry after losing contact; ephemeral nodes outlive a crashed
    /// process by at most this long.
    #[builder(default = DEFAULT_SESSION_TIMEOUT)]
    pub session_timeout: Duration,
}

impl ConnectSettings {
    /// Reads [`ENDPOINTS_ENV`] (comma separated) and the optional
    /// [`SESSION_TIMEOUT_MS_ENV`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoints = lookup(ENDPOINTS_ENV)
            .ok_or_else(|| CoordinationError::InvalidSettings(format!("{ENDPOINTS_ENV} is not set")))?
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(str::to_string)
            .collect();

        let session_timeout = match lookup(SESSION_TIMEOUT_MS_ENV) {
            Some(raw) => raw.trim().parse::<u64>().map(Duration::from_millis).map_err(|e| {
                CoordinationError::InvalidSettings(format!(
                    "{SESSION_TIMEOUT_MS_ENV}='{raw}' is not a number of milliseconds: {e}"
                ))
            })?,
            None => DEFAULT_SESSION_TIMEOUT,
        };

        let settings = Self {
            endpoints,
            session_timeout,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No endpoint is given, or one of them is blank
    /// - The session timeout is zero
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(CoordinationError::InvalidSettings(
                "at least one endpoint is required".to_string(),
            ));
        }
        if self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(CoordinationError::InvalidSettings(
                "endpoints must not be blank".to_string(),
            ));
        }
        if self.session_timeout.is_zero() {
            return Err(CoordinationError::InvalidSettings(
                "session timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_string(&self) -> String {
        self.endpoints.join(",")
    }
}
