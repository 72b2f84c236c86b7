use crate::allocator::WorkerIdAllocator;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use zkflake_coordination::{ConnectSettings, Connector, Coordinator};
use zkflake_snowflake::{Clock, Diagnostics, Snowflake, SnowflakeSettings, SystemClock};

/// How the registry reaches the coordination service.
pub enum SetupConfig {
    /// Open a fresh session with the registry's [`Connector`].
    Endpoints(ConnectSettings),
    /// Reuse a session the caller already holds.
    ExistingClient(Arc<dyn Coordinator>),
}

impl fmt::Debug for SetupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupConfig::Endpoints(settings) => f.debug_tuple("Endpoints").field(settings).finish(),
            SetupConfig::ExistingClient(_) => f.write_str("ExistingClient(..)"),
        }
    }
}

struct RegistryState<C: Clock> {
    allocator: Option<WorkerIdAllocator>,
    generators: HashMap<String, Arc<Snowflake<C>>>,
}

/// Process-wide cache of one [`Snowflake`] generator per namespace.
///
/// Construct it once at startup, call [`setup`](Self::setup), and hand it by
/// reference to whoever needs ids. The first
/// [`get_generator`](Self::get_generator) for a namespace claims a worker id
/// over the network; later calls are an in-memory lookup.
///
/// One lock guards both the coordination session and the namespace map. It
/// is never taken while issuing ids.
pub struct SnowflakeRegistry<C: Clock = SystemClock> {
    connector: Arc<dyn Connector>,
    clock: C,
    state: Mutex<RegistryState<C>>,
}

impl SnowflakeRegistry<SystemClock> {
    /// Creates a registry whose generators read the system clock.
    pub fn new(connector: impl Connector) -> Self {
        Self::with_clock(connector, SystemClock)
    }
}

impl<C: Clock + Clone + 'static> SnowflakeRegistry<C> {
    pub fn with_clock(connector: impl Connector, clock: C) -> Self {
        Self {
            connector: Arc::new(connector),
            clock,
            state: Mutex::new(RegistryState {
                allocator: None,
                generators: HashMap::new(),
            }),
        }
    }

    /// Establishes the coordination session shared by every namespace.
    ///
    /// Only the first successful call takes effect. Later calls are no-ops,
    /// whatever configuration they carry. A failed call leaves the registry
    /// unconfigured so it can be retried.
    pub async fn setup(&self, config: SetupConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.allocator.is_some() {
            info!(?config, "snowflake registry already set up; ignoring configuration");
            return Ok(());
        }

        let coordinator = match config {
            SetupConfig::Endpoints(settings) => {
                self.connector.connect(&settings).await.map_err(Error::Connect)?
            }
            SetupConfig::ExistingClient(coordinator) => coordinator,
        };
        state.allocator = Some(WorkerIdAllocator::new(coordinator));

        let diagnostics = Diagnostics::capture(self.clock.now());
        info!(%diagnostics, "snowflake registry ready");
        let remaining_days = (diagnostics.expires_at.as_second() - self.clock.now().as_second())
            / 86_400;
        if remaining_days < 365 {
            warn!(
                remaining_days,
                expires_at = %diagnostics.expires_at,
                "snowflake id layout is close to overflowing"
            );
        }
        Ok(())
    }

    pub async fn is_configured(&self) -> bool {
        self.state.lock().await.allocator.is_some()
    }

    /// Returns the generator for `namespace`, allocating a worker id for it
    /// on first use.
    ///
    /// Concurrent first calls for any namespaces are serialized; exactly one
    /// allocation happens per namespace per registry.
    ///
    /// The worker id is only exclusive while the registry's coordination
    /// session lives. A cached generator is not told when that session
    /// expires: it keeps issuing ids under its old worker id, and another
    /// process may claim the same id once the worker node is gone. Size the
    /// session timeout so that expiry means the process is really gone.
    pub async fn get_generator(&self, namespace: &str) -> Result<Arc<Snowflake<C>>> {
        let mut state = self.state.lock().await;
        if let Some(generator) = state.generators.get(namespace) {
            return Ok(Arc::clone(generator));
        }

        let allocator = state.allocator.as_ref().ok_or(Error::NotConfigured)?;
        let lease = allocator.allocate(namespace).await?;

        let settings = SnowflakeSettings::builder()
            .worker_id(lease.worker_id)
            .build();
        let generator = Arc::new(Snowflake::with_clock(settings, self.clock.clone())?);
        state
            .generators
            .insert(namespace.to_string(), Arc::clone(&generator));
        Ok(generator)
    }

    /// The worker id already assigned to `namespace`, without allocating.
    pub async fn worker_id(&self, namespace: &str) -> Option<u16> {
        self.state
            .lock()
            .await
            .generators
            .get(namespace)
            .map(|generator| generator.worker_id())
    }
}
