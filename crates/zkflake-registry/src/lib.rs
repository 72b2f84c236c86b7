//! Dynamic worker-id assignment and the per-namespace generator registry.
//!
//! A [`SnowflakeRegistry`] owns one coordination session. The first request
//! for a namespace runs the [`WorkerIdAllocator`] protocol, which claims a
//! worker id no other live process in that namespace holds, and caches a
//! [`Snowflake`](zkflake_snowflake::Snowflake) generator bound to it.
//!
//! ```rust
//! use zkflake_coordination::{ConnectSettings, InMemoryEnsemble};
//! use zkflake_registry::{SetupConfig, SnowflakeRegistry};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SnowflakeRegistry::new(InMemoryEnsemble::new());
//! let settings = ConnectSettings::builder()
//!     .endpoints(vec!["in-memory".to_string()])
//!     .build();
//! registry.setup(SetupConfig::Endpoints(settings)).await?;
//!
//! let orders = registry.get_generator("orders").await?;
//! let id = orders.next_id()?;
//! assert_eq!(id.worker_id(), orders.worker_id());
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod error;
pub mod registry;

pub use allocator::{next_worker_id, WorkerIdAllocator, WorkerLease, FIRST_WORKER_ID};
pub use error::{Error, Result};
pub use registry::{SetupConfig, SnowflakeRegistry};
