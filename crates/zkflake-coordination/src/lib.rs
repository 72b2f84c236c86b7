//! Coordination-service contract used to hand out worker ids.
//!
//! The [`Coordinator`] trait is the minimal surface the allocator needs from
//! a hierarchical coordination service: persistent and ephemeral nodes,
//! children listing and deletion watches. On top of it this crate provides
//! the namespace path layout, idempotent path creation and a
//! [`DistributedLock`]. [`InMemoryEnsemble`] implements the contract in
//! process; the `zookeeper` feature adds a ZooKeeper backend.

pub mod coordinator;
pub mod error;
pub mod lock;
pub mod memory;
pub mod path;
#[cfg(feature = "zookeeper")]
pub mod zookeeper;

pub use coordinator::{ConnectSettings, Connector, Coordinator, CreateMode};
pub use error::{CoordinationError, Result};
pub use lock::DistributedLock;
pub use memory::{InMemoryEnsemble, InMemorySession, SessionOp};
pub use path::{ensure_path, NamespacePaths};
#[cfg(feature = "zookeeper")]
pub use zookeeper::{ZookeeperConnector, ZookeeperCoordinator};
