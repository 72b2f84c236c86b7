//! Disposable containers for integration tests.

mod error;
pub mod zookeeper;

pub use error::{Result, TestInfraError};
