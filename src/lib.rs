//! kiln - run a computation once per host, cache the artifact
//!
//! A content-addressed on-disk cache shared safely by concurrent processes
//! through a hierarchy of advisory file locks. See [`cache::Cache`].

pub mod cache;
pub mod cli;
pub mod error;

pub use cache::{Cache, CacheStats, Producer};
pub use error::{KilnError, KilnResult, ProducerError};
