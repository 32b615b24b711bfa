//! Distributed execution coordinator and merge engine.
//!
//! The coordinator fans the rewritten units of one statement out to their
//! data sources, one leased connection per data source, and waits on a
//! completion barrier with a statement timeout. The merge engine folds the
//! per-unit responses back into one client-visible result.

pub mod engine;
pub mod merge;
pub mod pool;
pub mod response;
pub mod scatter;

pub use engine::ShardingEngine;
pub use merge::{merge, MergedResult, QueryResult, UpdateResult};
pub use pool::{BackendConnection, ConnectionPool, PooledConnection};
pub use response::ShardResponse;
pub use scatter::{ExecutionCoordinator, ExecutionUnit};
