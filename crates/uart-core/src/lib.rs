//! # uart-core
//!
//! Building blocks shared by the UArt gateway crates:
//!
//! - [`domain`] - catalog and OAuth relay value types
//! - [`cache`] - concurrent TTL cache with a background sweep task
//! - [`pool`] - bounded pool of executors for fire-and-forget work
//!
//! Both [`TtlCache`] and [`WorkerPool`] spawn onto the ambient tokio runtime
//! and must be constructed from within one.

pub mod cache;
pub mod domain;
pub mod pool;

pub use cache::{CacheStats, PageCache, TtlCache};
pub use domain::{AuthGrant, CallbackParams, MarketItem};
pub use pool::{PoolError, WorkerPool};
