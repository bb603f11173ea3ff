//! Connection pooling: route keys, the bounded pool, keep-alive negotiation
//! and the idle reaper.

pub mod keep_alive;
pub mod manager;
pub mod reaper;
pub mod route;

pub use keep_alive::{wants_close, KeepAlivePolicy};
pub use manager::{Connect, ConnectionPool, PoolLimits, PoolStats, Poolable, Pooled};
pub use reaper::IdleReaper;
pub use route::{Route, Scheme};
