//! Durable settlement state and cross-process locking.
//!
//! The pipeline persists batch lifecycle snapshots, a recovery table of
//! fills from terminally failed batches, and decoded on-chain trade
//! executions. Backends: Postgres for production, in-memory for tests and
//! single-process runs. The recovery sweep is guarded by a [`LockService`]
//! (Redis in production) so concurrent relayer instances do not double
//! re-queue the same fills.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod redis_lock;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryLockService, MemoryStore};
pub use postgres::PostgresStore;
pub use records::{BatchRecord, FailedFillRow, NewFailedFill, TradeEventRecord};
pub use redis_lock::RedisLockService;
pub use store::{LockService, LockToken, SettlementStore};
