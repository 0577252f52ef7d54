//! Redis-backed [`LockService`].
//!
//! Standard single-node pattern: `SET key token NX PX ttl` to acquire, a
//! compare-and-delete script to release so a holder whose TTL lapsed cannot
//! free a lock someone else re-acquired.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::MultiplexedConnection;
use redis::Script;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::store::{LockService, LockToken};

static RELEASE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('get', KEYS[1]) == ARGV[1] then
            return redis.call('del', KEYS[1])
        else
            return 0
        end
        "#,
    )
});

pub struct RedisLockService {
    conn: MultiplexedConnection,
}

impl RedisLockService {
    /// Connect to a Redis endpoint, e.g. `redis://127.0.0.1:6379`.
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { conn })
    }

    async fn try_acquire(&self, key: &str, ttl_ms: u64) -> StoreResult<Option<LockToken>> {
        let token = Uuid::new_v4().simple().to_string();
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|_| LockToken(token)))
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn acquire(
        &self,
        key: &str,
        ttl_ms: u64,
        wait_ms: u64,
        retries: u32,
    ) -> StoreResult<Option<LockToken>> {
        for attempt in 0..=retries {
            if let Some(token) = self.try_acquire(key, ttl_ms).await? {
                return Ok(Some(token));
            }
            debug!(key, attempt, "Lock held elsewhere");
            if attempt < retries && wait_ms > 0 {
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
        }
        Ok(None)
    }

    async fn release(&self, key: &str, token: &LockToken) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = RELEASE_SCRIPT
            .key(key)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
