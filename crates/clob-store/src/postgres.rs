//! Postgres-backed [`SettlementStore`].
//!
//! Addresses, hashes and 256-bit amounts are stored as text (addresses
//! lowercased), JSON payloads as JSONB. All writes are single-statement
//! upserts keyed by natural id.

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use clob_core::{BatchId, FillId};

use crate::error::{StoreError, StoreResult};
use crate::records::{BatchRecord, FailedFillRow, NewFailedFill, TradeEventRecord};
use crate::store::SettlementStore;

const SCHEMA: &str = include_str!("../schema.sql");

fn addr_text(address: Address) -> String {
    format!("{address:#x}")
}

fn parse_addr(text: &str) -> StoreResult<Address> {
    text.parse()
        .map_err(|_| StoreError::CorruptRow(format!("bad address: {text}")))
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply the schema.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the bootstrap schema. Safe to re-run.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("Settlement schema applied");
        Ok(())
    }
}

#[async_trait]
impl SettlementStore for PostgresStore {
    async fn upsert_batch(&self, record: &BatchRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settlement_batches
                (id, chain_id, market_address, fill_count, status, tx_hash,
                 error, retry_count, gas_used, block_number,
                 created_at, submitted_at, confirmed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                fill_count = EXCLUDED.fill_count,
                status = EXCLUDED.status,
                tx_hash = EXCLUDED.tx_hash,
                error = EXCLUDED.error,
                retry_count = EXCLUDED.retry_count,
                gas_used = EXCLUDED.gas_used,
                block_number = EXCLUDED.block_number,
                submitted_at = EXCLUDED.submitted_at,
                confirmed_at = EXCLUDED.confirmed_at
            "#,
        )
        .bind(record.id.as_str())
        .bind(record.chain_id as i64)
        .bind(addr_text(record.market_address))
        .bind(i64::from(record.fill_count))
        .bind(record.status.to_string())
        .bind(record.tx_hash.map(|h| format!("{h:#x}")))
        .bind(record.error.as_deref())
        .bind(i64::from(record.retry_count))
        .bind(record.gas_used.map(|g| g.to_string()))
        .bind(record.block_number.map(|n| n as i64))
        .bind(record.created_at)
        .bind(record.submitted_at)
        .bind(record.confirmed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_failed_fill(&self, record: &NewFailedFill) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO failed_fills
                (fill_id, batch_id, error, chain_id, market_address,
                 payload, retry_count, next_retry_at, resolved_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7, NULL, $8)
            ON CONFLICT (fill_id) DO UPDATE SET
                batch_id = EXCLUDED.batch_id,
                error = EXCLUDED.error,
                payload = EXCLUDED.payload,
                retry_count = 0,
                next_retry_at = EXCLUDED.next_retry_at,
                resolved_at = NULL
            "#,
        )
        .bind(record.fill_id.as_str())
        .bind(record.batch_id.as_str())
        .bind(&record.error)
        .bind(record.chain_id as i64)
        .bind(addr_text(record.market_address))
        .bind(&record.payload)
        .bind(record.next_retry_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_failed_fills(
        &self,
        chain_id: u64,
        market_address: Address,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<FailedFillRow>> {
        let rows = sqlx::query(
            r#"
            SELECT fill_id, batch_id, error, chain_id, market_address,
                   payload, retry_count, next_retry_at, created_at
            FROM failed_fills
            WHERE chain_id = $1
              AND market_address = $2
              AND resolved_at IS NULL
              AND next_retry_at <= $3
            ORDER BY created_at ASC
            LIMIT $4
            "#,
        )
        .bind(chain_id as i64)
        .bind(addr_text(market_address))
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let market: String = row.try_get("market_address")?;
                Ok(FailedFillRow {
                    fill_id: FillId::new(row.try_get::<String, _>("fill_id")?),
                    batch_id: BatchId::from(row.try_get::<String, _>("batch_id")?),
                    error: row.try_get("error")?,
                    chain_id: row.try_get::<i64, _>("chain_id")? as u64,
                    market_address: parse_addr(&market)?,
                    payload: row.try_get("payload")?,
                    retry_count: row.try_get::<i64, _>("retry_count")? as u32,
                    next_retry_at: row.try_get("next_retry_at")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn bump_failed_fill_retry(
        &self,
        fill_id: &FillId,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE failed_fills SET retry_count = $2, next_retry_at = $3 WHERE fill_id = $1",
        )
        .bind(fill_id.as_str())
        .bind(i64::from(retry_count))
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resolve_failed_fill(&self, fill_id: &FillId, error: Option<&str>) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE failed_fills
            SET resolved_at = now(), error = COALESCE($2, error)
            WHERE fill_id = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(fill_id.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ingest_trade_event(&self, record: &TradeEventRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_events
                (tx_hash, log_index, chain_id, market_address,
                 maker_address, taker_address, outcome_index, is_buy,
                 price, amount, fee, salt, block_number, block_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(format!("{:#x}", record.tx_hash))
        .bind(record.log_index as i64)
        .bind(record.chain_id as i64)
        .bind(addr_text(record.market_address))
        .bind(addr_text(record.maker))
        .bind(addr_text(record.taker))
        .bind(i64::from(record.outcome_index))
        .bind(record.is_buy)
        .bind(record.price.to_string())
        .bind(record.amount.to_string())
        .bind(record.fee.to_string())
        .bind(record.salt.to_string())
        .bind(record.block_number as i64)
        .bind(record.block_timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
