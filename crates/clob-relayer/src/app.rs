//! Relayer wiring.
//!
//! Builds the chain client, selects store and lock backends from config,
//! runs the settlement pipeline, bridges its event stream into metrics,
//! and drains gracefully on Ctrl-C. Fill intake happens through the
//! [`BatchSettler`] handle, which the matching-engine integration embeds;
//! this binary runs the pipeline itself.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use clob_chain::EthereumClient;
use clob_settlement::BatchSettler;
use clob_store::{
    LockService, MemoryLockService, MemoryStore, PostgresStore, RedisLockService, SettlementStore,
};
use clob_telemetry::Metrics;

use crate::config::{AppConfig, LockBackend, StoreBackend};
use crate::error::AppResult;

/// Gauge refresh interval.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Run the relayer until Ctrl-C, then drain.
pub async fn run(config: AppConfig) -> AppResult<()> {
    let private_key = config.private_key()?;
    let chain = Arc::new(EthereumClient::new(
        &config.chain.rpc_url,
        config.settlement.chain_id,
        &private_key,
    )?);

    match config.store.backend {
        StoreBackend::Postgres => {
            let store = Arc::new(
                PostgresStore::connect(config.database_url()?, config.store.max_connections)
                    .await?,
            );
            with_lock(config, chain, store).await
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; failed fills will not survive a restart");
            with_lock(config, chain, Arc::new(MemoryStore::new())).await
        }
    }
}

async fn with_lock<S>(config: AppConfig, chain: Arc<EthereumClient>, store: Arc<S>) -> AppResult<()>
where
    S: SettlementStore + 'static,
{
    match config.lock.backend {
        LockBackend::Redis => {
            let locks = Arc::new(RedisLockService::connect(config.redis_url()?).await?);
            run_pipeline(config, chain, store, locks).await
        }
        LockBackend::Memory => {
            run_pipeline(config, chain, store, Arc::new(MemoryLockService::new())).await
        }
    }
}

async fn run_pipeline<S, L>(
    config: AppConfig,
    chain: Arc<EthereumClient>,
    store: Arc<S>,
    locks: Arc<L>,
) -> AppResult<()>
where
    S: SettlementStore + 'static,
    L: LockService + 'static,
{
    let operator = chain.operator_address();
    let settler = BatchSettler::new(config.settlement, operator, chain, store, locks);

    match settler.operator_balance().await {
        Ok(balance) => info!(operator = %operator, balance = %balance, "Operator funded"),
        Err(e) => warn!(operator = %operator, error = %e, "Operator balance check failed"),
    }

    // Bridge lifecycle events into Prometheus counters.
    let mut events = settler.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            Metrics::record_event(&event);
        }
    });

    // Periodic queue-depth gauges.
    let stats_settler = settler.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(STATS_INTERVAL);
        loop {
            tick.tick().await;
            Metrics::update_gauges(&stats_settler.stats());
        }
    });

    settler.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    settler.shutdown().await;

    let stats = settler.stats();
    info!(
        confirmed_batches = stats.confirmed_batches,
        failed_batches = stats.failed_batches,
        fills_settled = stats.total_fills_settled,
        "Relayer stopped"
    );
    Ok(())
}
