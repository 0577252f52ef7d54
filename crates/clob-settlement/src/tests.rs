//! Pipeline behavior tests against a mock chain and in-memory store/lock.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{address, Address, Bytes, TxHash, U256};
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::timeout;

use clob_chain::contract::encode_trade_event_log;
use clob_chain::{ChainError, FeeData, MockChainClient, TradeEvent, TxReceipt};
use clob_core::{
    BatchId, BatchStatus, FailedFillPayload, Fill, FillId, SettlementEvent, SignedOrder,
};
use clob_store::{LockService, MemoryLockService, MemoryStore, NewFailedFill, SettlementStore};

use crate::config::SettlementConfig;
use crate::error::SettlementError;
use crate::settler::{now_ms, BatchSettler, RECOVERY_LOCK_TTL_MS};

const CHAIN_ID: u64 = 31337;
const GWEI: u128 = 1_000_000_000;

fn market() -> Address {
    address!("00000000000000000000000000000000000000cc")
}

fn operator() -> Address {
    address!("00000000000000000000000000000000000000ee")
}

fn fill(id: &str, age_ms: u64) -> Fill {
    Fill {
        id: FillId::from(id),
        order: SignedOrder {
            maker: address!("00000000000000000000000000000000000000aa"),
            outcome_index: 1,
            is_buy: true,
            price: U256::from(500_000u64),
            amount: U256::from(1_000_000u64),
            salt: U256::from(7u64),
            expiry: U256::ZERO,
        },
        signature: Bytes::from(vec![0x1b; 65]),
        fill_amount: U256::from(1_000u64),
        taker: address!("00000000000000000000000000000000000000bb"),
        matched_price: U256::from(500_000u64),
        maker_fee: U256::ZERO,
        taker_fee: U256::ZERO,
        timestamp_ms: now_ms().saturating_sub(age_ms),
    }
}

fn base_config() -> SettlementConfig {
    let mut config = SettlementConfig::new(CHAIN_ID, market());
    config.retry_delay_ms = 100;
    config.backoff_multiplier = 2.0;
    config
}

/// Chain mock that accepts any number of fee/estimate/send calls.
fn happy_chain() -> MockChainClient {
    let mut chain = MockChainClient::new();
    chain
        .expect_fee_data()
        .returning(|| Ok(FeeData { gas_price: 10 * GWEI }));
    chain.expect_estimate_gas().returning(|_| Ok(100_000));
    chain
        .expect_send_transaction()
        .returning(|_, _, _| Ok(TxHash::repeat_byte(0x11)));
    chain
}

fn receipt(block_number: u64) -> TxReceipt {
    TxReceipt {
        tx_hash: TxHash::repeat_byte(0x11),
        block_number,
        gas_used: 90_000,
        logs: Vec::new(),
    }
}

type TestSettler = BatchSettler<MockChainClient, MemoryStore, MemoryLockService>;

fn settler(
    chain: MockChainClient,
    config: SettlementConfig,
) -> (TestSettler, Arc<MemoryStore>, Arc<MemoryLockService>) {
    let store = Arc::new(MemoryStore::new());
    let locks = Arc::new(MemoryLockService::new());
    let settler = BatchSettler::new(
        config,
        operator(),
        Arc::new(chain),
        Arc::clone(&store),
        Arc::clone(&locks),
    );
    (settler, store, locks)
}

async fn next_event(rx: &mut broadcast::Receiver<SettlementEvent>) -> SettlementEvent {
    timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("timed out waiting for a settlement event")
        .expect("event stream closed")
}

fn due_record(fill_id: &str, payload: serde_json::Value) -> NewFailedFill {
    let past = Utc::now() - chrono::Duration::seconds(5);
    NewFailedFill {
        fill_id: FillId::from(fill_id),
        batch_id: BatchId::generate(0),
        error: "submission failed: nonce too low".into(),
        chain_id: CHAIN_ID,
        market_address: market(),
        payload,
        next_retry_at: past,
        created_at: past,
    }
}

// ============================================================================
// Queueing and batch formation
// ============================================================================

#[tokio::test]
async fn test_duplicate_fill_queued_once() {
    let (settler, _store, _locks) = settler(MockChainClient::new(), base_config());

    settler.add_fill(fill("f1", 0)).await.unwrap();
    settler.add_fill(fill("f1", 0)).await.unwrap();

    assert_eq!(settler.stats().pending_fills, 1);
}

#[tokio::test(start_paused = true)]
async fn test_size_trigger_forms_batch_inline() {
    let mut config = base_config();
    config.max_batch_size = 5;
    config.min_batch_size = 2;
    let (settler, _store, _locks) = settler(happy_chain(), config);
    let mut events = settler.subscribe();

    for i in 0..5 {
        settler.add_fill(fill(&format!("f{i}"), 0)).await.unwrap();
    }

    // The fifth fill trips the size trigger without waiting for a tick.
    let SettlementEvent::BatchCreated { batch } = next_event(&mut events).await else {
        panic!("expected batch_created first");
    };
    assert_eq!(batch.fill_count(), 5);
    assert_eq!(batch.status, BatchStatus::Pending);
    assert_eq!(settler.stats().pending_fills, 0);

    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchSubmitted { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_age_trigger_requires_min_size_and_age() {
    let mut config = base_config();
    config.max_batch_size = 5;
    config.min_batch_size = 2;
    config.max_batch_wait_ms = 2_000;
    let (settler, _store, _locks) = settler(happy_chain(), config);
    let mut events = settler.subscribe();

    // One old fill: below min_batch_size, no batch.
    settler.add_fill(fill("f1", 3_000)).await.unwrap();
    settler.try_build_batch().await;
    assert!(settler.inner.batches.is_empty());
    assert_eq!(settler.stats().pending_fills, 1);

    // A second old fill arms the age trigger.
    settler.add_fill(fill("f2", 3_000)).await.unwrap();
    settler.try_build_batch().await;

    let SettlementEvent::BatchCreated { batch } = next_event(&mut events).await else {
        panic!("expected batch_created");
    };
    assert_eq!(batch.fill_count(), 2);
    assert_eq!(batch.fills[0].id.as_str(), "f1");
    assert_eq!(batch.fills[1].id.as_str(), "f2");
}

#[tokio::test]
async fn test_age_trigger_not_met_for_fresh_fills() {
    let mut config = base_config();
    config.max_batch_size = 5;
    config.min_batch_size = 2;
    config.max_batch_wait_ms = 2_000;
    let (settler, _store, _locks) = settler(MockChainClient::new(), config);

    settler.add_fill(fill("f1", 0)).await.unwrap();
    settler.add_fill(fill("f2", 0)).await.unwrap();
    settler.try_build_batch().await;

    assert!(settler.inner.batches.is_empty());
    assert_eq!(settler.stats().pending_fills, 2);
}

// ============================================================================
// Submission
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_gas_gate_blocks_submission() {
    let mut config = base_config();
    config.max_batch_size = 1;
    config.max_retries = 1;

    // Fee above the 500 gwei ceiling; estimate_gas and send_transaction
    // have no expectations, so any call to them fails the test.
    let mut chain = MockChainClient::new();
    chain
        .expect_fee_data()
        .returning(|| Ok(FeeData { gas_price: 600 * GWEI }));

    let (settler, store, _locks) = settler(chain, config);
    let mut events = settler.subscribe();
    settler.add_fill(fill("f1", 0)).await.unwrap();

    let SettlementEvent::BatchCreated { batch } = next_event(&mut events).await else {
        panic!("expected batch_created");
    };
    let SettlementEvent::BatchFailed { batch_id, error } = next_event(&mut events).await else {
        panic!("expected batch_failed");
    };
    assert_eq!(batch_id, batch.id);
    assert!(error.contains("exceeds ceiling"));

    let record = store.batch(&batch.id).expect("batch persisted");
    assert_eq!(record.status, BatchStatus::Failed);
    assert_eq!(record.retry_count, 1);
    assert_eq!(store.unresolved_count(), 1);
    assert!(settler.inner.batches.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_submission_gas_parameters() {
    let mut config = base_config();
    config.max_batch_size = 1;

    // Estimate 100k -> +20% limit; 10 gwei * 1.1 -> exactly 11 gwei.
    let mut chain = MockChainClient::new();
    chain
        .expect_fee_data()
        .returning(|| Ok(FeeData { gas_price: 10 * GWEI }));
    chain.expect_estimate_gas().returning(|_| Ok(100_000));
    chain
        .expect_send_transaction()
        .withf(|_, gas_limit, gas_price| *gas_limit == 120_000 && *gas_price == 11 * GWEI)
        .returning(|_, _, _| Ok(TxHash::repeat_byte(0x11)));

    let (settler, _store, _locks) = settler(chain, config);
    let mut events = settler.subscribe();
    settler.add_fill(fill("f1", 0)).await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchCreated { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchSubmitted { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_estimation_failure_is_terminal_without_retry() {
    let mut config = base_config();
    config.max_batch_size = 1;
    config.max_retries = 3;

    let mut chain = MockChainClient::new();
    chain
        .expect_fee_data()
        .times(1)
        .returning(|| Ok(FeeData { gas_price: 10 * GWEI }));
    chain.expect_estimate_gas().times(1).returning(|_| {
        Err(ChainError::Rpc {
            code: 3,
            message: "execution reverted".into(),
        })
    });

    let (settler, store, _locks) = settler(chain, config);
    let mut events = settler.subscribe();
    settler.add_fill(fill("f1", 0)).await.unwrap();

    let SettlementEvent::BatchCreated { batch } = next_event(&mut events).await else {
        panic!("expected batch_created");
    };
    let SettlementEvent::BatchFailed { error, .. } = next_event(&mut events).await else {
        panic!("expected batch_failed");
    };
    assert!(error.contains("gas estimation failed"));

    // No backoff loop: a structural failure never re-attempts.
    let record = store.batch(&batch.id).unwrap();
    assert_eq!(record.retry_count, 0);
    assert_eq!(store.unresolved_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_then_settles_all_fills() {
    let mut config = base_config();
    config.max_batch_size = 3;
    config.max_retries = 3;
    config.confirmations = 1;

    let mut chain = MockChainClient::new();
    chain
        .expect_fee_data()
        .returning(|| Ok(FeeData { gas_price: 10 * GWEI }));
    chain.expect_estimate_gas().returning(|_| Ok(100_000));
    let mut seq = mockall::Sequence::new();
    chain
        .expect_send_transaction()
        .times(2)
        .in_sequence(&mut seq)
        .returning(|_, _, _| {
            Err(ChainError::Rpc {
                code: -32000,
                message: "nonce too low".into(),
            })
        });
    chain
        .expect_send_transaction()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Ok(TxHash::repeat_byte(0x11)));
    chain.expect_transaction_receipt().returning(|_| Ok(Some(receipt(10))));
    chain.expect_block_number().returning(|| Ok(11));

    let (settler, store, _locks) = settler(chain, config);
    let mut events = settler.subscribe();
    settler.start();

    for id in ["F1", "F2", "F3"] {
        settler.add_fill(fill(id, 0)).await.unwrap();
    }

    let SettlementEvent::BatchCreated { batch } = next_event(&mut events).await else {
        panic!("expected batch_created");
    };
    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchSubmitted { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchConfirmed { block_number: 10, .. }
    ));

    let mut settled = Vec::new();
    for _ in 0..3 {
        let SettlementEvent::FillSettled { fill_id, .. } = next_event(&mut events).await else {
            panic!("expected fill_settled");
        };
        settled.push(fill_id.to_string());
    }
    assert_eq!(settled, vec!["F1", "F2", "F3"]);

    let stats = settler.stats();
    assert_eq!(stats.confirmed_batches, 1);
    assert_eq!(stats.total_fills_settled, 3);
    assert_eq!(stats.failed_batches, 0);

    let record = store.batch(&batch.id).unwrap();
    assert_eq!(record.status, BatchStatus::Confirmed);
    assert_eq!(record.retry_count, 2);
    assert!(settler.inner.batches.is_empty());

    settler.shutdown().await;
}

// ============================================================================
// Confirmation tracking
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_confirmation_depth_threshold() {
    let mut config = base_config();
    config.max_batch_size = 1;
    config.confirmations = 2;

    let mut chain = happy_chain();
    chain.expect_transaction_receipt().returning(|_| Ok(Some(receipt(10))));
    let mut seq = mockall::Sequence::new();
    chain
        .expect_block_number()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(10));
    chain
        .expect_block_number()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(12));

    let (settler, store, _locks) = settler(chain, config);
    let mut events = settler.subscribe();
    settler.add_fill(fill("f1", 0)).await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchCreated { .. }
    ));
    let SettlementEvent::BatchSubmitted { batch_id, .. } = next_event(&mut events).await else {
        panic!("expected batch_submitted");
    };

    // Depth 0 at height 10: the batch stays submitted.
    settler.check_confirmations().await;
    assert_eq!(
        settler.inner.batches.get(&batch_id).unwrap().status,
        BatchStatus::Submitted
    );

    // Depth 2 at height 12: confirmed exactly once and dropped.
    settler.check_confirmations().await;
    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchConfirmed { block_number: 10, .. }
    ));
    assert!(settler.inner.batches.is_empty());
    assert_eq!(store.batch(&batch_id).unwrap().status, BatchStatus::Confirmed);

    // A removed batch is not re-processed.
    settler.check_confirmations().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_receipt_times_out() {
    let mut config = base_config();
    config.max_batch_size = 1;
    config.confirmation_timeout_ms = 0;

    let mut chain = happy_chain();
    chain.expect_transaction_receipt().returning(|_| Ok(None));
    chain.expect_block_number().returning(|| Ok(10));

    let (settler, store, _locks) = settler(chain, config);
    let mut events = settler.subscribe();
    settler.add_fill(fill("f1", 0)).await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchCreated { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchSubmitted { .. }
    ));

    settler.check_confirmations().await;

    let SettlementEvent::BatchFailed { error, .. } = next_event(&mut events).await else {
        panic!("expected batch_failed");
    };
    assert_eq!(error, "confirmation timeout");
    assert_eq!(store.unresolved_count(), 1);
    assert!(settler.inner.batches.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_trade_events_ingested_on_confirmation() {
    let mut config = base_config();
    config.max_batch_size = 1;
    config.confirmations = 0;

    let trade = TradeEvent {
        maker: address!("00000000000000000000000000000000000000aa"),
        taker: address!("00000000000000000000000000000000000000bb"),
        outcome_index: 1,
        is_buy: true,
        price: U256::from(500_000u64),
        amount: U256::from(1_000u64),
        fee: U256::from(5u64),
        salt: U256::from(7u64),
        log_index: 0,
    };
    let log = encode_trade_event_log(market(), &trade);

    let mut chain = happy_chain();
    chain.expect_block_number().returning(|| Ok(10));
    chain.expect_transaction_receipt().returning(move |_| {
        Ok(Some(TxReceipt {
            tx_hash: TxHash::repeat_byte(0x11),
            block_number: 10,
            gas_used: 90_000,
            logs: vec![log.clone()],
        }))
    });
    chain
        .expect_block_timestamp()
        .returning(|_| Ok(Some(1_700_000_000)));

    let (settler, store, _locks) = settler(chain, config);
    let mut events = settler.subscribe();
    settler.add_fill(fill("f1", 0)).await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchCreated { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchSubmitted { .. }
    ));

    settler.check_confirmations().await;
    // Re-processing the same receipt is idempotent on (tx_hash, log_index).
    settler.check_confirmations().await;

    let trades = store.trade_events();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].maker, trade.maker);
    assert_eq!(trades[0].price, trade.price);
    assert_eq!(
        trades[0].block_timestamp.unwrap().timestamp(),
        1_700_000_000
    );
}

// ============================================================================
// Failed-fill recovery
// ============================================================================

#[tokio::test]
async fn test_recovery_requeues_due_fill() {
    let mut config = base_config();
    config.retry_delay_ms = 10_000;
    let (settler, store, locks) = settler(MockChainClient::new(), config);

    let payload = FailedFillPayload::new(CHAIN_ID, market(), fill("f1", 60_000))
        .to_value()
        .unwrap();
    store.upsert_failed_fill(&due_record("f1", payload)).await.unwrap();

    let before = Utc::now();
    settler.retry_failed_fills().await;

    assert_eq!(settler.stats().pending_fills, 1);
    let row = store.failed_fill(&FillId::from("f1")).unwrap();
    assert_eq!(row.retry_count, 1);

    // The first re-attempt waits the base delay, not base * multiplier.
    let delay_ms = (row.next_retry_at - before).num_milliseconds();
    assert!(
        (10_000..15_000).contains(&delay_ms),
        "first retry backoff was {delay_ms}ms"
    );

    // The second waits base * multiplier.
    store
        .bump_failed_fill_retry(
            &FillId::from("f1"),
            1,
            Utc::now() - chrono::Duration::seconds(1),
        )
        .await
        .unwrap();
    let before = Utc::now();
    settler.retry_failed_fills().await;

    let row = store.failed_fill(&FillId::from("f1")).unwrap();
    assert_eq!(row.retry_count, 2);
    let delay_ms = (row.next_retry_at - before).num_milliseconds();
    assert!(
        (20_000..25_000).contains(&delay_ms),
        "second retry backoff was {delay_ms}ms"
    );

    // The sweep released its lock.
    let key = settler.inner.config.recovery_lock_key();
    assert!(locks
        .acquire(&key, RECOVERY_LOCK_TTL_MS, 0, 0)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_recovery_retry_ceiling_is_permanent() {
    let (settler, store, _locks) = settler(MockChainClient::new(), base_config());
    let mut events = settler.subscribe();

    let payload = FailedFillPayload::new(CHAIN_ID, market(), fill("f1", 60_000))
        .to_value()
        .unwrap();
    store.upsert_failed_fill(&due_record("f1", payload)).await.unwrap();
    store
        .bump_failed_fill_retry(
            &FillId::from("f1"),
            settler.inner.config.failed_fill_max_retries,
            Utc::now() - chrono::Duration::seconds(1),
        )
        .await
        .unwrap();

    settler.retry_failed_fills().await;

    let SettlementEvent::FillFailed { fill_id, error } = next_event(&mut events).await else {
        panic!("expected fill_failed");
    };
    assert_eq!(fill_id.as_str(), "f1");
    assert_eq!(error, "max retries exceeded");
    assert!(store.is_resolved(&FillId::from("f1")));
    assert_eq!(settler.stats().pending_fills, 0);

    // A resolved record never comes due again.
    settler.retry_failed_fills().await;
    assert_eq!(settler.stats().pending_fills, 0);
}

#[tokio::test]
async fn test_recovery_skips_when_lock_held_elsewhere() {
    let (settler, store, locks) = settler(MockChainClient::new(), base_config());

    let payload = FailedFillPayload::new(CHAIN_ID, market(), fill("f1", 60_000))
        .to_value()
        .unwrap();
    store.upsert_failed_fill(&due_record("f1", payload)).await.unwrap();

    let key = settler.inner.config.recovery_lock_key();
    let _held = locks
        .acquire(&key, RECOVERY_LOCK_TTL_MS, 0, 0)
        .await
        .unwrap()
        .unwrap();

    settler.retry_failed_fills().await;

    assert_eq!(settler.stats().pending_fills, 0);
    assert_eq!(
        store.failed_fill(&FillId::from("f1")).unwrap().retry_count,
        0
    );
}

#[tokio::test]
async fn test_recovery_resolves_unrecoverable_payload() {
    let (settler, store, _locks) = settler(MockChainClient::new(), base_config());
    let mut events = settler.subscribe();

    let garbage = serde_json::json!({ "version": 1, "fill": "not-a-fill" });
    store.upsert_failed_fill(&due_record("f1", garbage)).await.unwrap();

    settler.retry_failed_fills().await;

    let SettlementEvent::FillFailed { error, .. } = next_event(&mut events).await else {
        panic!("expected fill_failed");
    };
    assert!(error.contains("unrecoverable payload"));
    assert!(store.is_resolved(&FillId::from("f1")));
    assert_eq!(settler.stats().pending_fills, 0);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_queue_and_rejects_new_fills() {
    let mut config = base_config();
    config.min_batch_size = 5;
    config.confirmations = 0;

    let mut chain = happy_chain();
    chain.expect_transaction_receipt().returning(|_| Ok(Some(receipt(10))));
    chain.expect_block_number().returning(|| Ok(10));

    let (settler, _store, _locks) = settler(chain, config);
    let mut events = settler.subscribe();

    // Two fills: below min_batch_size, so only the shutdown flush can
    // batch them.
    settler.add_fill(fill("f1", 0)).await.unwrap();
    settler.add_fill(fill("f2", 0)).await.unwrap();

    settler.shutdown().await;

    let SettlementEvent::BatchCreated { batch } = next_event(&mut events).await else {
        panic!("expected batch_created");
    };
    assert_eq!(batch.fill_count(), 2);
    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchSubmitted { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SettlementEvent::BatchConfirmed { .. }
    ));

    assert!(settler.inner.batches.is_empty());
    assert!(matches!(
        settler.add_fill(fill("f3", 0)).await,
        Err(SettlementError::ShuttingDown)
    ));
}

// ============================================================================
// Operator surface
// ============================================================================

#[tokio::test]
async fn test_operator_surface() {
    let mut chain = MockChainClient::new();
    chain
        .expect_balance()
        .withf(|addr| *addr == address!("00000000000000000000000000000000000000ee"))
        .returning(|_| Ok(U256::from(42u64)));

    let (settler, _store, _locks) = settler(chain, base_config());

    assert_eq!(settler.operator_address(), operator());
    assert_eq!(settler.operator_balance().await.unwrap(), U256::from(42u64));
}
