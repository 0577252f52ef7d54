//! Settlement contract codec.
//!
//! Encodes `batchFill` calldata from a slice of fills and decodes the
//! contract's `OrderFilledSigned` logs out of a receipt. The contract
//! applies fills in calldata order, so the encoder preserves the order the
//! fills were removed from the queue.

use alloy::primitives::{Address, Log, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

use clob_core::Fill;

use crate::types::{ReceiptLog, SettlementCall};

sol! {
    /// Maker order tuple as the settlement contract declares it.
    #[derive(Debug)]
    struct Order {
        address maker;
        uint256 outcomeIndex;
        bool isBuy;
        uint256 price;
        uint256 amount;
        uint256 salt;
        uint256 expiry;
    }

    function batchFill(
        Order[] calldata orders,
        bytes[] calldata signatures,
        uint256[] calldata fillAmounts
    ) external;

    event OrderFilledSigned(
        address maker,
        address taker,
        uint256 outcomeIndex,
        bool isBuy,
        uint256 price,
        uint256 amount,
        uint256 fee,
        uint256 salt
    );
}

/// A decoded on-chain trade execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeEvent {
    pub maker: Address,
    pub taker: Address,
    pub outcome_index: u32,
    pub is_buy: bool,
    pub price: U256,
    pub amount: U256,
    pub fee: U256,
    pub salt: U256,
    /// Position of the source log within its block.
    pub log_index: u64,
}

/// Build the `batchFill` call for a batch of fills, preserving fill order.
#[must_use]
pub fn encode_batch_fill(market_address: Address, fills: &[Fill]) -> SettlementCall {
    let orders = fills
        .iter()
        .map(|fill| Order {
            maker: fill.order.maker,
            outcomeIndex: U256::from(fill.order.outcome_index),
            isBuy: fill.order.is_buy,
            price: fill.order.price,
            amount: fill.order.amount,
            salt: fill.order.salt,
            expiry: fill.order.expiry,
        })
        .collect();
    let signatures = fills.iter().map(|fill| fill.signature.clone()).collect();
    let fill_amounts = fills.iter().map(|fill| fill.fill_amount).collect();

    let call = batchFillCall {
        orders,
        signatures,
        fillAmounts: fill_amounts,
    };

    SettlementCall {
        to: market_address,
        calldata: call.abi_encode().into(),
    }
}

/// Decode `OrderFilledSigned` events emitted by the settlement contract.
///
/// Logs from other contracts and logs that do not parse as the trade
/// event are skipped.
#[must_use]
pub fn decode_trade_events(market_address: Address, logs: &[ReceiptLog]) -> Vec<TradeEvent> {
    let mut events = Vec::new();

    for log in logs {
        if log.address != market_address {
            continue;
        }
        let Some(raw) = Log::new(log.address, log.topics.clone(), log.data.clone()) else {
            continue;
        };
        let Ok(decoded) = OrderFilledSigned::decode_log(&raw, true) else {
            continue;
        };

        events.push(TradeEvent {
            maker: decoded.data.maker,
            taker: decoded.data.taker,
            outcome_index: decoded.data.outcomeIndex.saturating_to::<u32>(),
            is_buy: decoded.data.isBuy,
            price: decoded.data.price,
            amount: decoded.data.amount,
            fee: decoded.data.fee,
            salt: decoded.data.salt,
            log_index: log.log_index,
        });
    }

    events
}

/// Encode an `OrderFilledSigned` log body (test support for receipt fakes).
#[must_use]
pub fn encode_trade_event_log(
    market_address: Address,
    event: &TradeEvent,
) -> ReceiptLog {
    let body = OrderFilledSigned {
        maker: event.maker,
        taker: event.taker,
        outcomeIndex: U256::from(event.outcome_index),
        isBuy: event.is_buy,
        price: event.price,
        amount: event.amount,
        fee: event.fee,
        salt: event.salt,
    };

    ReceiptLog {
        address: market_address,
        topics: vec![OrderFilledSigned::SIGNATURE_HASH],
        data: body.encode_data().into(),
        log_index: event.log_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Bytes};
    use clob_core::{FillId, SignedOrder};

    fn sample_fill(id: &str, amount: u64) -> Fill {
        Fill {
            id: FillId::from(id),
            order: SignedOrder {
                maker: address!("00000000000000000000000000000000000000aa"),
                outcome_index: 2,
                is_buy: true,
                price: U256::from(600_000u64),
                amount: U256::from(amount),
                salt: U256::from(7u64),
                expiry: U256::ZERO,
            },
            signature: Bytes::from(vec![0x11; 65]),
            fill_amount: U256::from(amount),
            taker: address!("00000000000000000000000000000000000000bb"),
            matched_price: U256::from(600_000u64),
            maker_fee: U256::ZERO,
            taker_fee: U256::ZERO,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_encode_batch_fill_selector_and_order() {
        let market = address!("00000000000000000000000000000000000000cc");
        let fills = vec![sample_fill("f1", 10), sample_fill("f2", 20)];

        let call = encode_batch_fill(market, &fills);
        assert_eq!(call.to, market);
        assert_eq!(&call.calldata[..4], batchFillCall::SELECTOR);

        let decoded = batchFillCall::abi_decode(&call.calldata, true).unwrap();
        assert_eq!(decoded.orders.len(), 2);
        assert_eq!(decoded.fillAmounts, vec![U256::from(10u64), U256::from(20u64)]);
    }

    #[test]
    fn test_trade_event_roundtrip() {
        let market = address!("00000000000000000000000000000000000000cc");
        let event = TradeEvent {
            maker: address!("00000000000000000000000000000000000000aa"),
            taker: address!("00000000000000000000000000000000000000bb"),
            outcome_index: 1,
            is_buy: false,
            price: U256::from(450_000u64),
            amount: U256::from(3u64),
            fee: U256::from(12u64),
            salt: U256::from(99u64),
            log_index: 4,
        };

        let log = encode_trade_event_log(market, &event);
        let decoded = decode_trade_events(market, &[log]);
        assert_eq!(decoded, vec![event]);
    }

    #[test]
    fn test_decode_skips_foreign_logs() {
        let market = address!("00000000000000000000000000000000000000cc");
        let other = address!("00000000000000000000000000000000000000dd");
        let event = TradeEvent {
            maker: Address::ZERO,
            taker: Address::ZERO,
            outcome_index: 0,
            is_buy: true,
            price: U256::ZERO,
            amount: U256::ZERO,
            fee: U256::ZERO,
            salt: U256::ZERO,
            log_index: 0,
        };

        let log = encode_trade_event_log(other, &event);
        assert!(decode_trade_events(market, &[log]).is_empty());
    }
}
