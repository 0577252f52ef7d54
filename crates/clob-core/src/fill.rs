//! Fill and signed-order types.
//!
//! A `Fill` is one matched quantity of a maker's signed order, produced by
//! the matching engine and awaiting on-chain settlement. Its `id` is stable
//! across every retry attempt, which is what allows a fill re-queued from
//! recovery to be reconciled with its eventual on-chain outcome.

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Unique identifier of a fill, assigned by the matching engine.
///
/// Stable for the lifetime of the fill, including across batch retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FillId(String);

impl FillId {
    /// Create a fill id from an owned string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FillId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FillId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The maker's signed order as understood by the settlement contract.
///
/// Field layout matches the contract's `Order` tuple. `expiry == 0` means
/// the order never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOrder {
    /// Maker address.
    pub maker: Address,
    /// Outcome index within the market.
    pub outcome_index: u32,
    /// Buy (true) or sell (false) side.
    pub is_buy: bool,
    /// Limit price, contract units.
    pub price: U256,
    /// Total order amount, contract units.
    pub amount: U256,
    /// Maker-chosen salt for order uniqueness.
    pub salt: U256,
    /// Expiry timestamp (seconds); zero means no expiry.
    pub expiry: U256,
}

/// One matched quantity of a signed order, awaiting settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Matching-engine fill id, stable across retries.
    pub id: FillId,
    /// The maker's signed order.
    pub order: SignedOrder,
    /// The maker's signature over the order.
    pub signature: Bytes,
    /// Quantity filled on this occasion.
    pub fill_amount: U256,
    /// Taker address (the operator settles on the taker's behalf).
    pub taker: Address,
    /// Price the match executed at.
    pub matched_price: U256,
    /// Maker fee amount.
    pub maker_fee: U256,
    /// Taker fee amount.
    pub taker_fee: U256,
    /// Creation timestamp, Unix milliseconds.
    pub timestamp_ms: u64,
}
