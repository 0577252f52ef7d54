//! Durable failed-fill payload.
//!
//! When a batch terminally fails, each of its fills is persisted as a
//! self-contained JSON payload so recovery works after a process restart,
//! without the original batch object. The payload is versioned; parsing an
//! unknown version or malformed document is a permanent failure (the fill
//! cannot be recovered).

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::fill::Fill;

/// Current payload schema version.
pub const PAYLOAD_VERSION: u32 = 1;

/// Self-contained serialized form of a fill pending recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFillPayload {
    /// Schema version, currently [`PAYLOAD_VERSION`].
    pub version: u32,
    /// Chain the fill settles on.
    pub chain_id: u64,
    /// Settlement contract address.
    pub market_address: Address,
    /// The fill itself.
    pub fill: Fill,
}

impl FailedFillPayload {
    /// Wrap a fill for durable storage.
    #[must_use]
    pub fn new(chain_id: u64, market_address: Address, fill: Fill) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            chain_id,
            market_address,
            fill,
        }
    }

    /// Serialize to a JSON value for the durable store.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse a stored JSON value back into a payload.
    ///
    /// Rejects unknown versions; any structural mismatch surfaces as
    /// `CoreError::InvalidPayload`.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let payload: Self = serde_json::from_value(value.clone())
            .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
        if payload.version != PAYLOAD_VERSION {
            return Err(CoreError::UnsupportedPayloadVersion(payload.version));
        }
        Ok(payload)
    }
}
