//! Settlement pipeline configuration.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Tunables of the batch settlement pipeline.
///
/// One config targets one chain and one settlement contract; a venue
/// settling several markets runs one pipeline per market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Chain the settlement transactions target.
    pub chain_id: u64,
    /// Settlement contract address.
    pub market_address: Address,

    /// Queue size that forms a batch immediately. Default: 50.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Minimum queue size for the age trigger. Default: 5.
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,
    /// Oldest-fill age that arms the age trigger (ms). Default: 5,000.
    #[serde(default = "default_max_batch_wait_ms")]
    pub max_batch_wait_ms: u64,

    /// Submission attempts before a batch is terminal. Default: 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between submission attempts (ms). Default: 2,000.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Exponential backoff growth factor. Default: 2.0.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Fee ceiling above which submission is deferred (wei). Default: 500 gwei.
    #[serde(default = "default_max_gas_price_wei")]
    pub max_gas_price_wei: u128,
    /// Factor applied to the queried gas price on submission. Default: 1.1.
    #[serde(default = "default_gas_price_multiplier")]
    pub gas_price_multiplier: f64,

    /// Confirmation depth required before a batch is final. Default: 2.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Receipt-less wait before a submission is declared lost (ms).
    /// Default: 60,000.
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,

    /// Recovery sweep interval (ms). Default: 10,000.
    #[serde(default = "default_failed_fill_retry_interval_ms")]
    pub failed_fill_retry_interval_ms: u64,
    /// Recovery attempts before a fill is permanently failed. Default: 5.
    #[serde(default = "default_failed_fill_max_retries")]
    pub failed_fill_max_retries: u32,
    /// Records re-queued per recovery sweep. Default: 50.
    #[serde(default = "default_failed_fill_retry_batch_size")]
    pub failed_fill_retry_batch_size: u32,

    /// Confirmation-polling window after shutdown (ms). Default: 30,000.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_max_batch_size() -> usize {
    50
}

fn default_min_batch_size() -> usize {
    5
}

fn default_max_batch_wait_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_gas_price_wei() -> u128 {
    500_000_000_000
}

fn default_gas_price_multiplier() -> f64 {
    1.1
}

fn default_confirmations() -> u64 {
    2
}

fn default_confirmation_timeout_ms() -> u64 {
    60_000
}

fn default_failed_fill_retry_interval_ms() -> u64 {
    10_000
}

fn default_failed_fill_max_retries() -> u32 {
    5
}

fn default_failed_fill_retry_batch_size() -> u32 {
    50
}

fn default_shutdown_grace_ms() -> u64 {
    30_000
}

impl SettlementConfig {
    /// Config with default tunables for the given chain and contract.
    #[must_use]
    pub fn new(chain_id: u64, market_address: Address) -> Self {
        Self {
            chain_id,
            market_address,
            max_batch_size: default_max_batch_size(),
            min_batch_size: default_min_batch_size(),
            max_batch_wait_ms: default_max_batch_wait_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_gas_price_wei: default_max_gas_price_wei(),
            gas_price_multiplier: default_gas_price_multiplier(),
            confirmations: default_confirmations(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            failed_fill_retry_interval_ms: default_failed_fill_retry_interval_ms(),
            failed_fill_max_retries: default_failed_fill_max_retries(),
            failed_fill_retry_batch_size: default_failed_fill_retry_batch_size(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }

    /// Backoff delay before submission attempt `retry_count + 1`, in ms.
    ///
    /// `retry_delay_ms * backoff_multiplier^(retry_count - 1)`, so the first
    /// re-attempt waits the base delay.
    #[must_use]
    pub fn backoff_delay_ms(&self, retry_count: u32) -> u64 {
        let exponent = retry_count.saturating_sub(1) as i32;
        (self.retry_delay_ms as f64 * self.backoff_multiplier.powi(exponent)) as u64
    }

    /// Recovery lock key scoped to this pipeline's chain and contract.
    #[must_use]
    pub fn recovery_lock_key(&self) -> String {
        format!(
            "failed_fills:retry:{}:{:#x}",
            self.chain_id, self.market_address
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config: SettlementConfig = toml::from_str(
            r#"
            chain_id = 137
            market_address = "0x00000000000000000000000000000000000000cc"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.min_batch_size, 5);
        assert_eq!(config.max_batch_wait_ms, 5_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_gas_price_wei, 500_000_000_000);
        assert_eq!(config.confirmations, 2);
        assert_eq!(config.failed_fill_max_retries, 5);
        assert_eq!(config.shutdown_grace_ms, 30_000);
    }

    #[test]
    fn test_backoff_schedule() {
        let mut config = SettlementConfig::new(
            137,
            address!("00000000000000000000000000000000000000cc"),
        );
        config.retry_delay_ms = 100;
        config.backoff_multiplier = 2.0;

        assert_eq!(config.backoff_delay_ms(1), 100);
        assert_eq!(config.backoff_delay_ms(2), 200);
        assert_eq!(config.backoff_delay_ms(3), 400);
    }

    #[test]
    fn test_lock_key_is_lowercase() {
        let config = SettlementConfig::new(
            137,
            "0x00000000000000000000000000000000000000CC".parse().unwrap(),
        );
        assert_eq!(
            config.recovery_lock_key(),
            "failed_fills:retry:137:0x00000000000000000000000000000000000000cc"
        );
    }
}
