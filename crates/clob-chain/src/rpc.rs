//! JSON-RPC chain client with local transaction signing.
//!
//! Talks to an Ethereum-compatible node over HTTP JSON-RPC and signs legacy
//! transactions with the operator's key before submission via
//! `eth_sendRawTransaction`. The node never sees the key.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxHash, TxKind, B256, U256, U64};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::client::ChainClient;
use crate::error::{ChainError, ChainResult};
use crate::types::{FeeData, ReceiptLog, SettlementCall, TxReceipt};

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: TxHash,
    block_number: Option<U64>,
    gas_used: U256,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    log_index: Option<U64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    timestamp: U256,
}

/// Ethereum JSON-RPC client holding the operator signer.
pub struct EthereumClient {
    http: reqwest::Client,
    rpc_url: String,
    chain_id: u64,
    signer: PrivateKeySigner,
    operator: Address,
    request_id: AtomicU64,
}

impl EthereumClient {
    /// Create a client from an RPC endpoint and the operator's hex key.
    pub fn new(rpc_url: impl Into<String>, chain_id: u64, private_key: &str) -> ChainResult<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| ChainError::InvalidKey(format!("{e}")))?;
        let operator = signer.address();

        Ok(Self {
            http: reqwest::Client::new(),
            rpc_url: rpc_url.into(),
            chain_id,
            signer,
            operator,
            request_id: AtomicU64::new(1),
        })
    }

    /// Operator (sender) address derived from the configured key.
    #[must_use]
    pub fn operator_address(&self) -> Address {
        self.operator
    }

    /// Chain id this client is configured for.
    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> ChainResult<R> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        trace!(method, id, "RPC request");
        let envelope: RpcEnvelope = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = envelope.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        let result = envelope
            .result
            .ok_or_else(|| ChainError::InvalidResponse(format!("{method}: missing result")))?;
        serde_json::from_value(result)
            .map_err(|e| ChainError::InvalidResponse(format!("{method}: {e}")))
    }

    async fn nonce(&self) -> ChainResult<u64> {
        let nonce: U256 = self
            .call("eth_getTransactionCount", json!([self.operator, "pending"]))
            .await?;
        Ok(nonce.saturating_to::<u64>())
    }
}

#[async_trait]
impl ChainClient for EthereumClient {
    async fn fee_data(&self) -> ChainResult<FeeData> {
        let gas_price: U256 = self.call("eth_gasPrice", json!([])).await?;
        Ok(FeeData {
            gas_price: gas_price.saturating_to::<u128>(),
        })
    }

    async fn estimate_gas(&self, call: &SettlementCall) -> ChainResult<u64> {
        let request = json!([{
            "from": self.operator,
            "to": call.to,
            "data": call.calldata,
        }]);
        let estimate: U256 = self.call("eth_estimateGas", request).await?;
        Ok(estimate.saturating_to::<u64>())
    }

    async fn send_transaction(
        &self,
        call: &SettlementCall,
        gas_limit: u64,
        gas_price: u128,
    ) -> ChainResult<TxHash> {
        let nonce = self.nonce().await?;
        let mut tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Call(call.to),
            value: U256::ZERO,
            input: call.calldata.clone(),
        };

        let signature = TxSignerSync::sign_transaction_sync(&self.signer, &mut tx)?;
        let signed: TxEnvelope = tx.into_signed(signature).into();
        let raw = signed.encoded_2718();

        debug!(nonce, gas_limit, gas_price, "Sending raw transaction");
        let hash: TxHash = self
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(&raw))]),
            )
            .await?;
        Ok(hash)
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> ChainResult<Option<TxReceipt>> {
        let receipt: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        // A receipt without a block number is still pending from the
        // pipeline's point of view.
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let Some(block_number) = receipt.block_number else {
            return Ok(None);
        };

        let logs = receipt
            .logs
            .into_iter()
            .map(|log| ReceiptLog {
                address: log.address,
                topics: log.topics,
                data: log.data,
                log_index: log.log_index.map(|i| i.to::<u64>()).unwrap_or(0),
            })
            .collect();

        Ok(Some(TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: block_number.to::<u64>(),
            gas_used: receipt.gas_used.saturating_to::<u128>(),
            logs,
        }))
    }

    async fn block_number(&self) -> ChainResult<u64> {
        let number: U64 = self.call("eth_blockNumber", json!([])).await?;
        Ok(number.to::<u64>())
    }

    async fn block_timestamp(&self, block_number: u64) -> ChainResult<Option<u64>> {
        let block: Option<RpcBlock> = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("{block_number:#x}"), false]),
            )
            .await?;
        Ok(block.map(|b| b.timestamp.saturating_to::<u64>()))
    }

    async fn balance(&self, address: Address) -> ChainResult<U256> {
        self.call("eth_getBalance", json!([address, "latest"])).await
    }
}
