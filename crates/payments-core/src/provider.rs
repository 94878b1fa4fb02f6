//! Blockchain data provider contract and a retrying wrapper around it.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chain_utxo::UnspentOutput;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::types::FeeLevel;

pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Network or server hiccup; the call may succeed if repeated.
    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("{operation} failed after {attempts} attempt(s): {reason}")]
    Exhausted {
        operation: &'static str,
        attempts: usize,
        reason: String,
    },
}

/// A raw transaction as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub txid: String,
    pub hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub id: String,
    /// The node already knew this transaction.
    #[serde(default)]
    pub rebroadcast: bool,
}

/// On-chain state of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub txid: String,
    pub confirmations: u64,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub block_time: Option<u64>,
    /// Fee in base units.
    #[serde(default)]
    pub fee: Option<u64>,
    /// Dropped from the mempool or conflicted out.
    #[serde(default)]
    pub failed: bool,
}

/// Source of UTXOs, raw transactions and fee estimates, and sink for broadcasts.
#[async_trait]
pub trait BlockchainProvider: Send + Sync {
    async fn get_unspent_outputs(&self, address: &str) -> Result<Vec<UnspentOutput>, ProviderError>;

    async fn get_transaction(&self, txid: &str) -> Result<RawTransaction, ProviderError>;

    /// Fee estimate in base units per vbyte.
    async fn estimate_fee(&self, level: FeeLevel) -> Result<u64, ProviderError>;

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<BroadcastResponse, ProviderError>;

    async fn get_transaction_info(&self, txid: &str) -> Result<ChainTransaction, ProviderError>;
}

/// Run `op` up to `attempts` times with a fixed delay, retrying only transient failures.
pub async fn retry<F, Fut, T>(
    operation: &'static str,
    attempts: usize,
    delay: Duration,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(ProviderError::Transient(reason)) if attempt < attempts => {
                warn!(operation, attempt, attempts, reason = %reason, "retrying provider call");
                sleep(delay).await;
            }
            Err(ProviderError::Transient(reason)) => {
                return Err(ProviderError::Exhausted {
                    operation,
                    attempts,
                    reason,
                })
            }
            Err(other) => return Err(other),
        }
    }
}

/// Wraps read operations of a provider with [`retry`]. Broadcasts are not retried.
#[derive(Debug, Clone)]
pub struct RetryingProvider<P> {
    inner: P,
    attempts: usize,
    delay: Duration,
}

impl<P> RetryingProvider<P> {
    pub fn new(inner: P) -> Self {
        Self::with_policy(inner, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }

    pub fn with_policy(inner: P, attempts: usize, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: BlockchainProvider> BlockchainProvider for RetryingProvider<P> {
    async fn get_unspent_outputs(&self, address: &str) -> Result<Vec<UnspentOutput>, ProviderError> {
        retry("get_unspent_outputs", self.attempts, self.delay, || {
            self.inner.get_unspent_outputs(address)
        })
        .await
    }

    async fn get_transaction(&self, txid: &str) -> Result<RawTransaction, ProviderError> {
        retry("get_transaction", self.attempts, self.delay, || {
            self.inner.get_transaction(txid)
        })
        .await
    }

    async fn estimate_fee(&self, level: FeeLevel) -> Result<u64, ProviderError> {
        retry("estimate_fee", self.attempts, self.delay, || self.inner.estimate_fee(level)).await
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<BroadcastResponse, ProviderError> {
        self.inner.broadcast(raw_tx_hex).await
    }

    async fn get_transaction_info(&self, txid: &str) -> Result<ChainTransaction, ProviderError> {
        retry("get_transaction_info", self.attempts, self.delay, || {
            self.inner.get_transaction_info(txid)
        })
        .await
    }
}
