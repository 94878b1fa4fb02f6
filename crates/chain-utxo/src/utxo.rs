use serde::{Deserialize, Serialize};

/// Confirmations a coinbase output needs before it may be spent.
pub const COINBASE_MATURITY: u64 = 100;

/// A single unspent transaction output (UTXO).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    /// Transaction ID as a hex string (display order).
    pub txid: String,
    /// Output index within the transaction.
    pub vout: u32,
    /// Value in base units.
    pub value: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_time: Option<u32>,
    #[serde(default)]
    pub coinbase: bool,
    /// Raw hex of the funding transaction, when already known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hex: Option<String>,
}

impl UnspentOutput {
    pub fn new(txid: impl Into<String>, vout: u32, value: u64) -> Self {
        Self {
            txid: txid.into(),
            vout,
            value,
            confirmations: None,
            height: None,
            lock_time: None,
            coinbase: false,
            tx_hex: None,
        }
    }

    /// Confirmed when it has at least one confirmation, or when the
    /// confirmation count is unknown but a block height is.
    pub fn is_confirmed(&self) -> bool {
        self.confirmations.map_or(self.height.is_some(), |c| c > 0)
    }

    /// Coinbase outputs are spendable only after maturity.
    pub fn is_mature(&self) -> bool {
        !self.coinbase || self.confirmations.unwrap_or(0) >= COINBASE_MATURITY
    }

    /// `txid:vout` outpoint string.
    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.txid, self.vout)
    }
}

/// UTXOs eligible for selection under the confirmation policy.
pub fn spendable_outputs(utxos: &[UnspentOutput], use_unconfirmed: bool) -> Vec<UnspentOutput> {
    utxos
        .iter()
        .filter(|u| u.is_mature() && (use_unconfirmed || u.is_confirmed()))
        .cloned()
        .collect()
}

/// Sum of values, saturating at `u64::MAX`.
pub fn total_value(utxos: &[UnspentOutput]) -> u64 {
    utxos.iter().fold(0u64, |acc, u| acc.saturating_add(u.value))
}
