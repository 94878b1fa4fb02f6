use chain_utxo::{AddressFormat, AddressType, FeeRateType, NetworkType, PaymentTx, UnspentOutput};
use serde::{Deserialize, Serialize};

/// An address that can receive payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payport {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_id: Option<String>,
}

impl Payport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            extra_id: None,
        }
    }
}

/// Where a payment goes: an account index, a bare address or a payport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    Index(u32),
    Address(String),
    Payport(Payport),
}

impl From<u32> for Destination {
    fn from(index: u32) -> Self {
        Destination::Index(index)
    }
}

impl From<&str> for Destination {
    fn from(address: &str) -> Self {
        Destination::Address(address.to_string())
    }
}

impl From<Payport> for Destination {
    fn from(payport: Payport) -> Self {
        Destination::Payport(payport)
    }
}

/// One recipient in a multi-output payment; `amount` is in the main denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayportOutput {
    pub payport: Destination,
    pub amount: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeLevel {
    Low,
    Medium,
    High,
    Custom,
}

impl std::fmt::Display for FeeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FeeLevel::Low => "low",
            FeeLevel::Medium => "medium",
            FeeLevel::High => "high",
            FeeLevel::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Requested fee: a level, or a custom rate with its unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeOption {
    pub fee_level: FeeLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_rate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_rate_type: Option<FeeRateType>,
}

impl FeeOption {
    pub fn level(fee_level: FeeLevel) -> Self {
        Self {
            fee_level,
            fee_rate: None,
            fee_rate_type: None,
        }
    }

    pub fn custom(fee_rate: impl Into<String>, fee_rate_type: FeeRateType) -> Self {
        Self {
            fee_level: FeeLevel::Custom,
            fee_rate: Some(fee_rate.into()),
            fee_rate_type: Some(fee_rate_type),
        }
    }
}

impl Default for FeeOption {
    fn default() -> Self {
        Self::level(FeeLevel::Medium)
    }
}

/// A fee option after level lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFeeOption {
    pub target_fee_level: FeeLevel,
    pub target_fee_rate: String,
    pub target_fee_rate_type: FeeRateType,
}

/// Knobs for transaction creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTransactionOptions {
    #[serde(default)]
    pub fee: FeeOption,
    #[serde(default)]
    pub use_unconfirmed_utxos: bool,
    #[serde(default)]
    pub recipient_pays_fee: bool,
    /// Index whose address receives change; defaults to the sending index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_index: Option<u32>,
    /// Spend from these outputs instead of asking the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_utxos: Option<Vec<UnspentOutput>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Unsigned,
    Signed,
    Pending,
    Confirmed,
    Failed,
}

/// Chain-specific payload carried by unsigned and signed transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    #[serde(flatten)]
    pub plan: PaymentTx,
    pub unsigned_txid: String,
    /// PSBT hex while unsigned or partial, raw transaction hex once final.
    pub hex: String,
    #[serde(default)]
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub id: Option<String>,
    pub from_address: String,
    pub to_address: String,
    pub from_index: u32,
    pub to_index: Option<u32>,
    pub amount: String,
    pub fee: String,
    pub target_fee_level: FeeLevel,
    pub target_fee_rate: String,
    pub target_fee_rate_type: FeeRateType,
    pub status: TransactionStatus,
    pub data: TransactionData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Final txid, or the unsigned txid while partial.
    pub id: String,
    pub from_address: String,
    pub to_address: String,
    pub from_index: u32,
    pub to_index: Option<u32>,
    pub amount: String,
    pub fee: String,
    pub target_fee_level: FeeLevel,
    pub target_fee_rate: String,
    pub target_fee_rate_type: FeeRateType,
    pub status: TransactionStatus,
    pub data: TransactionData,
}

impl SignedTransaction {
    pub(crate) fn from_unsigned(tx: &UnsignedTransaction, id: String, data: TransactionData) -> Self {
        Self {
            id,
            from_address: tx.from_address.clone(),
            to_address: tx.to_address.clone(),
            from_index: tx.from_index,
            to_index: tx.to_index,
            amount: tx.amount.clone(),
            fee: tx.fee.clone(),
            target_fee_level: tx.target_fee_level,
            target_fee_rate: tx.target_fee_rate.clone(),
            target_fee_rate_type: tx.target_fee_rate_type,
            status: TransactionStatus::Signed,
            data,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.data.partial
    }
}

/// Balances of one address, in the main denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResult {
    pub confirmed_balance: String,
    pub unconfirmed_balance: String,
    pub spendable_balance: String,
    pub sweepable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub id: String,
    pub rebroadcast: bool,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub id: String,
    pub status: TransactionStatus,
    pub confirmations: u64,
    pub block_height: Option<u64>,
    pub block_time: Option<u64>,
    /// Fee in the main denomination, when the provider reports it.
    pub fee: Option<String>,
    pub is_executed: bool,
}

/// Everything needed to rebuild a read-only view of the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicConfig {
    pub network: NetworkType,
    pub address_type: AddressType,
    pub format: AddressFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_path: Option<String>,
    /// Account xpub, or `multi(m,xpub,...)` for multisig.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universal_public_key: Option<String>,
    /// Public keys by index for key-pair accounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_keys: Vec<Option<String>>,
}
