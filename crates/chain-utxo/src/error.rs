use thiserror::Error;

/// Errors raised by the UTXO payment engine.
#[derive(Debug, Error)]
pub enum UtxoError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("read-only key: {0}")]
    ReadOnlyKey(String),

    #[error("unsupported derivation: {0}")]
    UnsupportedDerivation(String),

    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("insufficient funds: need {needed} base units, have {available} (short {shortfall})")]
    InsufficientFunds {
        needed: u64,
        available: u64,
        shortfall: u64,
    },

    #[error("fee too high: {fee} base units exceeds {max_percent}% of {total}")]
    FeeTooHigh { fee: u64, total: u64, max_percent: u32 },

    #[error("missing input data: {0}")]
    MissingInputData(String),

    #[error("transaction build error: {0}")]
    TransactionBuild(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("signature validation failed: {0}")]
    SignatureValidation(String),

    #[error("invalid psbt: {0}")]
    InvalidPsbt(String),
}
