use chain_utxo::UtxoError;
use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum PaymentsError {
    #[error("Invalid config field {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error(transparent)]
    Utxo(#[from] UtxoError),

    #[error("Provider unavailable for {operation} after {attempts} attempt(s): {reason}")]
    ProviderUnavailable {
        operation: String,
        attempts: usize,
        reason: String,
    },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
}

impl PaymentsError {
    pub(crate) fn config(field: impl Into<String>, reason: impl ToString) -> Self {
        PaymentsError::InvalidConfig {
            field: field.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<ProviderError> for PaymentsError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Exhausted {
                operation,
                attempts,
                reason,
            } => PaymentsError::ProviderUnavailable {
                operation: operation.to_string(),
                attempts,
                reason,
            },
            ProviderError::Transient(reason) => PaymentsError::ProviderUnavailable {
                operation: "provider".to_string(),
                attempts: 1,
                reason,
            },
            other => PaymentsError::Provider(other.to_string()),
        }
    }
}
