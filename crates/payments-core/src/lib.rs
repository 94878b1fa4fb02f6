//! Payments facade for bitcoin-like coins.
//!
//! [`UtxoPayments`] ties an account configuration to a [`BlockchainProvider`]
//! and exposes the payment lifecycle: derive payports, read balances, create,
//! sign, combine and broadcast transactions, and track their status.

pub mod config;
pub mod error;
pub mod factory;
pub mod fees;
pub mod mnemonic;
pub mod payments;
pub mod provider;
pub mod types;

pub use chain_utxo;
pub use config::{KeyConfig, PaymentsConfig, RetryConfig};
pub use error::PaymentsError;
pub use factory::PaymentsFactory;
pub use fees::resolve_fee_option;
pub use payments::UtxoPayments;
pub use provider::{
    BlockchainProvider, BroadcastResponse, ChainTransaction, ProviderError, RawTransaction,
    RetryingProvider,
};
pub use types::{
    BalanceResult, BroadcastResult, CreateTransactionOptions, Destination, FeeLevel, FeeOption,
    Payport, PayportOutput, PublicConfig, ResolvedFeeOption, SignedTransaction, TransactionData,
    TransactionInfo, TransactionStatus, UnsignedTransaction,
};
