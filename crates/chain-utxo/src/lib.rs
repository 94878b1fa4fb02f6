//! UTXO payment engine for bitcoin-like coins.
//!
//! Provides unit conversion, per-coin network parameters, address encoding
//! and normalization, HD and discrete key derivation (single-sig and
//! multisig), coin selection with fee and change planning, and PSBT-based
//! transaction assembly, signing and finalization.

pub mod address;
pub mod derivation;
pub mod error;
pub mod network;
pub mod planner;
pub mod transaction;
pub mod units;
pub mod utxo;

pub use address::{AddressFormat, AddressKind, AddressType};
pub use error::UtxoError;
pub use network::{Coin, CoinParams, NetworkType};
pub use planner::{build_payment_tx, FeeRate, FeeRateType, PaymentRequest, PaymentTx, PlannerContext, TxOutput};
pub use transaction::{assemble, AssembledTx, FinalizedTx, SignedTx};
pub use units::UnitConverter;
pub use utxo::UnspentOutput;
