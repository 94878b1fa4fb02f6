//! Payments configuration and its validation.

use std::str::FromStr;
use std::time::Duration;

use bitcoin::bip32::DerivationPath;
use chain_utxo::derivation::MAX_MULTISIG_KEYS;
use chain_utxo::units::to_base_denomination;
use chain_utxo::{AddressFormat, AddressType, CoinParams, NetworkType};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::PaymentsError;
use crate::provider::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY};

/// How the account's keys are supplied.
#[derive(Clone, Serialize, Deserialize, Zeroize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyConfig {
    /// Extended private or public key, at root or account depth.
    Hd { hd_key: String },
    /// BIP39 phrase; the account key is derived along the derivation path.
    Mnemonic {
        mnemonic: String,
        #[serde(default)]
        passphrase: String,
    },
    /// WIF private keys or hex public keys indexed by account index.
    KeyPairs { key_pairs: Vec<Option<String>> },
    /// `m` of the listed signers must sign.
    Multisig { m: usize, signers: Vec<KeyConfig> },
}

impl Drop for KeyConfig {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyConfig::Hd { .. } => f.write_str("KeyConfig::Hd(..)"),
            KeyConfig::Mnemonic { .. } => f.write_str("KeyConfig::Mnemonic(..)"),
            KeyConfig::KeyPairs { key_pairs } => {
                write!(f, "KeyConfig::KeyPairs({} keys)", key_pairs.len())
            }
            KeyConfig::Multisig { m, signers } => f
                .debug_struct("KeyConfig::Multisig")
                .field("m", m)
                .field("signers", signers)
                .finish(),
        }
    }
}

impl KeyConfig {
    pub fn is_multisig(&self) -> bool {
        matches!(self, KeyConfig::Multisig { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: usize,
    pub delay_ms: u64,
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

fn default_network() -> NetworkType {
    NetworkType::Mainnet
}

fn default_pool_size() -> usize {
    1
}

fn default_max_fee_percent() -> u32 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    #[serde(default = "default_network")]
    pub network: NetworkType,
    /// Defaults to the coin's single-sig type, or its preferred multisig type.
    #[serde(default)]
    pub address_type: Option<AddressType>,
    #[serde(default)]
    pub format: Option<AddressFormat>,
    pub key_config: KeyConfig,
    /// Account path used when keys are given at root depth.
    #[serde(default)]
    pub derivation_path: Option<String>,
    #[serde(default = "default_pool_size")]
    pub target_utxo_pool_size: usize,
    /// Smallest change output worth splitting off, in the main denomination.
    #[serde(default)]
    pub min_change: Option<String>,
    #[serde(default = "default_max_fee_percent")]
    pub max_fee_percent: u32,
    /// Overrides the coin's dust threshold, in base units.
    #[serde(default)]
    pub dust_threshold: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl PaymentsConfig {
    pub fn new(network: NetworkType, key_config: KeyConfig) -> Self {
        Self {
            network,
            address_type: None,
            format: None,
            key_config,
            derivation_path: None,
            target_utxo_pool_size: default_pool_size(),
            min_change: None,
            max_fee_percent: default_max_fee_percent(),
            dust_threshold: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, PaymentsError> {
        serde_json::from_str(json).map_err(|e| PaymentsError::config("config", e))
    }

    /// The address type this config resolves to for `params`.
    pub fn resolved_address_type(&self, params: &CoinParams) -> AddressType {
        if let Some(address_type) = self.address_type {
            return address_type;
        }
        if !self.key_config.is_multisig() {
            return params.default_address_type;
        }
        if params.supports_address_type(AddressType::P2wshMultisig) {
            AddressType::P2wshMultisig
        } else {
            AddressType::P2shMultisig
        }
    }

    pub fn resolved_format(&self, params: &CoinParams) -> AddressFormat {
        self.format.unwrap_or(params.default_format)
    }

    pub fn parsed_derivation_path(&self) -> Result<Option<DerivationPath>, PaymentsError> {
        self.derivation_path
            .as_deref()
            .map(|p| DerivationPath::from_str(p.trim()).map_err(|e| PaymentsError::config("derivation_path", e)))
            .transpose()
    }

    pub fn min_change_base(&self, params: &CoinParams) -> Result<u64, PaymentsError> {
        match &self.min_change {
            Some(amount) => to_base_denomination(amount, params.decimals)
                .map_err(|e| PaymentsError::config("min_change", e)),
            None => Ok(0),
        }
    }

    /// Check the config against the coin it will be used with.
    ///
    /// Key strings are only checked for presence here; they are decoded
    /// when the payments instance is built.
    pub fn validate(&self, params: &CoinParams) -> Result<(), PaymentsError> {
        if self.network != params.network {
            return Err(PaymentsError::config(
                "network",
                format!("{} does not match {params}", self.network),
            ));
        }

        let address_type = self.resolved_address_type(params);
        if !params.supports_address_type(address_type) {
            return Err(PaymentsError::config(
                "address_type",
                format!("{address_type} is not supported by {params}"),
            ));
        }
        let format = self.resolved_format(params);
        if !params.supports_format(format) {
            return Err(PaymentsError::config(
                "format",
                format!("{format:?} is not supported by {params}"),
            ));
        }

        match (&self.key_config, address_type.is_multisig()) {
            (KeyConfig::Multisig { .. }, false) => {
                return Err(PaymentsError::config(
                    "address_type",
                    format!("{address_type} cannot be used with a multisig key config"),
                ))
            }
            (KeyConfig::Multisig { .. }, true) => {}
            (_, true) => {
                return Err(PaymentsError::config(
                    "key_config",
                    format!("{address_type} requires a multisig key config"),
                ))
            }
            _ => {}
        }
        validate_key_config(&self.key_config, "key_config", true)?;

        self.parsed_derivation_path()?;
        self.min_change_base(params)?;

        if self.target_utxo_pool_size == 0 {
            return Err(PaymentsError::config("target_utxo_pool_size", "must be at least 1"));
        }
        if self.max_fee_percent == 0 || self.max_fee_percent > 100 {
            return Err(PaymentsError::config("max_fee_percent", "must be between 1 and 100"));
        }
        if self.retry.attempts == 0 {
            return Err(PaymentsError::config("retry.attempts", "must be at least 1"));
        }
        Ok(())
    }
}

fn validate_key_config(key_config: &KeyConfig, field: &str, top_level: bool) -> Result<(), PaymentsError> {
    match key_config {
        KeyConfig::Hd { hd_key } => {
            if hd_key.trim().is_empty() {
                return Err(PaymentsError::config(format!("{field}.hd_key"), "must not be empty"));
            }
        }
        KeyConfig::Mnemonic { mnemonic, .. } => {
            if mnemonic.trim().is_empty() {
                return Err(PaymentsError::config(format!("{field}.mnemonic"), "must not be empty"));
            }
        }
        KeyConfig::KeyPairs { key_pairs } => {
            if key_pairs.iter().all(Option::is_none) {
                return Err(PaymentsError::config(
                    format!("{field}.key_pairs"),
                    "at least one key is required",
                ));
            }
        }
        KeyConfig::Multisig { m, signers } => {
            if !top_level {
                return Err(PaymentsError::config(field, "multisig signers cannot be nested"));
            }
            if signers.is_empty() || signers.len() > MAX_MULTISIG_KEYS {
                return Err(PaymentsError::config(
                    format!("{field}.signers"),
                    format!("between 1 and {MAX_MULTISIG_KEYS} signers are required"),
                ));
            }
            if *m == 0 || *m > signers.len() {
                return Err(PaymentsError::config(
                    format!("{field}.m"),
                    format!("must be between 1 and {}", signers.len()),
                ));
            }
            for (i, signer) in signers.iter().enumerate() {
                validate_key_config(signer, &format!("{field}.signers[{i}]"), false)?;
            }
        }
    }
    Ok(())
}
