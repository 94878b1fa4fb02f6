use std::collections::BTreeMap;

use chain_utxo::Coin;

use crate::config::PaymentsConfig;
use crate::error::PaymentsError;
use crate::payments::UtxoPayments;
use crate::provider::BlockchainProvider;

/// Symbol to coin registrations, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct PaymentsFactory {
    assets: BTreeMap<String, Coin>,
}

impl PaymentsFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// BTC, LTC and DOGE.
    pub fn with_default_assets() -> Self {
        let mut factory = Self::new();
        factory
            .register("BTC", Coin::Bitcoin)
            .register("LTC", Coin::Litecoin)
            .register("DOGE", Coin::Dogecoin);
        factory
    }

    pub fn register(&mut self, symbol: &str, coin: Coin) -> &mut Self {
        self.assets.insert(symbol.trim().to_ascii_uppercase(), coin);
        self
    }

    pub fn supports(&self, symbol: &str) -> bool {
        self.coin(symbol).is_ok()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.assets.keys().map(String::as_str)
    }

    pub fn coin(&self, symbol: &str) -> Result<Coin, PaymentsError> {
        self.assets
            .get(&symbol.trim().to_ascii_uppercase())
            .copied()
            .ok_or_else(|| PaymentsError::UnsupportedAsset(symbol.to_string()))
    }

    pub fn new_payments<P: BlockchainProvider>(
        &self,
        symbol: &str,
        config: &PaymentsConfig,
        provider: P,
    ) -> Result<UtxoPayments<P>, PaymentsError> {
        UtxoPayments::new(self.coin(symbol)?, config, provider)
    }
}
