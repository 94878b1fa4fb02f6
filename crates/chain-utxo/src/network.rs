use serde::{Deserialize, Serialize};

use crate::address::{AddressFormat, AddressType};

/// Bitcoin-like coins sharing this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coin {
    Bitcoin,
    Litecoin,
    Dogecoin,
}

/// Mainnet or testnet flavour of a coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
}

/// Four-byte BIP32 serialization version.
pub type KeyVersion = [u8; 4];

/// Canonical BIP32 versions understood by the `bitcoin` crate.
pub const XPUB_VERSION: KeyVersion = [0x04, 0x88, 0xb2, 0x1e];
pub const XPRV_VERSION: KeyVersion = [0x04, 0x88, 0xad, 0xe4];
pub const TPUB_VERSION: KeyVersion = [0x04, 0x35, 0x87, 0xcf];
pub const TPRV_VERSION: KeyVersion = [0x04, 0x35, 0x83, 0x94];

/// Base units per vbyte for each fee level when no live estimate is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackFeeRates {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

/// Static parameters describing one coin on one network.
#[derive(Debug)]
pub struct CoinParams {
    pub coin: Coin,
    pub network: NetworkType,
    pub symbol: &'static str,
    pub name: &'static str,
    pub decimals: u32,
    pub p2pkh_prefix: u8,
    pub p2sh_prefix: u8,
    /// Legacy P2SH version byte still accepted by the `deprecated` format.
    pub deprecated_p2sh_prefix: Option<u8>,
    /// Bech32 human readable part; `None` when the coin has no segwit.
    pub bech32_hrp: Option<&'static str>,
    pub wif_prefix: u8,
    pub public_key_versions: &'static [KeyVersion],
    pub private_key_versions: &'static [KeyVersion],
    pub coin_type: u32,
    pub dust_threshold: u64,
    pub min_relay_fee_rate: u64,
    pub fallback_fee_rates: FallbackFeeRates,
    pub tx_version: i32,
    pub enable_rbf: bool,
    pub address_types: &'static [AddressType],
    pub default_address_type: AddressType,
    pub formats: &'static [AddressFormat],
    pub default_format: AddressFormat,
}

const ALL_ADDRESS_TYPES: &[AddressType] = &[
    AddressType::P2pkh,
    AddressType::P2shP2wpkh,
    AddressType::P2wpkh,
    AddressType::P2shMultisig,
    AddressType::P2shP2wshMultisig,
    AddressType::P2wshMultisig,
];

const LEGACY_ADDRESS_TYPES: &[AddressType] = &[AddressType::P2pkh, AddressType::P2shMultisig];

const STANDARD_FORMAT: &[AddressFormat] = &[AddressFormat::Standard];
const LITECOIN_FORMATS: &[AddressFormat] = &[AddressFormat::Modern, AddressFormat::Deprecated];

// xpub, ypub, zpub, Ypub, Zpub
const BITCOIN_MAINNET_PUBLIC: &[KeyVersion] = &[
    XPUB_VERSION,
    [0x04, 0x9d, 0x7c, 0xb2],
    [0x04, 0xb2, 0x47, 0x46],
    [0x02, 0x95, 0xb4, 0x3f],
    [0x02, 0xaa, 0x7e, 0xd3],
];
// xprv, yprv, zprv, Yprv, Zprv
const BITCOIN_MAINNET_PRIVATE: &[KeyVersion] = &[
    XPRV_VERSION,
    [0x04, 0x9d, 0x78, 0x78],
    [0x04, 0xb2, 0x43, 0x0c],
    [0x02, 0x95, 0xb0, 0x05],
    [0x02, 0xaa, 0x7a, 0x99],
];
// tpub, upub, vpub, Upub, Vpub
const BITCOIN_TESTNET_PUBLIC: &[KeyVersion] = &[
    TPUB_VERSION,
    [0x04, 0x4a, 0x52, 0x62],
    [0x04, 0x5f, 0x1c, 0xf6],
    [0x02, 0x42, 0x89, 0xef],
    [0x02, 0x57, 0x54, 0x83],
];
// tprv, uprv, vprv, Uprv, Vprv
const BITCOIN_TESTNET_PRIVATE: &[KeyVersion] = &[
    TPRV_VERSION,
    [0x04, 0x4a, 0x4e, 0x28],
    [0x04, 0x5f, 0x18, 0xbc],
    [0x02, 0x42, 0x85, 0x88],
    [0x02, 0x57, 0x50, 0x48],
];
// xpub family plus Ltub, Mtub
const LITECOIN_MAINNET_PUBLIC: &[KeyVersion] = &[
    XPUB_VERSION,
    [0x04, 0x9d, 0x7c, 0xb2],
    [0x04, 0xb2, 0x47, 0x46],
    [0x01, 0x9d, 0xa4, 0x62],
    [0x01, 0xb2, 0x6e, 0xf6],
];
// xprv family plus Ltpv, Mtpv
const LITECOIN_MAINNET_PRIVATE: &[KeyVersion] = &[
    XPRV_VERSION,
    [0x04, 0x9d, 0x78, 0x78],
    [0x04, 0xb2, 0x43, 0x0c],
    [0x01, 0x9d, 0x9c, 0xfe],
    [0x01, 0xb2, 0x67, 0x92],
];
// tpub family plus ttub
const LITECOIN_TESTNET_PUBLIC: &[KeyVersion] = &[
    TPUB_VERSION,
    [0x04, 0x4a, 0x52, 0x62],
    [0x04, 0x5f, 0x1c, 0xf6],
    [0x04, 0x36, 0xf6, 0xe1],
];
// tprv family plus ttpv
const LITECOIN_TESTNET_PRIVATE: &[KeyVersion] = &[
    TPRV_VERSION,
    [0x04, 0x4a, 0x4e, 0x28],
    [0x04, 0x5f, 0x18, 0xbc],
    [0x04, 0x36, 0xef, 0x7d],
];
// xpub, dgub
const DOGECOIN_MAINNET_PUBLIC: &[KeyVersion] = &[XPUB_VERSION, [0x02, 0xfa, 0xca, 0xfd]];
// xprv, dgpv
const DOGECOIN_MAINNET_PRIVATE: &[KeyVersion] = &[XPRV_VERSION, [0x02, 0xfa, 0xc3, 0x98]];
// tpub, tgub
const DOGECOIN_TESTNET_PUBLIC: &[KeyVersion] = &[TPUB_VERSION, [0x04, 0x32, 0xa9, 0xa8]];
// tprv, tgpv
const DOGECOIN_TESTNET_PRIVATE: &[KeyVersion] = &[TPRV_VERSION, [0x04, 0x32, 0xa2, 0x43]];

pub static BITCOIN_MAINNET: CoinParams = CoinParams {
    coin: Coin::Bitcoin,
    network: NetworkType::Mainnet,
    symbol: "BTC",
    name: "Bitcoin",
    decimals: 8,
    p2pkh_prefix: 0x00,
    p2sh_prefix: 0x05,
    deprecated_p2sh_prefix: None,
    bech32_hrp: Some("bc"),
    wif_prefix: 0x80,
    public_key_versions: BITCOIN_MAINNET_PUBLIC,
    private_key_versions: BITCOIN_MAINNET_PRIVATE,
    coin_type: 0,
    dust_threshold: 546,
    min_relay_fee_rate: 1,
    fallback_fee_rates: FallbackFeeRates { low: 5, medium: 20, high: 50 },
    tx_version: 2,
    enable_rbf: true,
    address_types: ALL_ADDRESS_TYPES,
    default_address_type: AddressType::P2wpkh,
    formats: STANDARD_FORMAT,
    default_format: AddressFormat::Standard,
};

pub static BITCOIN_TESTNET: CoinParams = CoinParams {
    coin: Coin::Bitcoin,
    network: NetworkType::Testnet,
    symbol: "BTC",
    name: "Bitcoin Testnet",
    decimals: 8,
    p2pkh_prefix: 0x6f,
    p2sh_prefix: 0xc4,
    deprecated_p2sh_prefix: None,
    bech32_hrp: Some("tb"),
    wif_prefix: 0xef,
    public_key_versions: BITCOIN_TESTNET_PUBLIC,
    private_key_versions: BITCOIN_TESTNET_PRIVATE,
    coin_type: 1,
    dust_threshold: 546,
    min_relay_fee_rate: 1,
    fallback_fee_rates: FallbackFeeRates { low: 1, medium: 5, high: 10 },
    tx_version: 2,
    enable_rbf: true,
    address_types: ALL_ADDRESS_TYPES,
    default_address_type: AddressType::P2wpkh,
    formats: STANDARD_FORMAT,
    default_format: AddressFormat::Standard,
};

pub static LITECOIN_MAINNET: CoinParams = CoinParams {
    coin: Coin::Litecoin,
    network: NetworkType::Mainnet,
    symbol: "LTC",
    name: "Litecoin",
    decimals: 8,
    p2pkh_prefix: 0x30,
    p2sh_prefix: 0x32,
    deprecated_p2sh_prefix: Some(0x05),
    bech32_hrp: Some("ltc"),
    wif_prefix: 0xb0,
    public_key_versions: LITECOIN_MAINNET_PUBLIC,
    private_key_versions: LITECOIN_MAINNET_PRIVATE,
    coin_type: 2,
    dust_threshold: 5_460,
    min_relay_fee_rate: 1,
    fallback_fee_rates: FallbackFeeRates { low: 2, medium: 5, high: 10 },
    tx_version: 2,
    enable_rbf: false,
    address_types: ALL_ADDRESS_TYPES,
    default_address_type: AddressType::P2wpkh,
    formats: LITECOIN_FORMATS,
    default_format: AddressFormat::Modern,
};

pub static LITECOIN_TESTNET: CoinParams = CoinParams {
    coin: Coin::Litecoin,
    network: NetworkType::Testnet,
    symbol: "LTC",
    name: "Litecoin Testnet",
    decimals: 8,
    p2pkh_prefix: 0x6f,
    p2sh_prefix: 0x3a,
    deprecated_p2sh_prefix: Some(0xc4),
    bech32_hrp: Some("tltc"),
    wif_prefix: 0xef,
    public_key_versions: LITECOIN_TESTNET_PUBLIC,
    private_key_versions: LITECOIN_TESTNET_PRIVATE,
    coin_type: 1,
    dust_threshold: 5_460,
    min_relay_fee_rate: 1,
    fallback_fee_rates: FallbackFeeRates { low: 1, medium: 2, high: 5 },
    tx_version: 2,
    enable_rbf: false,
    address_types: ALL_ADDRESS_TYPES,
    default_address_type: AddressType::P2wpkh,
    formats: LITECOIN_FORMATS,
    default_format: AddressFormat::Modern,
};

pub static DOGECOIN_MAINNET: CoinParams = CoinParams {
    coin: Coin::Dogecoin,
    network: NetworkType::Mainnet,
    symbol: "DOGE",
    name: "Dogecoin",
    decimals: 8,
    p2pkh_prefix: 0x1e,
    p2sh_prefix: 0x16,
    deprecated_p2sh_prefix: None,
    bech32_hrp: None,
    wif_prefix: 0x9e,
    public_key_versions: DOGECOIN_MAINNET_PUBLIC,
    private_key_versions: DOGECOIN_MAINNET_PRIVATE,
    coin_type: 3,
    dust_threshold: 1_000_000,
    min_relay_fee_rate: 1_000,
    fallback_fee_rates: FallbackFeeRates { low: 1_000, medium: 2_000, high: 5_000 },
    tx_version: 1,
    enable_rbf: false,
    address_types: LEGACY_ADDRESS_TYPES,
    default_address_type: AddressType::P2pkh,
    formats: STANDARD_FORMAT,
    default_format: AddressFormat::Standard,
};

pub static DOGECOIN_TESTNET: CoinParams = CoinParams {
    coin: Coin::Dogecoin,
    network: NetworkType::Testnet,
    symbol: "DOGE",
    name: "Dogecoin Testnet",
    decimals: 8,
    p2pkh_prefix: 0x71,
    p2sh_prefix: 0xc4,
    deprecated_p2sh_prefix: None,
    bech32_hrp: None,
    wif_prefix: 0xf1,
    public_key_versions: DOGECOIN_TESTNET_PUBLIC,
    private_key_versions: DOGECOIN_TESTNET_PRIVATE,
    coin_type: 1,
    dust_threshold: 1_000_000,
    min_relay_fee_rate: 1_000,
    fallback_fee_rates: FallbackFeeRates { low: 1_000, medium: 2_000, high: 5_000 },
    tx_version: 1,
    enable_rbf: false,
    address_types: LEGACY_ADDRESS_TYPES,
    default_address_type: AddressType::P2pkh,
    formats: STANDARD_FORMAT,
    default_format: AddressFormat::Standard,
};

impl Coin {
    pub fn symbol(self) -> &'static str {
        match self {
            Coin::Bitcoin => "BTC",
            Coin::Litecoin => "LTC",
            Coin::Dogecoin => "DOGE",
        }
    }
}

impl CoinParams {
    /// Look up the parameter table for a coin on a network.
    pub fn get(coin: Coin, network: NetworkType) -> &'static CoinParams {
        match (coin, network) {
            (Coin::Bitcoin, NetworkType::Mainnet) => &BITCOIN_MAINNET,
            (Coin::Bitcoin, NetworkType::Testnet) => &BITCOIN_TESTNET,
            (Coin::Litecoin, NetworkType::Mainnet) => &LITECOIN_MAINNET,
            (Coin::Litecoin, NetworkType::Testnet) => &LITECOIN_TESTNET,
            (Coin::Dogecoin, NetworkType::Mainnet) => &DOGECOIN_MAINNET,
            (Coin::Dogecoin, NetworkType::Testnet) => &DOGECOIN_TESTNET,
        }
    }

    pub fn supports_address_type(&self, address_type: AddressType) -> bool {
        self.address_types.contains(&address_type)
    }

    pub fn supports_format(&self, format: AddressFormat) -> bool {
        self.formats.contains(&format)
    }

    pub fn is_testnet(&self) -> bool {
        self.network == NetworkType::Testnet
    }

    /// The `bitcoin` crate's notion of network kind, used for keys and WIF.
    pub fn network_kind(&self) -> bitcoin::NetworkKind {
        match self.network {
            NetworkType::Mainnet => bitcoin::NetworkKind::Main,
            NetworkType::Testnet => bitcoin::NetworkKind::Test,
        }
    }

    /// Canonical BIP32 versions (xpub/xprv or tpub/tprv) for this network.
    pub fn canonical_key_versions(&self) -> (KeyVersion, KeyVersion) {
        match self.network {
            NetworkType::Mainnet => (XPUB_VERSION, XPRV_VERSION),
            NetworkType::Testnet => (TPUB_VERSION, TPRV_VERSION),
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::Mainnet => write!(f, "mainnet"),
            NetworkType::Testnet => write!(f, "testnet"),
        }
    }
}

impl std::fmt::Display for CoinParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.symbol, self.network)
    }
}
