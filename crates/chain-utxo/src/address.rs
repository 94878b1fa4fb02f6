use bech32::{FromBase32, ToBase32, Variant};
use bitcoin::hashes::Hash;
use bitcoin::script::{Script, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::error::UtxoError;
use crate::network::CoinParams;

/// Spending script family an account derives its addresses with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    #[serde(rename = "p2pkh")]
    P2pkh,
    #[serde(rename = "p2sh-p2wpkh")]
    P2shP2wpkh,
    #[serde(rename = "p2wpkh")]
    P2wpkh,
    #[serde(rename = "p2sh-multisig")]
    P2shMultisig,
    #[serde(rename = "p2sh-p2wsh-multisig")]
    P2shP2wshMultisig,
    #[serde(rename = "p2wsh-multisig")]
    P2wshMultisig,
}

impl AddressType {
    /// BIP43 purpose used for the default derivation path.
    pub fn purpose(self) -> u32 {
        match self {
            AddressType::P2pkh => 44,
            AddressType::P2shP2wpkh => 49,
            AddressType::P2wpkh => 84,
            AddressType::P2shMultisig
            | AddressType::P2shP2wshMultisig
            | AddressType::P2wshMultisig => 87,
        }
    }

    /// Every purpose a derivation path may use for this address type.
    pub fn accepted_purposes(self) -> &'static [u32] {
        match self {
            AddressType::P2pkh => &[44],
            AddressType::P2shP2wpkh => &[49],
            AddressType::P2wpkh => &[84],
            AddressType::P2shMultisig => &[87, 45, 48],
            AddressType::P2shP2wshMultisig | AddressType::P2wshMultisig => &[87, 48],
        }
    }

    pub fn is_multisig(self) -> bool {
        matches!(
            self,
            AddressType::P2shMultisig | AddressType::P2shP2wshMultisig | AddressType::P2wshMultisig
        )
    }

    pub fn is_segwit(self) -> bool {
        !matches!(self, AddressType::P2pkh | AddressType::P2shMultisig)
    }
}

impl std::fmt::Display for AddressType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AddressType::P2pkh => "p2pkh",
            AddressType::P2shP2wpkh => "p2sh-p2wpkh",
            AddressType::P2wpkh => "p2wpkh",
            AddressType::P2shMultisig => "p2sh-multisig",
            AddressType::P2shP2wshMultisig => "p2sh-p2wsh-multisig",
            AddressType::P2wshMultisig => "p2wsh-multisig",
        };
        f.write_str(name)
    }
}

/// Textual encoding of an address.
///
/// Most coins have a single `Standard` encoding. Litecoin distinguishes the
/// `Modern` (M/Q-prefixed) and `Deprecated` (3/2-prefixed) P2SH encodings of
/// the same script; P2PKH and bech32 addresses are identical in both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFormat {
    Standard,
    Modern,
    Deprecated,
}

/// Output script families an address can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    /// Witness program of version 1 or higher (taproot and future versions).
    Witness(u8),
}

/// Classify an output script, returning `None` for non-standard scripts.
pub fn script_kind(script: &Script) -> Option<AddressKind> {
    if script.is_p2pkh() {
        return Some(AddressKind::P2pkh);
    }
    if script.is_p2sh() {
        return Some(AddressKind::P2sh);
    }
    if script.is_witness_program() {
        let bytes = script.as_bytes();
        return match (witness_version_of(bytes[0])?, bytes.len() - 2) {
            (0, 20) => Some(AddressKind::P2wpkh),
            (0, 32) => Some(AddressKind::P2wsh),
            (0, _) => None,
            (v, _) => Some(AddressKind::Witness(v)),
        };
    }
    None
}

fn witness_version_of(opcode: u8) -> Option<u8> {
    match opcode {
        0x00 => Some(0),
        0x51..=0x60 => Some(opcode - 0x50),
        _ => None,
    }
}

fn witness_script(version: u8, program: &[u8]) -> ScriptBuf {
    let mut bytes = Vec::with_capacity(program.len() + 2);
    bytes.push(if version == 0 { 0x00 } else { 0x50 + version });
    bytes.push(program.len() as u8);
    bytes.extend_from_slice(program);
    ScriptBuf::from(bytes)
}

fn p2sh_prefix_for(params: &CoinParams, format: AddressFormat) -> Result<u8, UtxoError> {
    if !params.supports_format(format) {
        return Err(UtxoError::InvalidAddress(format!(
            "{params} does not support the {format:?} address format"
        )));
    }
    match format {
        AddressFormat::Deprecated => params.deprecated_p2sh_prefix.ok_or_else(|| {
            UtxoError::InvalidAddress(format!("{params} has no deprecated P2SH encoding"))
        }),
        AddressFormat::Standard | AddressFormat::Modern => Ok(params.p2sh_prefix),
    }
}

fn base58_address(prefix: u8, hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(hash.len() + 1);
    payload.push(prefix);
    payload.extend_from_slice(hash);
    bs58::encode(payload).with_check().into_string()
}

/// Encode an output script as an address in the requested format.
pub fn encode_address(
    params: &CoinParams,
    script: &Script,
    format: AddressFormat,
) -> Result<String, UtxoError> {
    if !params.supports_format(format) {
        return Err(UtxoError::InvalidAddress(format!(
            "{params} does not support the {format:?} address format"
        )));
    }
    let bytes = script.as_bytes();
    match script_kind(script) {
        Some(AddressKind::P2pkh) => Ok(base58_address(params.p2pkh_prefix, &bytes[3..23])),
        Some(AddressKind::P2sh) => Ok(base58_address(p2sh_prefix_for(params, format)?, &bytes[2..22])),
        Some(AddressKind::P2wpkh) | Some(AddressKind::P2wsh) | Some(AddressKind::Witness(_)) => {
            let hrp = params.bech32_hrp.ok_or_else(|| {
                UtxoError::InvalidAddress(format!("{params} does not support segwit outputs"))
            })?;
            let version = witness_version_of(bytes[0])
                .ok_or_else(|| UtxoError::InvalidAddress("bad witness version".into()))?;
            let variant = if version == 0 { Variant::Bech32 } else { Variant::Bech32m };
            let mut data = vec![bech32::u5::try_from_u8(version)
                .map_err(|e| UtxoError::InvalidAddress(format!("bad witness version: {e}")))?];
            data.extend((&bytes[2..]).to_base32());
            bech32::encode(hrp, data, variant)
                .map_err(|e| UtxoError::InvalidAddress(format!("bech32 encoding failed: {e}")))
        }
        None => Err(UtxoError::InvalidAddress(format!(
            "script {} has no address form",
            script.to_hex_string()
        ))),
    }
}

fn is_bech32_candidate(params: &CoinParams, address: &str) -> bool {
    match params.bech32_hrp {
        Some(hrp) => address.to_ascii_lowercase().starts_with(&format!("{hrp}1")),
        None => false,
    }
}

fn decode_bech32(params: &CoinParams, address: &str) -> Result<ScriptBuf, UtxoError> {
    let (hrp, data, variant) = bech32::decode(address)
        .map_err(|e| UtxoError::InvalidAddress(format!("invalid bech32 address: {e}")))?;
    if Some(hrp.as_str()) != params.bech32_hrp {
        return Err(UtxoError::InvalidAddress(format!(
            "address prefix {hrp} does not belong to {params}"
        )));
    }
    let (version, program) = data
        .split_first()
        .ok_or_else(|| UtxoError::InvalidAddress("empty witness program".into()))?;
    let version = version.to_u8();
    let program = Vec::<u8>::from_base32(program)
        .map_err(|e| UtxoError::InvalidAddress(format!("invalid witness program: {e}")))?;

    match (version, variant) {
        (0, Variant::Bech32) if program.len() == 20 || program.len() == 32 => {}
        (1..=16, Variant::Bech32m) if (2..=40).contains(&program.len()) => {}
        _ => {
            return Err(UtxoError::InvalidAddress(format!(
                "invalid witness version {version} / program length {}",
                program.len()
            )))
        }
    }
    Ok(witness_script(version, &program))
}

fn decode_base58(
    params: &CoinParams,
    address: &str,
    format: Option<AddressFormat>,
) -> Result<ScriptBuf, UtxoError> {
    let payload = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| UtxoError::InvalidAddress(format!("invalid base58 address: {e}")))?;
    if payload.len() != 21 {
        return Err(UtxoError::InvalidAddress(format!(
            "unexpected payload length {}",
            payload.len()
        )));
    }
    let (prefix, hash) = (payload[0], &payload[1..]);

    if prefix == params.p2pkh_prefix {
        let hash = bitcoin::PubkeyHash::from_slice(hash)
            .map_err(|e| UtxoError::InvalidAddress(e.to_string()))?;
        return Ok(ScriptBuf::new_p2pkh(&hash));
    }

    let accepted: Vec<u8> = match format {
        Some(format) => vec![p2sh_prefix_for(params, format)?],
        None => params
            .formats
            .iter()
            .filter_map(|f| p2sh_prefix_for(params, *f).ok())
            .collect(),
    };
    if accepted.contains(&prefix) {
        let hash = bitcoin::ScriptHash::from_slice(hash)
            .map_err(|e| UtxoError::InvalidAddress(e.to_string()))?;
        return Ok(ScriptBuf::new_p2sh(&hash));
    }

    Err(UtxoError::InvalidAddress(format!(
        "version byte {prefix:#04x} is not valid for {params}"
    )))
}

/// Decode an address into its output script.
///
/// With `format` set only that encoding is accepted; otherwise any encoding
/// the coin recognises is.
pub fn decode_address(
    params: &CoinParams,
    address: &str,
    format: Option<AddressFormat>,
) -> Result<ScriptBuf, UtxoError> {
    if let Some(format) = format {
        if !params.supports_format(format) {
            return Err(UtxoError::InvalidAddress(format!(
                "{params} does not support the {format:?} address format"
            )));
        }
    }
    if is_bech32_candidate(params, address) {
        decode_bech32(params, address)
    } else {
        decode_base58(params, address, format)
    }
}

pub fn is_valid_address(params: &CoinParams, address: &str, format: Option<AddressFormat>) -> bool {
    decode_address(params, address, format).is_ok()
}

/// Re-encode a valid address in the requested (or default) format.
///
/// Returns `None` for anything that does not parse.
pub fn standardize_address(
    params: &CoinParams,
    address: &str,
    format: Option<AddressFormat>,
) -> Option<String> {
    let target = format.unwrap_or(params.default_format);
    let script = decode_address(params, address, None).ok()?;
    encode_address(params, &script, target).ok()
}

/// The script family behind an address, if it is valid for `params`.
pub fn address_type_of(params: &CoinParams, address: &str) -> Option<AddressKind> {
    decode_address(params, address, None)
        .ok()
        .and_then(|script| script_kind(&script))
}
