//! Hierarchical and discrete key derivation.
//!
//! Accounts are described by a signer set: one key source for single-sig
//! address types, or `m`-of-`n` key sources for the multisig types. Each key
//! source is an account-level extended private key, an account-level extended
//! public key (read-only) or a flat list of discrete keys indexed by account
//! index. Extended keys derive the receive chain `0/index`.

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::script::{Builder, ScriptBuf};
use bitcoin::secp256k1::{All, Secp256k1, SecretKey};
use bitcoin::{PrivateKey, PublicKey, ScriptHash, WScriptHash};
use tracing::debug;
use zeroize::Zeroizing;

use crate::address::{encode_address, AddressFormat, AddressType};
use crate::error::UtxoError;
use crate::network::{CoinParams, KeyVersion};

/// Largest signer set whose multisig script still fits a P2SH redeem script.
pub const MAX_MULTISIG_KEYS: usize = 15;

const EXTENDED_KEY_LEN: usize = 78;

/// A decoded BIP32 extended key.
#[derive(Debug, Clone)]
pub enum ExtendedKey {
    Private(Xpriv),
    Public(Xpub),
}

/// Decode an extended key in any version encoding registered for the coin.
///
/// SLIP-132 style versions (ypub, zpub, Ltub, dgub, ...) are rewritten to the
/// canonical xpub/tpub (xprv/tprv) version before BIP32 decoding.
pub fn parse_extended_key(params: &CoinParams, encoded: &str) -> Result<ExtendedKey, UtxoError> {
    let mut data = Zeroizing::new(
        bs58::decode(encoded.trim())
            .with_check(None)
            .into_vec()
            .map_err(|e| UtxoError::InvalidKey(format!("invalid extended key encoding: {e}")))?,
    );
    if data.len() != EXTENDED_KEY_LEN {
        return Err(UtxoError::InvalidKey(format!(
            "extended key must be {EXTENDED_KEY_LEN} bytes, got {}",
            data.len()
        )));
    }

    let version: KeyVersion = [data[0], data[1], data[2], data[3]];
    let (canonical_public, canonical_private) = params.canonical_key_versions();
    if params.public_key_versions.contains(&version) {
        data[..4].copy_from_slice(&canonical_public);
        Xpub::decode(&data)
            .map(ExtendedKey::Public)
            .map_err(|e| UtxoError::InvalidKey(e.to_string()))
    } else if params.private_key_versions.contains(&version) {
        data[..4].copy_from_slice(&canonical_private);
        Xpriv::decode(&data)
            .map(ExtendedKey::Private)
            .map_err(|e| UtxoError::InvalidKey(e.to_string()))
    } else {
        Err(UtxoError::InvalidKey(format!(
            "version bytes {} are not recognised for {params}",
            hex::encode(version)
        )))
    }
}

/// `m/{purpose}'/{coin_type}'/{account}'` for the address type on this coin.
pub fn default_derivation_path(
    params: &CoinParams,
    address_type: AddressType,
    account: u32,
) -> Result<DerivationPath, UtxoError> {
    let account = ChildNumber::from_hardened_idx(account)
        .map_err(|e| UtxoError::UnsupportedDerivation(e.to_string()))?;
    Ok(DerivationPath::from(vec![
        ChildNumber::Hardened { index: address_type.purpose() },
        ChildNumber::Hardened { index: params.coin_type },
        account,
    ]))
}

fn check_derivation_path(
    params: &CoinParams,
    address_type: AddressType,
    path: &DerivationPath,
) -> Result<(), UtxoError> {
    if !params.supports_address_type(address_type) {
        return Err(UtxoError::UnsupportedAddressType(format!(
            "{address_type} is not supported by {params}"
        )));
    }
    match path.as_ref().first() {
        Some(ChildNumber::Hardened { index }) if address_type.accepted_purposes().contains(index) => {
            Ok(())
        }
        Some(child) => Err(UtxoError::UnsupportedDerivation(format!(
            "purpose {child} is not valid for {address_type} on {params}"
        ))),
        None => Err(UtxoError::UnsupportedDerivation("derivation path is empty".into())),
    }
}

/// Derive the account-level key at `path` from a root key.
pub fn derive_account_key(
    params: &CoinParams,
    address_type: AddressType,
    root: &Xpriv,
    path: &DerivationPath,
) -> Result<Xpriv, UtxoError> {
    check_derivation_path(params, address_type, path)?;
    let secp = Secp256k1::new();
    root.derive_priv(&secp, path)
        .map_err(|e| UtxoError::UnsupportedDerivation(e.to_string()))
}

/// Encode a private key in wallet import format using the coin's prefix.
pub fn encode_wif(params: &CoinParams, key: &PrivateKey) -> Zeroizing<String> {
    let mut payload = Zeroizing::new(Vec::with_capacity(34));
    payload.push(params.wif_prefix);
    payload.extend_from_slice(&key.inner.secret_bytes());
    if key.compressed {
        payload.push(0x01);
    }
    Zeroizing::new(bs58::encode(payload.as_slice()).with_check().into_string())
}

/// Decode a wallet import format private key for this coin.
pub fn decode_wif(params: &CoinParams, wif: &str) -> Result<PrivateKey, UtxoError> {
    let payload = Zeroizing::new(
        bs58::decode(wif.trim())
            .with_check(None)
            .into_vec()
            .map_err(|e| UtxoError::InvalidKey(format!("invalid WIF encoding: {e}")))?,
    );
    let compressed = match payload.len() {
        33 => false,
        34 if payload[33] == 0x01 => true,
        _ => return Err(UtxoError::InvalidKey("invalid WIF payload length".into())),
    };
    if payload[0] != params.wif_prefix {
        return Err(UtxoError::InvalidKey(format!(
            "WIF prefix {:#04x} does not belong to {params}",
            payload[0]
        )));
    }
    let inner = SecretKey::from_slice(&payload[1..33])
        .map_err(|e| UtxoError::InvalidKey(e.to_string()))?;
    Ok(PrivateKey {
        compressed,
        network: params.network_kind(),
        inner,
    })
}

/// A single non-hierarchical key: a WIF private key or a hex public key.
#[derive(Debug, Clone)]
pub enum DiscreteKey {
    Private(PrivateKey),
    Public(PublicKey),
}

impl DiscreteKey {
    /// Hex strings of 33 or 65 bytes parse as public keys, everything else as WIF.
    pub fn parse(params: &CoinParams, encoded: &str) -> Result<Self, UtxoError> {
        let encoded = encoded.trim();
        let looks_hex = encoded.chars().all(|c| c.is_ascii_hexdigit());
        if looks_hex && (encoded.len() == 66 || encoded.len() == 130) {
            let bytes = hex::decode(encoded).map_err(|e| UtxoError::InvalidKey(e.to_string()))?;
            PublicKey::from_slice(&bytes)
                .map(DiscreteKey::Public)
                .map_err(|e| UtxoError::InvalidKey(e.to_string()))
        } else {
            decode_wif(params, encoded).map(DiscreteKey::Private)
        }
    }
}

/// Where the keys of one signer come from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Account-level extended private key.
    HdPrivate(Xpriv),
    /// Account-level extended public key; never yields private keys.
    HdPublic(Xpub),
    /// Keys indexed directly by account index; gaps are `None`.
    KeyPairs(Vec<Option<DiscreteKey>>),
}

fn receive_path(index: u32) -> Result<[ChildNumber; 2], UtxoError> {
    let child = ChildNumber::from_normal_idx(index)
        .map_err(|e| UtxoError::UnsupportedDerivation(e.to_string()))?;
    Ok([ChildNumber::Normal { index: 0 }, child])
}

impl KeySource {
    fn key_pair(&self, index: u32) -> Option<&DiscreteKey> {
        match self {
            KeySource::KeyPairs(keys) => keys.get(index as usize).and_then(Option::as_ref),
            _ => None,
        }
    }

    pub fn public_key(&self, secp: &Secp256k1<All>, index: u32) -> Result<PublicKey, UtxoError> {
        match self {
            KeySource::HdPrivate(xpriv) => {
                let child = xpriv
                    .derive_priv(secp, &receive_path(index)?)
                    .map_err(|e| UtxoError::InvalidKey(e.to_string()))?;
                Ok(PublicKey::new(child.private_key.public_key(secp)))
            }
            KeySource::HdPublic(xpub) => {
                let child = xpub
                    .derive_pub(secp, &receive_path(index)?)
                    .map_err(|e| UtxoError::InvalidKey(e.to_string()))?;
                Ok(PublicKey::new(child.public_key))
            }
            KeySource::KeyPairs(_) => match self.key_pair(index) {
                Some(DiscreteKey::Private(key)) => Ok(PublicKey::from_private_key(secp, key)),
                Some(DiscreteKey::Public(key)) => Ok(*key),
                None => Err(UtxoError::InvalidKey(format!("no key configured for index {index}"))),
            },
        }
    }

    /// The private key for `index`, or `None` when this source is public only.
    pub fn private_key(
        &self,
        secp: &Secp256k1<All>,
        index: u32,
    ) -> Result<Option<PrivateKey>, UtxoError> {
        match self {
            KeySource::HdPrivate(xpriv) => {
                let child = xpriv
                    .derive_priv(secp, &receive_path(index)?)
                    .map_err(|e| UtxoError::InvalidKey(e.to_string()))?;
                Ok(Some(child.to_priv()))
            }
            KeySource::HdPublic(_) => Ok(None),
            KeySource::KeyPairs(_) => match self.key_pair(index) {
                Some(DiscreteKey::Private(key)) => Ok(Some(*key)),
                Some(DiscreteKey::Public(_)) => Ok(None),
                None => Err(UtxoError::InvalidKey(format!("no key configured for index {index}"))),
            },
        }
    }

    /// Account extended public key, if this source is hierarchical.
    pub fn account_xpub(&self, secp: &Secp256k1<All>) -> Option<Xpub> {
        match self {
            KeySource::HdPrivate(xpriv) => Some(Xpub::from_priv(secp, xpriv)),
            KeySource::HdPublic(xpub) => Some(*xpub),
            KeySource::KeyPairs(_) => None,
        }
    }

    pub fn is_read_only(&self) -> bool {
        match self {
            KeySource::HdPrivate(_) => false,
            KeySource::HdPublic(_) => true,
            KeySource::KeyPairs(keys) => !keys
                .iter()
                .any(|k| matches!(k, Some(DiscreteKey::Private(_)))),
        }
    }
}

impl Drop for KeySource {
    fn drop(&mut self) {
        match self {
            KeySource::HdPrivate(xpriv) => xpriv.private_key.non_secure_erase(),
            KeySource::KeyPairs(keys) => {
                for key in keys.iter_mut().flatten() {
                    if let DiscreteKey::Private(private) = key {
                        private.inner.non_secure_erase();
                    }
                }
            }
            KeySource::HdPublic(_) => {}
        }
    }
}

/// The parties that control an account.
#[derive(Debug, Clone)]
pub enum SignerSet {
    Single(KeySource),
    Multisig { m: usize, signers: Vec<KeySource> },
}

impl SignerSet {
    pub fn sources(&self) -> &[KeySource] {
        match self {
            SignerSet::Single(source) => std::slice::from_ref(source),
            SignerSet::Multisig { signers, .. } => signers,
        }
    }

    /// Required signatures per input.
    pub fn threshold(&self) -> usize {
        match self {
            SignerSet::Single(_) => 1,
            SignerSet::Multisig { m, .. } => *m,
        }
    }
}

/// Scripts and keys needed to pay to and spend from one derived address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendInfo {
    pub address_type: AddressType,
    pub script_pubkey: ScriptBuf,
    pub redeem_script: Option<ScriptBuf>,
    pub witness_script: Option<ScriptBuf>,
    /// Public keys in script order (BIP67-sorted for multisig).
    pub public_keys: Vec<PublicKey>,
    pub required_signatures: usize,
}

fn multisig_script(m: usize, keys: &[PublicKey]) -> ScriptBuf {
    let mut builder = Builder::new().push_int(m as i64);
    for key in keys {
        builder = builder.push_key(key);
    }
    builder
        .push_int(keys.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

pub(crate) fn p2sh_of(redeem: &ScriptBuf) -> ScriptBuf {
    ScriptBuf::new_p2sh(&ScriptHash::hash(redeem.as_bytes()))
}

pub(crate) fn p2wsh_of(witness: &ScriptBuf) -> ScriptBuf {
    ScriptBuf::new_p2wsh(&WScriptHash::hash(witness.as_bytes()))
}

impl SpendInfo {
    /// Build the spending scripts for `keys` under `address_type`.
    pub fn new(
        address_type: AddressType,
        mut public_keys: Vec<PublicKey>,
        required_signatures: usize,
    ) -> Result<Self, UtxoError> {
        if address_type.is_segwit() && public_keys.iter().any(|k| !k.compressed) {
            return Err(UtxoError::InvalidKey(format!(
                "{address_type} requires compressed public keys"
            )));
        }

        let (script_pubkey, redeem_script, witness_script) = match address_type {
            AddressType::P2pkh | AddressType::P2wpkh | AddressType::P2shP2wpkh => {
                let [key] = public_keys.as_slice() else {
                    return Err(UtxoError::InvalidRequest(format!(
                        "{address_type} takes exactly one key, got {}",
                        public_keys.len()
                    )));
                };
                match address_type {
                    AddressType::P2pkh => (ScriptBuf::new_p2pkh(&key.pubkey_hash()), None, None),
                    _ => {
                        let wpkh = key
                            .wpubkey_hash()
                            .map_err(|e| UtxoError::InvalidKey(e.to_string()))?;
                        let program = ScriptBuf::new_p2wpkh(&wpkh);
                        if address_type == AddressType::P2wpkh {
                            (program, None, None)
                        } else {
                            (p2sh_of(&program), Some(program), None)
                        }
                    }
                }
            }
            AddressType::P2shMultisig
            | AddressType::P2shP2wshMultisig
            | AddressType::P2wshMultisig => {
                let n = public_keys.len();
                if required_signatures == 0 || required_signatures > n || n > MAX_MULTISIG_KEYS {
                    return Err(UtxoError::InvalidRequest(format!(
                        "invalid multisig shape {required_signatures}-of-{n}"
                    )));
                }
                public_keys.sort_by_key(|k| k.to_bytes());
                let multisig = multisig_script(required_signatures, &public_keys);
                match address_type {
                    AddressType::P2shMultisig => (p2sh_of(&multisig), Some(multisig), None),
                    AddressType::P2wshMultisig => (p2wsh_of(&multisig), None, Some(multisig)),
                    _ => {
                        let program = p2wsh_of(&multisig);
                        (p2sh_of(&program), Some(program), Some(multisig))
                    }
                }
            }
        };

        let required_signatures = if address_type.is_multisig() { required_signatures } else { 1 };
        Ok(SpendInfo {
            address_type,
            script_pubkey,
            redeem_script,
            witness_script,
            public_keys,
            required_signatures,
        })
    }
}

/// Keys and address derived for one account index.
#[derive(Debug)]
pub struct Signatory {
    pub index: u32,
    pub address: String,
    pub spend: SpendInfo,
    signing_keys: Vec<PrivateKey>,
}

impl Signatory {
    /// Hex public key; multisig addresses list every key in script order.
    pub fn public_key(&self) -> String {
        self.spend
            .public_keys
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// WIF of the first private key this party holds for the address.
    pub fn private_key(&self, params: &CoinParams) -> Option<Zeroizing<String>> {
        self.signing_keys.first().map(|k| encode_wif(params, k))
    }

    /// Private keys held for this address, or `ReadOnlyKey` if there are none.
    pub fn signing_keys(&self) -> Result<&[PrivateKey], UtxoError> {
        if self.signing_keys.is_empty() {
            Err(UtxoError::ReadOnlyKey(format!(
                "no private key available for index {}",
                self.index
            )))
        } else {
            Ok(&self.signing_keys)
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.signing_keys.is_empty()
    }
}

impl Drop for Signatory {
    fn drop(&mut self) {
        for key in &mut self.signing_keys {
            key.inner.non_secure_erase();
        }
    }
}

/// Derives addresses and keys for one configured account.
pub struct AddressDeriver {
    params: &'static CoinParams,
    address_type: AddressType,
    format: AddressFormat,
    signers: SignerSet,
    secp: Secp256k1<All>,
}

impl std::fmt::Debug for AddressDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressDeriver")
            .field("params", &self.params.to_string())
            .field("address_type", &self.address_type)
            .field("format", &self.format)
            .field("threshold", &self.signers.threshold())
            .field("signers", &self.signers.sources().len())
            .finish()
    }
}

impl AddressDeriver {
    pub fn new(
        params: &'static CoinParams,
        address_type: AddressType,
        signers: SignerSet,
    ) -> Result<Self, UtxoError> {
        if !params.supports_address_type(address_type) {
            return Err(UtxoError::UnsupportedAddressType(format!(
                "{address_type} is not supported by {params}"
            )));
        }
        match (&signers, address_type.is_multisig()) {
            (SignerSet::Single(_), false) => {}
            (SignerSet::Multisig { m, signers }, true) => {
                let n = signers.len();
                if *m == 0 || *m > n || n > MAX_MULTISIG_KEYS {
                    return Err(UtxoError::InvalidRequest(format!(
                        "invalid multisig shape {m}-of-{n}"
                    )));
                }
            }
            (SignerSet::Single(_), true) => {
                return Err(UtxoError::InvalidRequest(format!(
                    "{address_type} requires a multisig signer set"
                )))
            }
            (SignerSet::Multisig { .. }, false) => {
                return Err(UtxoError::InvalidRequest(format!(
                    "{address_type} cannot be used with a multisig signer set"
                )))
            }
        }
        Ok(Self {
            params,
            address_type,
            format: params.default_format,
            signers,
            secp: Secp256k1::new(),
        })
    }

    /// Render addresses in `format` instead of the coin default.
    pub fn with_format(mut self, format: AddressFormat) -> Result<Self, UtxoError> {
        if !self.params.supports_format(format) {
            return Err(UtxoError::InvalidRequest(format!(
                "{} does not support the {format:?} address format",
                self.params
            )));
        }
        self.format = format;
        Ok(self)
    }

    pub fn params(&self) -> &'static CoinParams {
        self.params
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    pub fn format(&self) -> AddressFormat {
        self.format
    }

    pub fn signers(&self) -> &SignerSet {
        &self.signers
    }

    /// `(m, n)` for multisig accounts.
    pub fn multisig_shape(&self) -> Option<(usize, usize)> {
        match &self.signers {
            SignerSet::Single(_) => None,
            SignerSet::Multisig { m, signers } => Some((*m, signers.len())),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.signers.sources().iter().all(KeySource::is_read_only)
    }

    pub fn derive(&self, index: u32) -> Result<Signatory, UtxoError> {
        let sources = self.signers.sources();
        let mut public_keys = Vec::with_capacity(sources.len());
        let mut signing_keys = Vec::new();
        for source in sources {
            public_keys.push(source.public_key(&self.secp, index)?);
            if let Some(key) = source.private_key(&self.secp, index)? {
                signing_keys.push(key);
            }
        }

        let spend = SpendInfo::new(self.address_type, public_keys, self.signers.threshold())?;
        let address = encode_address(self.params, &spend.script_pubkey, self.format)?;
        debug!(
            index,
            address = %address,
            address_type = %self.address_type,
            read_only = signing_keys.is_empty(),
            "derived signatory"
        );
        Ok(Signatory {
            index,
            address,
            spend,
            signing_keys,
        })
    }

    pub fn address(&self, index: u32) -> Result<String, UtxoError> {
        Ok(self.derive(index)?.address.clone())
    }

    pub fn public_key(&self, index: u32) -> Result<String, UtxoError> {
        Ok(self.derive(index)?.public_key())
    }

    /// Private keys this party holds for `index`.
    pub fn private_keys(&self, index: u32) -> Result<Vec<PrivateKey>, UtxoError> {
        let signatory = self.derive(index)?;
        Ok(signatory.signing_keys()?.to_vec())
    }

    /// Exported public key material from which the same addresses derive.
    ///
    /// Single-sig accounts export their account xpub; multisig accounts
    /// export `multi(m,xpub1,...,xpubN)` in signer order.
    pub fn universal_public_key(&self) -> Result<String, UtxoError> {
        let xpub = |source: &KeySource| {
            source.account_xpub(&self.secp).map(|k| k.to_string()).ok_or_else(|| {
                UtxoError::UnsupportedDerivation(
                    "key pair accounts have no universal public key".into(),
                )
            })
        };
        match &self.signers {
            SignerSet::Single(source) => xpub(source),
            SignerSet::Multisig { m, signers } => {
                let keys = signers.iter().map(xpub).collect::<Result<Vec<_>, _>>()?;
                Ok(format!("multi({m},{})", keys.join(",")))
            }
        }
    }

    /// Rebuild a read-only deriver from [`Self::universal_public_key`] output.
    pub fn from_universal_public_key(
        params: &'static CoinParams,
        address_type: AddressType,
        universal: &str,
    ) -> Result<Self, UtxoError> {
        let public_source = |encoded: &str| match parse_extended_key(params, encoded)? {
            ExtendedKey::Public(xpub) => Ok(KeySource::HdPublic(xpub)),
            ExtendedKey::Private(_) => Err(UtxoError::InvalidKey(
                "universal public key must not contain private keys".into(),
            )),
        };

        let universal = universal.trim();
        let signers = match universal
            .strip_prefix("multi(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(body) => {
                let mut parts = body.split(',').map(str::trim);
                let m = parts
                    .next()
                    .and_then(|m| m.parse::<usize>().ok())
                    .ok_or_else(|| UtxoError::InvalidKey("missing multisig threshold".into()))?;
                let signers = parts.map(public_source).collect::<Result<Vec<_>, _>>()?;
                SignerSet::Multisig { m, signers }
            }
            None => SignerSet::Single(public_source(universal)?),
        };
        Self::new(params, address_type, signers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{BITCOIN_MAINNET, BITCOIN_TESTNET, LITECOIN_MAINNET, DOGECOIN_MAINNET};
    use bitcoin::NetworkKind;

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn root(kind: NetworkKind) -> Xpriv {
        let seed = bip39::Mnemonic::parse(MNEMONIC).unwrap().to_seed("");
        Xpriv::new_master(kind, &seed).unwrap()
    }

    fn account(params: &'static CoinParams, address_type: AddressType, account: u32) -> Xpriv {
        let path = default_derivation_path(params, address_type, account).unwrap();
        derive_account_key(params, address_type, &root(params.network_kind()), &path).unwrap()
    }

    fn single(params: &'static CoinParams, address_type: AddressType) -> AddressDeriver {
        let key = account(params, address_type, 0);
        AddressDeriver::new(params, address_type, SignerSet::Single(KeySource::HdPrivate(key)))
            .unwrap()
    }

    fn multisig(address_type: AddressType) -> AddressDeriver {
        let signers = (0..3)
            .map(|i| KeySource::HdPrivate(account(&BITCOIN_MAINNET, address_type, i)))
            .collect();
        AddressDeriver::new(&BITCOIN_MAINNET, address_type, SignerSet::Multisig { m: 2, signers })
            .unwrap()
    }

    #[test]
    fn bip84_first_addresses() {
        let deriver = single(&BITCOIN_MAINNET, AddressType::P2wpkh);
        assert_eq!(deriver.address(0).unwrap(), "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        assert_eq!(deriver.address(1).unwrap(), "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g");
    }

    #[test]
    fn bip44_first_address() {
        let deriver = single(&BITCOIN_MAINNET, AddressType::P2pkh);
        assert_eq!(deriver.address(0).unwrap(), "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
    }

    #[test]
    fn bip49_first_address() {
        let deriver = single(&BITCOIN_MAINNET, AddressType::P2shP2wpkh);
        assert_eq!(deriver.address(0).unwrap(), "37VucYSaXLCAsxYyAPfbSi9eh4iEcbShgf");
    }

    #[test]
    fn default_path_uses_purpose_and_coin_type() {
        let path = default_derivation_path(&LITECOIN_MAINNET, AddressType::P2shP2wpkh, 3).unwrap();
        assert_eq!(path, "m/49'/2'/3'".parse::<DerivationPath>().unwrap());
        let path = default_derivation_path(&BITCOIN_TESTNET, AddressType::P2wshMultisig, 0).unwrap();
        assert_eq!(path, "m/87'/1'/0'".parse::<DerivationPath>().unwrap());
    }

    #[test]
    fn wrong_purpose_is_unsupported_derivation() {
        let path: DerivationPath = "m/44'/0'/0'".parse().unwrap();
        let err = derive_account_key(
            &BITCOIN_MAINNET,
            AddressType::P2wpkh,
            &root(NetworkKind::Main),
            &path,
        )
        .unwrap_err();
        assert!(matches!(err, UtxoError::UnsupportedDerivation(_)));
    }

    #[test]
    fn multisig_accepts_bip48_purpose() {
        let path: DerivationPath = "m/48'/0'/0'/2'".parse().unwrap();
        assert!(derive_account_key(
            &BITCOIN_MAINNET,
            AddressType::P2wshMultisig,
            &root(NetworkKind::Main),
            &path,
        )
        .is_ok());
    }

    #[test]
    fn segwit_unsupported_on_dogecoin() {
        let path: DerivationPath = "m/84'/3'/0'".parse().unwrap();
        let err = derive_account_key(
            &DOGECOIN_MAINNET,
            AddressType::P2wpkh,
            &root(NetworkKind::Main),
            &path,
        )
        .unwrap_err();
        assert!(matches!(err, UtxoError::UnsupportedAddressType(_)));
    }

    #[test]
    fn read_only_deriver_matches_private_one() {
        let private = single(&BITCOIN_MAINNET, AddressType::P2wpkh);
        let universal = private.universal_public_key().unwrap();
        assert!(universal.starts_with("xpub"));

        let public =
            AddressDeriver::from_universal_public_key(&BITCOIN_MAINNET, AddressType::P2wpkh, &universal)
                .unwrap();
        assert!(public.is_read_only());
        for index in [0, 1, 7, 1000] {
            assert_eq!(public.address(index).unwrap(), private.address(index).unwrap());
            assert_eq!(public.public_key(index).unwrap(), private.public_key(index).unwrap());
        }
        let signatory = public.derive(0).unwrap();
        assert!(signatory.private_key(&BITCOIN_MAINNET).is_none());
        assert!(matches!(public.private_keys(0), Err(UtxoError::ReadOnlyKey(_))));
    }

    #[test]
    fn slip132_versions_are_normalised() {
        let xpub = Xpub::from_priv(&Secp256k1::new(), &account(&BITCOIN_MAINNET, AddressType::P2wpkh, 0));
        let mut data = xpub.encode().to_vec();
        data[..4].copy_from_slice(&[0x04, 0xb2, 0x47, 0x46]);
        let zpub = bs58::encode(data).with_check().into_string();
        assert!(zpub.starts_with("zpub"));

        match parse_extended_key(&BITCOIN_MAINNET, &zpub).unwrap() {
            ExtendedKey::Public(parsed) => assert_eq!(parsed, xpub),
            ExtendedKey::Private(_) => panic!("expected a public key"),
        }
    }

    #[test]
    fn foreign_versions_are_rejected() {
        let xpub = Xpub::from_priv(&Secp256k1::new(), &account(&BITCOIN_MAINNET, AddressType::P2wpkh, 0));
        let err = parse_extended_key(&BITCOIN_TESTNET, &xpub.to_string()).unwrap_err();
        assert!(matches!(err, UtxoError::InvalidKey(_)));
        assert!(parse_extended_key(&BITCOIN_MAINNET, "xpubnotakey").is_err());
    }

    #[test]
    fn wif_known_vector() {
        let key = decode_wif(&BITCOIN_MAINNET, "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn")
            .unwrap();
        assert!(key.compressed);
        let mut expected = [0u8; 32];
        expected[31] = 1;
        assert_eq!(key.inner.secret_bytes(), expected);
    }

    #[test]
    fn wif_uses_coin_prefix() {
        let key = account(&LITECOIN_MAINNET, AddressType::P2wpkh, 0).to_priv();
        let wif = encode_wif(&LITECOIN_MAINNET, &key);
        assert!(wif.starts_with('T'), "got {}", wif.as_str());
        let decoded = decode_wif(&LITECOIN_MAINNET, &wif).unwrap();
        assert_eq!(decoded.inner, key.inner);
        assert!(decode_wif(&BITCOIN_MAINNET, &wif).is_err());
    }

    #[test]
    fn key_pair_source_derives_by_index() {
        let hd = single(&BITCOIN_MAINNET, AddressType::P2wpkh);
        let signatory = hd.derive(2).unwrap();
        let wif = signatory.private_key(&BITCOIN_MAINNET).unwrap();

        let keys = vec![
            None,
            Some(DiscreteKey::parse(&BITCOIN_MAINNET, &hd.public_key(1).unwrap()).unwrap()),
            Some(DiscreteKey::parse(&BITCOIN_MAINNET, &wif).unwrap()),
        ];
        let deriver = AddressDeriver::new(
            &BITCOIN_MAINNET,
            AddressType::P2wpkh,
            SignerSet::Single(KeySource::KeyPairs(keys)),
        )
        .unwrap();

        assert_eq!(deriver.address(2).unwrap(), signatory.address);
        assert_eq!(deriver.address(1).unwrap(), hd.address(1).unwrap());
        assert!(matches!(deriver.private_keys(1), Err(UtxoError::ReadOnlyKey(_))));
        assert_eq!(deriver.private_keys(2).unwrap().len(), 1);
        assert!(matches!(deriver.derive(0), Err(UtxoError::InvalidKey(_))));
        assert!(matches!(
            deriver.universal_public_key(),
            Err(UtxoError::UnsupportedDerivation(_))
        ));
    }

    #[test]
    fn multisig_addresses_are_order_independent() {
        let deriver = multisig(AddressType::P2wshMultisig);
        let signatory = deriver.derive(0).unwrap();
        assert!(signatory.address.starts_with("bc1q"));
        assert_eq!(signatory.address.len(), 62);
        assert_eq!(signatory.spend.required_signatures, 2);
        assert_eq!(signatory.spend.public_keys.len(), 3);
        assert!(signatory.spend.witness_script.is_some());

        // Reversing the signer order yields the same BIP67 script.
        let reversed = (0..3)
            .rev()
            .map(|i| KeySource::HdPrivate(account(&BITCOIN_MAINNET, AddressType::P2wshMultisig, i)))
            .collect();
        let other = AddressDeriver::new(
            &BITCOIN_MAINNET,
            AddressType::P2wshMultisig,
            SignerSet::Multisig { m: 2, signers: reversed },
        )
        .unwrap();
        assert_eq!(other.address(0).unwrap(), signatory.address);
    }

    #[test]
    fn multisig_wrappers_attach_expected_scripts() {
        let p2sh = multisig(AddressType::P2shMultisig).derive(0).unwrap();
        assert!(p2sh.address.starts_with('3'));
        assert!(p2sh.spend.redeem_script.is_some());
        assert!(p2sh.spend.witness_script.is_none());

        let nested = multisig(AddressType::P2shP2wshMultisig).derive(0).unwrap();
        assert!(nested.address.starts_with('3'));
        assert!(nested.spend.redeem_script.as_ref().unwrap().is_p2wsh());
        assert!(nested.spend.witness_script.is_some());
    }

    #[test]
    fn multisig_universal_key_round_trips() {
        let deriver = multisig(AddressType::P2shP2wshMultisig);
        let universal = deriver.universal_public_key().unwrap();
        assert!(universal.starts_with("multi(2,xpub"));

        let public = AddressDeriver::from_universal_public_key(
            &BITCOIN_MAINNET,
            AddressType::P2shP2wshMultisig,
            &universal,
        )
        .unwrap();
        assert_eq!(public.multisig_shape(), Some((2, 3)));
        assert_eq!(public.address(5).unwrap(), deriver.address(5).unwrap());
        assert!(matches!(public.private_keys(5), Err(UtxoError::ReadOnlyKey(_))));
    }

    #[test]
    fn multisig_shape_is_validated() {
        let signers = vec![KeySource::HdPrivate(account(&BITCOIN_MAINNET, AddressType::P2wshMultisig, 0))];
        let err = AddressDeriver::new(
            &BITCOIN_MAINNET,
            AddressType::P2wshMultisig,
            SignerSet::Multisig { m: 2, signers },
        )
        .unwrap_err();
        assert!(matches!(err, UtxoError::InvalidRequest(_)));
    }

    #[test]
    fn single_signer_cannot_use_multisig_type() {
        let key = account(&BITCOIN_MAINNET, AddressType::P2wpkh, 0);
        assert!(AddressDeriver::new(
            &BITCOIN_MAINNET,
            AddressType::P2wshMultisig,
            SignerSet::Single(KeySource::HdPrivate(key)),
        )
        .is_err());
    }

    #[test]
    fn litecoin_deprecated_format() {
        let key = account(&LITECOIN_MAINNET, AddressType::P2shP2wpkh, 0);
        let modern = AddressDeriver::new(
            &LITECOIN_MAINNET,
            AddressType::P2shP2wpkh,
            SignerSet::Single(KeySource::HdPrivate(key)),
        )
        .unwrap();
        let address = modern.address(0).unwrap();
        assert!(address.starts_with('M'), "got {address}");

        let deprecated = modern.with_format(AddressFormat::Deprecated).unwrap();
        assert!(deprecated.address(0).unwrap().starts_with('3'));
    }
}
