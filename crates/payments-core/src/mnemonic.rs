use bip39::{Language, Mnemonic};
use bitcoin::bip32::Xpriv;
use chain_utxo::CoinParams;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::error::PaymentsError;

/// Generate a new BIP-39 mnemonic of 12, 15, 18, 21 or 24 words.
pub fn generate_mnemonic(word_count: usize) -> Result<Zeroizing<String>, PaymentsError> {
    if !(12..=24).contains(&word_count) || word_count % 3 != 0 {
        return Err(PaymentsError::InvalidMnemonic(format!(
            "unsupported word count {word_count}"
        )));
    }
    // 32 bits of entropy per 3 words
    let mut entropy = [0u8; 32];
    let len = word_count / 3 * 4;
    rand::rngs::OsRng.fill_bytes(&mut entropy[..len]);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy[..len])
        .map_err(|e| PaymentsError::InvalidMnemonic(e.to_string()));
    entropy.zeroize();
    Ok(Zeroizing::new(mnemonic?.to_string()))
}

pub fn validate_mnemonic(phrase: &str) -> bool {
    Mnemonic::parse_in_normalized(Language::English, phrase).is_ok()
}

/// 64-byte BIP-39 seed for `phrase` and `passphrase`.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Zeroizing<[u8; 64]>, PaymentsError> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase.trim())
        .map_err(|e| PaymentsError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_seed(passphrase)))
}

/// BIP32 master key for `phrase` on the coin's network.
pub fn root_key_from_mnemonic(
    params: &CoinParams,
    phrase: &str,
    passphrase: &str,
) -> Result<Xpriv, PaymentsError> {
    let seed = mnemonic_to_seed(phrase, passphrase)?;
    Xpriv::new_master(params.network_kind(), &seed[..])
        .map_err(|e| PaymentsError::InvalidMnemonic(e.to_string()))
}
