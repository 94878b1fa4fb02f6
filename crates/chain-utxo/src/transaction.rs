//! Transaction assembly, signing and finalization over PSBT containers.
//!
//! The pipeline is a chain of owned stages: a planned [`PaymentTx`] is
//! assembled into an [`AssembledTx`], signed into a [`SignedTx`] (which may be
//! signed further or combined with other cosigners' copies) and finalized into
//! a broadcastable [`FinalizedTx`]. Each stage consumes the previous one.

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize_hex};
use bitcoin::hashes::Hash;
use bitcoin::opcodes::OP_0;
use bitcoin::psbt::{Input as PsbtInput, Psbt};
use bitcoin::script::{Builder, Instruction, PushBytesBuf, Script, ScriptBuf};
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    ecdsa, Amount, OutPoint, PrivateKey, PublicKey, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use tracing::{debug, info};

use crate::address::{decode_address, AddressType};
use crate::derivation::{p2sh_of, p2wsh_of, SpendInfo};
use crate::error::UtxoError;
use crate::network::CoinParams;
use crate::planner::PaymentTx;

/// Upper bound of a DER signature plus its sighash byte.
const SIGNATURE_LEN: usize = 73;
const COMPRESSED_KEY_LEN: usize = 33;
/// Outpoint (36) plus sequence (4).
const INPUT_BASE_LEN: usize = 40;
const P2SH_P2WPKH_SCRIPT_SIG_LEN: usize = 23;
const P2SH_P2WSH_SCRIPT_SIG_LEN: usize = 35;

fn varint_len(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Length of a script push of `n` bytes, opcode included.
fn push_len(n: usize) -> usize {
    let prefix = match n {
        0..=75 => 1,
        76..=0xff => 2,
        0x100..=0xffff => 3,
        _ => 5,
    };
    prefix + n
}

fn multisig_script_len(n: usize) -> usize {
    3 + n * (1 + COMPRESSED_KEY_LEN)
}

/// Weight units one input of `address_type` adds once signed.
pub fn input_weight(address_type: AddressType, multisig: Option<(usize, usize)>) -> usize {
    let signature = 1 + SIGNATURE_LEN;
    let key = 1 + COMPRESSED_KEY_LEN;
    let (m, n) = multisig.unwrap_or((1, 1));
    let script = multisig_script_len(n);
    let multisig_witness =
        varint_len(m + 2) + 1 + m * signature + varint_len(script) + script;

    match address_type {
        AddressType::P2pkh => {
            let script_sig = signature + key;
            4 * (INPUT_BASE_LEN + varint_len(script_sig) + script_sig)
        }
        AddressType::P2wpkh => 4 * (INPUT_BASE_LEN + 1) + 1 + signature + key,
        AddressType::P2shP2wpkh => {
            4 * (INPUT_BASE_LEN + 1 + P2SH_P2WPKH_SCRIPT_SIG_LEN) + 1 + signature + key
        }
        AddressType::P2shMultisig => {
            let script_sig = 1 + m * signature + push_len(script);
            4 * (INPUT_BASE_LEN + varint_len(script_sig) + script_sig)
        }
        AddressType::P2wshMultisig => 4 * (INPUT_BASE_LEN + 1) + multisig_witness,
        AddressType::P2shP2wshMultisig => {
            4 * (INPUT_BASE_LEN + 1 + P2SH_P2WSH_SCRIPT_SIG_LEN) + multisig_witness
        }
    }
}

/// Estimated virtual size of a signed transaction spending `input_count`
/// inputs of one address type into outputs with the given script lengths.
pub fn estimate_tx_vsize(
    address_type: AddressType,
    multisig: Option<(usize, usize)>,
    input_count: usize,
    output_script_lens: &[usize],
) -> u64 {
    let outputs: usize = output_script_lens
        .iter()
        .map(|len| 8 + varint_len(*len) + len)
        .sum();
    let base = 4 + 4 + varint_len(input_count) + varint_len(output_script_lens.len()) + outputs;
    let mut weight = 4 * base + input_count * input_weight(address_type, multisig);
    if address_type.is_segwit() && input_count > 0 {
        // marker and flag
        weight += 2;
    }
    weight.div_ceil(4) as u64
}

/// How one PSBT input is spent, recovered from the container itself.
struct InputSpend {
    address_type: AddressType,
    prevout: TxOut,
    redeem_script: Option<ScriptBuf>,
    witness_script: Option<ScriptBuf>,
    /// Script-order keys for multisig inputs; empty for single-key inputs.
    multisig_keys: Vec<PublicKey>,
    required: usize,
}

fn parse_multisig(script: &Script) -> Result<(usize, Vec<PublicKey>), UtxoError> {
    let bad = || UtxoError::InvalidPsbt(format!("not a multisig script: {}", script.to_hex_string()));
    let instructions = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| bad())?;
    let (first, rest) = instructions.split_first().ok_or_else(bad)?;
    let (last, rest) = rest.split_last().ok_or_else(bad)?;
    let (count, keys) = rest.split_last().ok_or_else(bad)?;

    let small_int = |instruction: &Instruction| match instruction {
        Instruction::Op(op) if (0x51..=0x60).contains(&op.to_u8()) => Some((op.to_u8() - 0x50) as usize),
        _ => None,
    };
    let m = small_int(first).ok_or_else(bad)?;
    let n = small_int(count).ok_or_else(bad)?;
    if !matches!(last, Instruction::Op(op) if op.to_u8() == 0xae) {
        return Err(bad());
    }
    let keys = keys
        .iter()
        .map(|instruction| match instruction {
            Instruction::PushBytes(bytes) => PublicKey::from_slice(bytes.as_bytes()).map_err(|_| bad()),
            Instruction::Op(_) => Err(bad()),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if keys.len() != n || m == 0 || m > n {
        return Err(bad());
    }
    Ok((m, keys))
}

impl InputSpend {
    fn from_psbt(psbt: &Psbt, index: usize) -> Result<Self, UtxoError> {
        let input = &psbt.inputs[index];
        let outpoint = psbt.unsigned_tx.input[index].previous_output;
        let prevout = match (&input.witness_utxo, &input.non_witness_utxo) {
            (Some(utxo), _) => utxo.clone(),
            (None, Some(tx)) => tx
                .output
                .get(outpoint.vout as usize)
                .cloned()
                .ok_or_else(|| UtxoError::MissingInputData(format!("{outpoint} not in funding tx")))?,
            (None, None) => {
                return Err(UtxoError::MissingInputData(format!(
                    "input {index} ({outpoint}) has no utxo data"
                )))
            }
        };

        let spk = &prevout.script_pubkey;
        let missing = |what: &str| UtxoError::MissingInputData(format!("input {index} has no {what}"));
        let address_type = if spk.is_p2pkh() {
            AddressType::P2pkh
        } else if spk.is_p2wpkh() {
            AddressType::P2wpkh
        } else if spk.is_p2wsh() {
            AddressType::P2wshMultisig
        } else if spk.is_p2sh() {
            let redeem = input.redeem_script.as_ref().ok_or_else(|| missing("redeem script"))?;
            if &p2sh_of(redeem) != spk {
                return Err(UtxoError::InvalidPsbt(format!(
                    "redeem script of input {index} does not match its output"
                )));
            }
            if redeem.is_p2wpkh() {
                AddressType::P2shP2wpkh
            } else if redeem.is_p2wsh() {
                AddressType::P2shP2wshMultisig
            } else {
                AddressType::P2shMultisig
            }
        } else {
            return Err(UtxoError::TransactionBuild(format!(
                "input {index} spends an unsupported script {}",
                spk.to_hex_string()
            )));
        };

        let (required, multisig_keys) = match address_type {
            AddressType::P2shMultisig => {
                parse_multisig(input.redeem_script.as_ref().ok_or_else(|| missing("redeem script"))?)?
            }
            AddressType::P2wshMultisig | AddressType::P2shP2wshMultisig => {
                let witness = input.witness_script.as_ref().ok_or_else(|| missing("witness script"))?;
                let program = match address_type {
                    AddressType::P2wshMultisig => spk,
                    _ => input.redeem_script.as_ref().ok_or_else(|| missing("redeem script"))?,
                };
                if &p2wsh_of(witness) != program {
                    return Err(UtxoError::InvalidPsbt(format!(
                        "witness script of input {index} does not match its output"
                    )));
                }
                parse_multisig(witness)?
            }
            _ => (1, Vec::new()),
        };

        Ok(Self {
            address_type,
            prevout,
            redeem_script: input.redeem_script.clone(),
            witness_script: input.witness_script.clone(),
            multisig_keys,
            required,
        })
    }

    fn controls(&self, key: &PublicKey) -> bool {
        let wpkh = || key.wpubkey_hash().ok().map(|h| ScriptBuf::new_p2wpkh(&h));
        match self.address_type {
            AddressType::P2pkh => ScriptBuf::new_p2pkh(&key.pubkey_hash()) == self.prevout.script_pubkey,
            AddressType::P2wpkh => wpkh().as_ref() == Some(&self.prevout.script_pubkey),
            AddressType::P2shP2wpkh => wpkh() == self.redeem_script,
            _ => self.multisig_keys.contains(key),
        }
    }

    fn sighash(
        &self,
        cache: &mut SighashCache<&Transaction>,
        index: usize,
        sighash_type: EcdsaSighashType,
    ) -> Result<Message, UtxoError> {
        let signing = |e: String| UtxoError::Signing(format!("sighash of input {index}: {e}"));
        let value = self.prevout.value;
        let digest = match self.address_type {
            AddressType::P2pkh | AddressType::P2shMultisig => {
                let script_code = match self.address_type {
                    AddressType::P2pkh => &self.prevout.script_pubkey,
                    _ => self.redeem_script.as_ref().ok_or_else(|| signing("no redeem script".into()))?,
                };
                cache
                    .legacy_signature_hash(index, script_code, sighash_type.to_u32())
                    .map_err(|e| signing(e.to_string()))?
                    .to_byte_array()
            }
            AddressType::P2wpkh | AddressType::P2shP2wpkh => {
                let program = match self.address_type {
                    AddressType::P2wpkh => &self.prevout.script_pubkey,
                    _ => self.redeem_script.as_ref().ok_or_else(|| signing("no redeem script".into()))?,
                };
                cache
                    .p2wpkh_signature_hash(index, program, value, sighash_type)
                    .map_err(|e| signing(e.to_string()))?
                    .to_byte_array()
            }
            AddressType::P2wshMultisig | AddressType::P2shP2wshMultisig => {
                let witness = self
                    .witness_script
                    .as_ref()
                    .ok_or_else(|| signing("no witness script".into()))?;
                cache
                    .p2wsh_signature_hash(index, witness, value, sighash_type)
                    .map_err(|e| signing(e.to_string()))?
                    .to_byte_array()
            }
        };
        Ok(Message::from_digest(digest))
    }
}

fn parse_txid(txid: &str) -> Result<Txid, UtxoError> {
    Txid::from_str(txid).map_err(|e| UtxoError::TransactionBuild(format!("invalid txid {txid}: {e}")))
}

fn push_bytes(bytes: Vec<u8>) -> Result<PushBytesBuf, UtxoError> {
    PushBytesBuf::try_from(bytes).map_err(|e| UtxoError::TransactionBuild(e.to_string()))
}

fn decode_psbt(hex_str: &str) -> Result<Psbt, UtxoError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|e| UtxoError::InvalidPsbt(e.to_string()))?;
    Psbt::deserialize(&bytes).map_err(|e| UtxoError::InvalidPsbt(e.to_string()))
}

/// Build the unsigned PSBT for a planned payment.
///
/// Every input is spent from the address described by `spend`. Legacy inputs
/// carry the full funding transaction, taken from `UnspentOutput::tx_hex`.
pub fn assemble(
    params: &CoinParams,
    payment: &PaymentTx,
    spend: &SpendInfo,
) -> Result<AssembledTx, UtxoError> {
    let sequence = if params.enable_rbf {
        Sequence::ENABLE_RBF_NO_LOCKTIME
    } else {
        Sequence::MAX
    };

    let input = payment
        .inputs
        .iter()
        .map(|utxo| {
            Ok(TxIn {
                previous_output: OutPoint::new(parse_txid(&utxo.txid)?, utxo.vout),
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::default(),
            })
        })
        .collect::<Result<Vec<_>, UtxoError>>()?;

    let output = payment
        .outputs
        .iter()
        .map(|out| {
            Ok(TxOut {
                value: Amount::from_sat(out.value),
                script_pubkey: decode_address(params, &out.address, None)?,
            })
        })
        .collect::<Result<Vec<_>, UtxoError>>()?;

    let tx = Transaction {
        version: Version(params.tx_version),
        lock_time: LockTime::ZERO,
        input,
        output,
    };
    let unsigned_txid = tx.compute_txid();
    let mut psbt =
        Psbt::from_unsigned_tx(tx).map_err(|e| UtxoError::TransactionBuild(e.to_string()))?;

    for (psbt_input, utxo) in psbt.inputs.iter_mut().zip(&payment.inputs) {
        if spend.address_type.is_segwit() {
            psbt_input.witness_utxo = Some(TxOut {
                value: Amount::from_sat(utxo.value),
                script_pubkey: spend.script_pubkey.clone(),
            });
        } else {
            let raw = utxo
                .tx_hex
                .as_deref()
                .ok_or_else(|| UtxoError::MissingInputData(format!("no raw transaction for {}", utxo.txid)))?;
            let bytes = hex::decode(raw)
                .map_err(|e| UtxoError::MissingInputData(format!("raw transaction {}: {e}", utxo.txid)))?;
            let funding: Transaction = deserialize(&bytes)
                .map_err(|e| UtxoError::MissingInputData(format!("raw transaction {}: {e}", utxo.txid)))?;
            if funding.compute_txid().to_string() != utxo.txid {
                return Err(UtxoError::MissingInputData(format!(
                    "raw transaction does not hash to {}",
                    utxo.txid
                )));
            }
            let funded = funding.output.get(utxo.vout as usize).ok_or_else(|| {
                UtxoError::MissingInputData(format!("{} has no output {}", utxo.txid, utxo.vout))
            })?;
            if funded.value.to_sat() != utxo.value || funded.script_pubkey != spend.script_pubkey {
                return Err(UtxoError::MissingInputData(format!(
                    "{} does not match the raw transaction",
                    utxo.outpoint()
                )));
            }
            psbt_input.non_witness_utxo = Some(funding);
        }
        psbt_input.redeem_script = spend.redeem_script.clone();
        psbt_input.witness_script = spend.witness_script.clone();
    }

    debug!(
        txid = %unsigned_txid,
        inputs = psbt.inputs.len(),
        outputs = psbt.outputs.len(),
        "assembled transaction"
    );
    Ok(AssembledTx { psbt, unsigned_txid })
}

fn sign_psbt(psbt: &mut Psbt, keys: &[PrivateKey], secp: &Secp256k1<All>) -> Result<usize, UtxoError> {
    let tx = psbt.unsigned_tx.clone();
    let mut cache = SighashCache::new(&tx);
    let mut signed = 0;

    for key in keys {
        let public = PublicKey::from_private_key(secp, key);
        let mut used = false;
        for index in 0..psbt.inputs.len() {
            let spend = InputSpend::from_psbt(psbt, index)?;
            if !spend.controls(&public) {
                continue;
            }
            let message = spend.sighash(&mut cache, index, EcdsaSighashType::All)?;
            let signature = ecdsa::Signature {
                signature: secp.sign_ecdsa(&message, &key.inner),
                sighash_type: EcdsaSighashType::All,
            };
            psbt.inputs[index].partial_sigs.insert(public, signature);
            used = true;
            signed += 1;
        }
        if !used {
            return Err(UtxoError::Signing(format!(
                "key {public} does not control any input"
            )));
        }
    }
    Ok(signed)
}

/// Unsigned PSBT built from a [`PaymentTx`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledTx {
    psbt: Psbt,
    unsigned_txid: Txid,
}

impl AssembledTx {
    pub fn unsigned_txid(&self) -> Txid {
        self.unsigned_txid
    }

    pub fn psbt(&self) -> &Psbt {
        &self.psbt
    }

    pub fn to_hex(&self) -> String {
        self.psbt.serialize_hex()
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, UtxoError> {
        let psbt = decode_psbt(hex_str)?;
        let unsigned_txid = psbt.unsigned_tx.compute_txid();
        Ok(Self { psbt, unsigned_txid })
    }

    /// Add a signature from each key to every input it controls.
    pub fn sign(self, keys: &[PrivateKey]) -> Result<SignedTx, UtxoError> {
        SignedTx {
            psbt: self.psbt,
            unsigned_txid: self.unsigned_txid,
        }
        .sign(keys)
    }
}

/// PSBT carrying one or more partial signatures.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTx {
    psbt: Psbt,
    unsigned_txid: Txid,
}

impl SignedTx {
    pub fn unsigned_txid(&self) -> Txid {
        self.unsigned_txid
    }

    pub fn psbt(&self) -> &Psbt {
        &self.psbt
    }

    pub fn to_hex(&self) -> String {
        self.psbt.serialize_hex()
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, UtxoError> {
        let psbt = decode_psbt(hex_str)?;
        let unsigned_txid = psbt.unsigned_tx.compute_txid();
        Ok(Self { psbt, unsigned_txid })
    }

    /// Sign with more keys. Re-signing with a key already present is a no-op.
    pub fn sign(mut self, keys: &[PrivateKey]) -> Result<Self, UtxoError> {
        if keys.is_empty() {
            return Err(UtxoError::ReadOnlyKey("no private keys to sign with".into()));
        }
        let secp = Secp256k1::new();
        let signed = sign_psbt(&mut self.psbt, keys, &secp)?;
        debug!(txid = %self.unsigned_txid, signatures = signed, "signed inputs");
        Ok(self)
    }

    /// Merge the signatures of another copy of the same transaction.
    pub fn combine(mut self, other: SignedTx) -> Result<Self, UtxoError> {
        if other.unsigned_txid != self.unsigned_txid {
            return Err(UtxoError::InvalidPsbt(format!(
                "cannot combine {} with {}",
                self.unsigned_txid, other.unsigned_txid
            )));
        }
        self.psbt
            .combine(other.psbt)
            .map_err(|e| UtxoError::InvalidPsbt(e.to_string()))?;
        Ok(self)
    }

    /// Signatures per input from keys that can spend it.
    pub fn signature_counts(&self) -> Result<Vec<(usize, usize)>, UtxoError> {
        (0..self.psbt.inputs.len())
            .map(|index| {
                let spend = InputSpend::from_psbt(&self.psbt, index)?;
                let present = self.psbt.inputs[index]
                    .partial_sigs
                    .keys()
                    .filter(|key| spend.controls(key))
                    .count();
                Ok((present, spend.required))
            })
            .collect()
    }

    /// Whether every input has enough signatures to finalize.
    pub fn is_complete(&self) -> Result<bool, UtxoError> {
        Ok(self
            .signature_counts()?
            .iter()
            .all(|(present, required)| present >= required))
    }

    /// Verify all signatures, build final scripts and extract the transaction.
    pub fn finalize(mut self) -> Result<FinalizedTx, UtxoError> {
        let secp = Secp256k1::verification_only();
        let tx = self.psbt.unsigned_tx.clone();
        let mut cache = SighashCache::new(&tx);

        for index in 0..self.psbt.inputs.len() {
            let spend = InputSpend::from_psbt(&self.psbt, index)?;
            let input = &self.psbt.inputs[index];
            let invalid = |reason: String| UtxoError::SignatureValidation(format!("input {index}: {reason}"));

            for (key, signature) in &input.partial_sigs {
                if !spend.controls(key) {
                    return Err(invalid(format!("signature from unrelated key {key}")));
                }
                if signature.sighash_type != EcdsaSighashType::All {
                    return Err(invalid(format!("unexpected sighash type {}", signature.sighash_type)));
                }
                let message = spend.sighash(&mut cache, index, signature.sighash_type)?;
                secp.verify_ecdsa(&message, &signature.signature, &key.inner)
                    .map_err(|_| invalid(format!("bad signature from {key}")))?;
            }

            let finalized = finalize_input(&spend, input).map_err(invalid)?;
            let input = &mut self.psbt.inputs[index];
            input.final_script_sig = finalized.0;
            input.final_script_witness = finalized.1;
            input.partial_sigs.clear();
            input.sighash_type = None;
            input.redeem_script = None;
            input.witness_script = None;
            input.bip32_derivation.clear();
        }

        let tx = self.psbt.extract_tx_unchecked_fee_rate();
        let txid = tx.compute_txid();
        info!(txid = %txid, vsize = tx.vsize(), "finalized transaction");
        Ok(FinalizedTx {
            txid: txid.to_string(),
            hex: serialize_hex(&tx),
            tx,
        })
    }
}

type FinalScripts = (Option<ScriptBuf>, Option<Witness>);

fn finalize_input(spend: &InputSpend, input: &PsbtInput) -> Result<FinalScripts, String> {
    let single = || {
        input
            .partial_sigs
            .iter()
            .next()
            .map(|(key, sig)| (*key, *sig))
            .ok_or_else(|| "missing signature".to_string())
    };
    let multisig = || {
        let signatures: Vec<Vec<u8>> = spend
            .multisig_keys
            .iter()
            .filter_map(|key| input.partial_sigs.get(key))
            .take(spend.required)
            .map(|sig| sig.to_vec())
            .collect();
        if signatures.len() < spend.required {
            Err(format!("{} of {} signatures", signatures.len(), spend.required))
        } else {
            Ok(signatures)
        }
    };
    let redeem_push = || {
        spend
            .redeem_script
            .as_ref()
            .ok_or_else(|| "missing redeem script".to_string())
            .and_then(|s| push_bytes(s.to_bytes()).map_err(|e| e.to_string()))
    };
    let wrap = |push: PushBytesBuf| Builder::new().push_slice(push).into_script();

    Ok(match spend.address_type {
        AddressType::P2pkh => {
            let (key, sig) = single()?;
            let script_sig = Builder::new()
                .push_slice(push_bytes(sig.to_vec()).map_err(|e| e.to_string())?)
                .push_key(&key)
                .into_script();
            (Some(script_sig), None)
        }
        AddressType::P2wpkh => {
            let (key, sig) = single()?;
            (None, Some(Witness::from_slice(&[sig.to_vec(), key.to_bytes()])))
        }
        AddressType::P2shP2wpkh => {
            let (key, sig) = single()?;
            (
                Some(wrap(redeem_push()?)),
                Some(Witness::from_slice(&[sig.to_vec(), key.to_bytes()])),
            )
        }
        AddressType::P2shMultisig => {
            let mut builder = Builder::new().push_opcode(OP_0);
            for sig in multisig()? {
                builder = builder.push_slice(push_bytes(sig).map_err(|e| e.to_string())?);
            }
            (Some(builder.push_slice(redeem_push()?).into_script()), None)
        }
        AddressType::P2wshMultisig | AddressType::P2shP2wshMultisig => {
            let witness_script = spend
                .witness_script
                .as_ref()
                .ok_or_else(|| "missing witness script".to_string())?;
            let mut items = vec![Vec::new()];
            items.extend(multisig()?);
            items.push(witness_script.to_bytes());
            let script_sig = match spend.address_type {
                AddressType::P2shP2wshMultisig => Some(wrap(redeem_push()?)),
                _ => None,
            };
            (script_sig, Some(Witness::from_slice(&items)))
        }
    })
}

/// A fully signed transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedTx {
    pub txid: String,
    pub hex: String,
    pub tx: Transaction,
}
