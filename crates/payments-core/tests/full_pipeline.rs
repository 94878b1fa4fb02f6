//! End-to-end payment flows through the public facade against an in-memory
//! blockchain provider: derive, fund, create, sign, combine, broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::bip32::Xpub;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use payments_core::chain_utxo::address::decode_address;
use payments_core::chain_utxo::derivation::{default_derivation_path, derive_account_key};
use payments_core::chain_utxo::{AddressType, Coin, CoinParams, FeeRateType, NetworkType, UnspentOutput, UtxoError};
use payments_core::mnemonic::root_key_from_mnemonic;
use payments_core::*;

const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// In-memory chain keyed by address.
#[derive(Default)]
struct MockChain {
    utxos: Mutex<HashMap<String, Vec<UnspentOutput>>>,
    raw: Mutex<HashMap<String, String>>,
    broadcasts: Mutex<Vec<String>>,
    fee_rate: u64,
    /// Transient failures to return before answering UTXO queries.
    utxo_failures: AtomicUsize,
}

impl MockChain {
    fn with_fee(fee_rate: u64) -> Self {
        Self {
            fee_rate,
            ..Default::default()
        }
    }

    /// Record a confirmed funding transaction paying `value` to `address`.
    fn fund(&self, params: &CoinParams, address: &str, value: u64) -> UnspentOutput {
        let funding = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey: decode_address(params, address, None).unwrap(),
            }],
        };
        let txid = funding.compute_txid().to_string();
        self.raw
            .lock()
            .unwrap()
            .insert(txid.clone(), bitcoin::consensus::encode::serialize_hex(&funding));
        let utxo = UnspentOutput {
            confirmations: Some(6),
            height: Some(800_000),
            ..UnspentOutput::new(txid, 0, value)
        };
        self.utxos
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push(utxo.clone());
        utxo
    }
}

#[async_trait]
impl BlockchainProvider for MockChain {
    async fn get_unspent_outputs(&self, address: &str) -> Result<Vec<UnspentOutput>, ProviderError> {
        let pending_failures = self.utxo_failures.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.utxo_failures.store(pending_failures - 1, Ordering::SeqCst);
            return Err(ProviderError::Transient("503 service unavailable".into()));
        }
        Ok(self.utxos.lock().unwrap().get(address).cloned().unwrap_or_default())
    }

    async fn get_transaction(&self, txid: &str) -> Result<RawTransaction, ProviderError> {
        self.raw
            .lock()
            .unwrap()
            .get(txid)
            .map(|hex| RawTransaction {
                txid: txid.to_string(),
                hex: hex.clone(),
            })
            .ok_or_else(|| ProviderError::NotFound(txid.to_string()))
    }

    async fn estimate_fee(&self, _level: FeeLevel) -> Result<u64, ProviderError> {
        Ok(self.fee_rate)
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<BroadcastResponse, ProviderError> {
        let tx = parse_tx(raw_tx_hex).map_err(ProviderError::Rejected)?;
        let mut broadcasts = self.broadcasts.lock().unwrap();
        let rebroadcast = broadcasts.iter().any(|b| b == raw_tx_hex);
        broadcasts.push(raw_tx_hex.to_string());
        Ok(BroadcastResponse {
            id: tx.compute_txid().to_string(),
            rebroadcast,
        })
    }

    async fn get_transaction_info(&self, txid: &str) -> Result<ChainTransaction, ProviderError> {
        let known = self.broadcasts.lock().unwrap().iter().any(|hex| {
            parse_tx(hex)
                .map(|tx| tx.compute_txid().to_string() == txid)
                .unwrap_or(false)
        });
        if !known {
            return Err(ProviderError::NotFound(txid.to_string()));
        }
        Ok(ChainTransaction {
            txid: txid.to_string(),
            confirmations: 0,
            block_height: None,
            block_time: None,
            fee: None,
            failed: false,
        })
    }
}

fn mnemonic_config(network: NetworkType) -> PaymentsConfig {
    PaymentsConfig::new(
        network,
        KeyConfig::Mnemonic {
            mnemonic: TEST_MNEMONIC.into(),
            passphrase: String::new(),
        },
    )
}

fn parse_tx(raw: &str) -> Result<Transaction, String> {
    let bytes = hex::decode(raw).map_err(|e| e.to_string())?;
    bitcoin::consensus::encode::deserialize(&bytes).map_err(|e| e.to_string())
}

fn decode(raw: &str) -> Transaction {
    parse_tx(raw).unwrap()
}

// ─── BTC: mnemonic -> fund -> create -> sign -> broadcast ──────────

#[tokio::test]
async fn btc_segwit_full_pipeline() {
    let factory = PaymentsFactory::with_default_assets();
    let payments = factory
        .new_payments("BTC", &mnemonic_config(NetworkType::Mainnet), MockChain::with_fee(5))
        .unwrap();
    let params = payments.params();

    let from = payments.get_payport(0).unwrap().address;
    assert_eq!(from, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
    payments.provider().fund(params, &from, 250_000);

    let balance = payments.get_balance(0).await.unwrap();
    assert_eq!(balance.confirmed_balance, "0.0025");

    let unsigned = payments
        .create_transaction(
            0,
            Destination::Address("bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g".into()),
            "0.001",
            CreateTransactionOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(unsigned.status, TransactionStatus::Unsigned);
    assert_eq!(unsigned.target_fee_rate, "5");
    assert_eq!(unsigned.target_fee_rate_type, FeeRateType::BasePerWeight);
    let plan = &unsigned.data.plan;
    assert_eq!(plan.input_total(), plan.output_total() + plan.fee);
    assert_eq!(plan.change_address.as_deref(), Some(from.as_str()));

    let signed = payments.sign_transaction(&unsigned).unwrap();
    assert!(!signed.is_partial());
    let tx = decode(&signed.data.hex);
    assert_eq!(tx.compute_txid().to_string(), signed.id);
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].witness.len(), 2);
    assert!(tx.input[0].script_sig.is_empty());
    assert_eq!(tx.output[0].value.to_sat(), 100_000);

    let first = payments.broadcast_transaction(&signed).await.unwrap();
    assert_eq!(first.id, signed.id);
    assert!(!first.rebroadcast);
    let again = payments.broadcast_transaction(&signed).await.unwrap();
    assert!(again.rebroadcast);

    let info = payments.get_transaction_info(&signed.id).await.unwrap();
    assert_eq!(info.status, TransactionStatus::Pending);
}

// ─── DOGE: legacy inputs need the funding transaction ──────────────

#[tokio::test]
async fn doge_legacy_pipeline_fetches_funding_transactions() {
    let payments = UtxoPayments::new(
        Coin::Dogecoin,
        &mnemonic_config(NetworkType::Mainnet),
        MockChain::with_fee(1_000),
    )
    .unwrap();
    assert_eq!(payments.address_type(), AddressType::P2pkh);
    let params = payments.params();

    let from = payments.get_payport(0).unwrap().address;
    assert!(from.starts_with('D'));
    payments.provider().fund(params, &from, 100 * 100_000_000);
    let to = payments.get_payport(3).unwrap().address;

    let unsigned = payments
        .create_transaction(0, Destination::Index(3), "10", CreateTransactionOptions::default())
        .await
        .unwrap();
    assert_eq!(unsigned.to_address, to);
    assert!(unsigned.data.plan.inputs[0].tx_hex.is_some());

    let signed = payments.sign_transaction(&unsigned).unwrap();
    let tx = decode(&signed.data.hex);
    assert!(!tx.input[0].script_sig.is_empty());
    assert!(tx.input[0].witness.is_empty());
    assert_eq!(tx.version, Version::ONE);
    payments.broadcast_transaction(&signed).await.unwrap();
}

// ─── Multisig: 2-of-3 P2WSH across independent parties ─────────────

fn party_config(me: usize, passphrases: &[&str]) -> PaymentsConfig {
    let params = CoinParams::get(Coin::Bitcoin, NetworkType::Mainnet);
    let path = default_derivation_path(params, AddressType::P2wshMultisig, 0).unwrap();
    let secp = Secp256k1::new();
    let signers = passphrases
        .iter()
        .enumerate()
        .map(|(i, passphrase)| {
            let root = root_key_from_mnemonic(params, TEST_MNEMONIC, passphrase).unwrap();
            let account = derive_account_key(params, AddressType::P2wshMultisig, &root, &path).unwrap();
            let hd_key = if i == me {
                account.to_string()
            } else {
                Xpub::from_priv(&secp, &account).to_string()
            };
            KeyConfig::Hd { hd_key }
        })
        .collect();
    PaymentsConfig::new(NetworkType::Mainnet, KeyConfig::Multisig { m: 2, signers })
}

#[tokio::test]
async fn multisig_parties_sign_and_combine() {
    let passphrases = ["alice", "bob", "carol"];
    let parties: Vec<_> = (0..3)
        .map(|i| UtxoPayments::new(Coin::Bitcoin, &party_config(i, &passphrases), MockChain::with_fee(2)).unwrap())
        .collect();
    assert_eq!(parties[0].address_type(), AddressType::P2wshMultisig);

    let address = parties[0].get_payport(0).unwrap().address;
    for party in &parties[1..] {
        assert_eq!(party.get_payport(0).unwrap().address, address);
    }
    assert_eq!(
        parties[0].get_public_config().unwrap().universal_public_key.unwrap().matches("xpub").count(),
        3
    );

    let params = parties[0].params();
    let funding = parties[0].provider().fund(params, &address, 500_000);
    let options = CreateTransactionOptions {
        available_utxos: Some(vec![funding]),
        ..Default::default()
    };
    let unsigned = parties[0]
        .create_transaction(0, Destination::Index(1), "0.002", options)
        .await
        .unwrap();

    let alice = parties[0].sign_transaction(&unsigned).unwrap();
    let carol = parties[2].sign_transaction(&unsigned).unwrap();
    assert!(alice.is_partial() && carol.is_partial());
    assert_eq!(alice.id, unsigned.data.unsigned_txid);

    let err = parties[0].broadcast_transaction(&alice).await.unwrap_err();
    assert!(matches!(err, PaymentsError::InvalidRequest(_)));

    let combined = parties[1]
        .combine_partially_signed_transactions(vec![alice, carol])
        .unwrap();
    assert!(!combined.is_partial());
    let tx = decode(&combined.data.hex);
    // empty dummy, two signatures, witness script
    assert_eq!(tx.input[0].witness.len(), 4);
    assert_eq!(tx.compute_txid().to_string(), combined.id);

    parties[1].broadcast_transaction(&combined).await.unwrap();
}

// ─── Provider retries and error surfaces ────────────────────────────

#[tokio::test]
async fn transient_provider_failures_are_retried() {
    let mut config = mnemonic_config(NetworkType::Testnet);
    config.retry = RetryConfig {
        attempts: 3,
        delay_ms: 1,
    };
    let chain = MockChain::with_fee(1);
    chain.utxo_failures.store(2, Ordering::SeqCst);
    let payments = UtxoPayments::new(Coin::Bitcoin, &config, chain).unwrap();
    assert!(payments.get_payport(0).unwrap().address.starts_with("tb1q"));
    assert!(payments.get_utxos(0).await.unwrap().is_empty());

    payments.provider().utxo_failures.store(3, Ordering::SeqCst);
    let err = payments.get_balance(0).await.unwrap_err();
    match err {
        PaymentsError::ProviderUnavailable {
            operation, attempts, ..
        } => {
            assert_eq!(operation, "get_unspent_outputs");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn insufficient_funds_reports_shortfall() {
    let payments = UtxoPayments::new(
        Coin::Bitcoin,
        &mnemonic_config(NetworkType::Mainnet),
        MockChain::with_fee(1),
    )
    .unwrap();
    let from = payments.get_payport(0).unwrap().address;
    payments.provider().fund(payments.params(), &from, 10_000);

    let err = payments
        .create_transaction(0, Destination::Index(1), "0.001", CreateTransactionOptions::default())
        .await
        .unwrap_err();
    match err {
        PaymentsError::Utxo(UtxoError::InsufficientFunds {
            needed,
            available,
            shortfall,
        }) => {
            assert_eq!(available, 10_000);
            assert!(needed > 100_000);
            assert_eq!(shortfall, needed - available);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn factory_rejects_unknown_assets() {
    let factory = PaymentsFactory::with_default_assets();
    let err = factory
        .new_payments("XRP", &mnemonic_config(NetworkType::Mainnet), MockChain::default())
        .unwrap_err();
    assert!(matches!(err, PaymentsError::UnsupportedAsset(_)));
}
