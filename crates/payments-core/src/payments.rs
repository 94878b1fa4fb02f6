//! The payments facade over one bitcoin-like account.

use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::PublicKey;
use chain_utxo::address::{is_valid_address, standardize_address};
use chain_utxo::derivation::{
    default_derivation_path, derive_account_key, parse_extended_key, AddressDeriver, DiscreteKey,
    ExtendedKey, KeySource, SignerSet,
};
use chain_utxo::units::{to_base_denomination, to_main_denomination};
use chain_utxo::utxo::{spendable_outputs, total_value};
use chain_utxo::{
    assemble, build_payment_tx, AddressType, AssembledTx, Coin, CoinParams, FeeRate, NetworkType,
    PaymentRequest, PaymentTx, PlannerContext, SignedTx, TxOutput, UnspentOutput, UtxoError,
};
use tracing::{debug, info, warn};

use crate::config::{KeyConfig, PaymentsConfig};
use crate::error::PaymentsError;
use crate::fees;
use crate::mnemonic::root_key_from_mnemonic;
use crate::provider::{BlockchainProvider, RetryingProvider};
use crate::types::{
    BalanceResult, BroadcastResult, CreateTransactionOptions, Destination, FeeOption, Payport,
    PayportOutput, PublicConfig, ResolvedFeeOption, SignedTransaction, TransactionData,
    TransactionInfo, TransactionStatus, UnsignedTransaction,
};

/// `to_address` recorded for transactions with several recipients.
pub const MULTI_OUTPUT_TO_ADDRESS: &str = "batch";

/// Payments for one account of one coin, backed by a blockchain provider.
pub struct UtxoPayments<P> {
    params: &'static CoinParams,
    deriver: AddressDeriver,
    derivation_path: Option<DerivationPath>,
    planner: PlannerContext,
    provider: RetryingProvider<P>,
}

impl<P> std::fmt::Debug for UtxoPayments<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtxoPayments")
            .field("coin", &self.params.symbol)
            .field("network", &self.params.network)
            .field("address_type", &self.deriver.address_type())
            .finish_non_exhaustive()
    }
}

/// Account path for keys given at root depth.
fn account_path(
    params: &CoinParams,
    address_type: AddressType,
    configured: &Option<DerivationPath>,
) -> Result<DerivationPath, UtxoError> {
    match configured {
        Some(path) => Ok(path.clone()),
        None => default_derivation_path(params, address_type, 0),
    }
}

fn account_from_root(
    params: &CoinParams,
    address_type: AddressType,
    root: &Xpriv,
    configured: &Option<DerivationPath>,
) -> Result<Xpriv, UtxoError> {
    let path = account_path(params, address_type, configured)?;
    derive_account_key(params, address_type, root, &path)
}

fn path_string(path: &DerivationPath) -> String {
    std::iter::once("m".to_string())
        .chain(path.as_ref().iter().map(ToString::to_string))
        .collect::<Vec<_>>()
        .join("/")
}

fn key_source(
    params: &CoinParams,
    address_type: AddressType,
    key_config: &KeyConfig,
    path: &Option<DerivationPath>,
) -> Result<KeySource, PaymentsError> {
    match key_config {
        KeyConfig::Hd { hd_key } => match parse_extended_key(params, hd_key)? {
            ExtendedKey::Private(xpriv) if xpriv.depth == 0 => Ok(KeySource::HdPrivate(
                account_from_root(params, address_type, &xpriv, path)?,
            )),
            ExtendedKey::Private(xpriv) => Ok(KeySource::HdPrivate(xpriv)),
            ExtendedKey::Public(xpub) if xpub.depth == 0 => Err(UtxoError::UnsupportedDerivation(
                "root extended public keys cannot derive hardened account paths".into(),
            )
            .into()),
            ExtendedKey::Public(xpub) => Ok(KeySource::HdPublic(xpub)),
        },
        KeyConfig::Mnemonic {
            mnemonic,
            passphrase,
        } => {
            let root = root_key_from_mnemonic(params, mnemonic, passphrase)?;
            Ok(KeySource::HdPrivate(account_from_root(
                params,
                address_type,
                &root,
                path,
            )?))
        }
        KeyConfig::KeyPairs { key_pairs } => {
            let keys = key_pairs
                .iter()
                .map(|k| k.as_deref().map(|k| DiscreteKey::parse(params, k)).transpose())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(KeySource::KeyPairs(keys))
        }
        KeyConfig::Multisig { .. } => Err(PaymentsError::config(
            "key_config",
            "multisig signers cannot be nested",
        )),
    }
}

impl<P: BlockchainProvider> UtxoPayments<P> {
    pub fn new(coin: Coin, config: &PaymentsConfig, provider: P) -> Result<Self, PaymentsError> {
        let params = CoinParams::get(coin, config.network);
        config.validate(params)?;

        let address_type = config.resolved_address_type(params);
        let derivation_path = config.parsed_derivation_path()?;
        let signers = match &config.key_config {
            KeyConfig::Multisig { m, signers } => SignerSet::Multisig {
                m: *m,
                signers: signers
                    .iter()
                    .map(|s| key_source(params, address_type, s, &derivation_path))
                    .collect::<Result<Vec<_>, _>>()?,
            },
            single => SignerSet::Single(key_source(params, address_type, single, &derivation_path)?),
        };
        let deriver = AddressDeriver::new(params, address_type, signers)?
            .with_format(config.resolved_format(params))?;

        let planner = PlannerContext {
            multisig: deriver.multisig_shape(),
            target_utxo_pool_size: config.target_utxo_pool_size,
            min_change: config.min_change_base(params)?,
            max_fee_percent: config.max_fee_percent,
            dust_threshold: config.dust_threshold,
            ..PlannerContext::new(params, address_type)
        };

        let uses_hd_path = !matches!(config.key_config, KeyConfig::KeyPairs { .. });
        let derivation_path = if uses_hd_path {
            Some(account_path(params, address_type, &derivation_path)?)
        } else {
            None
        };

        debug!(
            coin = %params,
            address_type = %address_type,
            read_only = deriver.is_read_only(),
            "created payments instance"
        );
        Ok(Self {
            params,
            deriver,
            derivation_path,
            planner,
            provider: RetryingProvider::with_policy(provider, config.retry.attempts, config.retry.delay()),
        })
    }

    pub fn params(&self) -> &'static CoinParams {
        self.params
    }

    pub fn network(&self) -> NetworkType {
        self.params.network
    }

    pub fn address_type(&self) -> AddressType {
        self.deriver.address_type()
    }

    pub fn is_read_only(&self) -> bool {
        self.deriver.is_read_only()
    }

    pub fn provider(&self) -> &P {
        self.provider.inner()
    }

    pub fn get_payport(&self, index: u32) -> Result<Payport, PaymentsError> {
        Ok(Payport::new(self.deriver.address(index)?))
    }

    /// Hex public key(s) for `index`.
    pub fn get_public_key(&self, index: u32) -> Result<String, PaymentsError> {
        Ok(self.deriver.public_key(index)?)
    }

    /// WIF private key for `index`; fails with `ReadOnlyKey` for public-only accounts.
    pub fn get_private_key(&self, index: u32) -> Result<zeroize::Zeroizing<String>, PaymentsError> {
        let signatory = self.deriver.derive(index)?;
        signatory.signing_keys()?;
        signatory.private_key(self.params).ok_or_else(|| {
            UtxoError::ReadOnlyKey(format!("no private key available for index {index}")).into()
        })
    }

    pub fn resolve_payport(&self, destination: &Destination) -> Result<Payport, PaymentsError> {
        match destination {
            Destination::Index(index) => self.get_payport(*index),
            Destination::Address(address) => Ok(Payport::new(self.canonical_address(address)?)),
            Destination::Payport(payport) => Ok(Payport {
                address: self.canonical_address(&payport.address)?,
                extra_id: payport.extra_id.clone(),
            }),
        }
    }

    fn canonical_address(&self, address: &str) -> Result<String, PaymentsError> {
        self.standardize_address(address).ok_or_else(|| {
            UtxoError::InvalidAddress(format!("{address} is not a valid {} address", self.params)).into()
        })
    }

    pub fn is_valid_address(&self, address: &str) -> bool {
        is_valid_address(self.params, address, None)
    }

    /// Re-encode `address` in the configured format, or `None` if invalid.
    pub fn standardize_address(&self, address: &str) -> Option<String> {
        standardize_address(self.params, address, Some(self.deriver.format()))
    }

    pub fn get_public_config(&self) -> Result<PublicConfig, PaymentsError> {
        let mut public_keys = Vec::new();
        let universal_public_key = match self.deriver.signers() {
            SignerSet::Single(KeySource::KeyPairs(keys)) => {
                let secp = Secp256k1::new();
                public_keys = keys
                    .iter()
                    .map(|k| {
                        k.as_ref().map(|k| match k {
                            DiscreteKey::Private(private) => {
                                PublicKey::from_private_key(&secp, private).to_string()
                            }
                            DiscreteKey::Public(public) => public.to_string(),
                        })
                    })
                    .collect();
                None
            }
            _ => Some(self.deriver.universal_public_key()?),
        };
        Ok(PublicConfig {
            network: self.params.network,
            address_type: self.deriver.address_type(),
            format: self.deriver.format(),
            derivation_path: self.derivation_path.as_ref().map(path_string),
            universal_public_key,
            public_keys,
        })
    }

    pub async fn get_utxos(&self, index: u32) -> Result<Vec<UnspentOutput>, PaymentsError> {
        let address = self.deriver.address(index)?;
        Ok(self.provider.get_unspent_outputs(&address).await?)
    }

    pub async fn get_balance(&self, index: u32) -> Result<BalanceResult, PaymentsError> {
        let utxos = self.get_utxos(index).await?;
        let (confirmed, unconfirmed): (Vec<_>, Vec<_>) =
            utxos.iter().cloned().partition(UnspentOutput::is_confirmed);
        let spendable = total_value(&spendable_outputs(&utxos, false));
        let decimals = self.params.decimals;
        Ok(BalanceResult {
            confirmed_balance: to_main_denomination(total_value(&confirmed), decimals),
            unconfirmed_balance: to_main_denomination(total_value(&unconfirmed), decimals),
            spendable_balance: to_main_denomination(spendable, decimals),
            sweepable: spendable > self.planner.dust_threshold(),
        })
    }

    pub async fn resolve_fee_option(&self, option: &FeeOption) -> Result<ResolvedFeeOption, PaymentsError> {
        fees::resolve_fee_option(self.params, &self.provider, option).await
    }

    pub async fn create_transaction(
        &self,
        from: u32,
        to: Destination,
        amount: &str,
        options: CreateTransactionOptions,
    ) -> Result<UnsignedTransaction, PaymentsError> {
        let outputs = vec![PayportOutput {
            payport: to,
            amount: amount.to_string(),
        }];
        self.create_multi_output_transaction(from, outputs, options).await
    }

    pub async fn create_multi_output_transaction(
        &self,
        from: u32,
        outputs: Vec<PayportOutput>,
        options: CreateTransactionOptions,
    ) -> Result<UnsignedTransaction, PaymentsError> {
        let mut desired = Vec::with_capacity(outputs.len());
        let mut to_indices = Vec::with_capacity(outputs.len());
        for output in &outputs {
            let value = to_base_denomination(&output.amount, self.params.decimals)?;
            let payport = self.resolve_payport(&output.payport)?;
            desired.push(TxOutput {
                address: payport.address,
                value,
            });
            to_indices.push(match output.payport {
                Destination::Index(index) => Some(index),
                _ => None,
            });
        }
        let utxos = self.available_utxos(from, &options).await?;
        self.create(from, desired, to_indices, utxos, &options, false).await
    }

    /// Spend every eligible output of `from` to a single destination, fee deducted.
    pub async fn create_sweep_transaction(
        &self,
        from: u32,
        to: Destination,
        options: CreateTransactionOptions,
    ) -> Result<UnsignedTransaction, PaymentsError> {
        let payport = self.resolve_payport(&to)?;
        let utxos = self.available_utxos(from, &options).await?;
        let eligible = total_value(&spendable_outputs(&utxos, options.use_unconfirmed_utxos));
        let dust = self.planner.dust_threshold();
        if eligible < dust {
            return Err(UtxoError::InsufficientFunds {
                needed: dust,
                available: eligible,
                shortfall: dust - eligible,
            }
            .into());
        }
        let to_index = match to {
            Destination::Index(index) => Some(index),
            _ => None,
        };
        let desired = vec![TxOutput {
            address: payport.address,
            value: eligible,
        }];
        self.create(from, desired, vec![to_index], utxos, &options, true).await
    }

    async fn available_utxos(
        &self,
        from: u32,
        options: &CreateTransactionOptions,
    ) -> Result<Vec<UnspentOutput>, PaymentsError> {
        match &options.available_utxos {
            Some(utxos) => Ok(utxos.clone()),
            None => self.get_utxos(from).await,
        }
    }

    async fn create(
        &self,
        from: u32,
        desired: Vec<TxOutput>,
        to_indices: Vec<Option<u32>>,
        utxos: Vec<UnspentOutput>,
        options: &CreateTransactionOptions,
        sweep: bool,
    ) -> Result<UnsignedTransaction, PaymentsError> {
        let signatory = self.deriver.derive(from)?;
        let change_address = match options.change_index {
            Some(index) => self.deriver.address(index)?,
            None => signatory.address.clone(),
        };
        let fee = self.resolve_fee_option(&options.fee).await?;

        let request = PaymentRequest {
            unspent_outputs: utxos,
            desired_outputs: desired,
            change_addresses: vec![change_address],
            fee_rate: FeeRate::new(fee.target_fee_rate.clone(), fee.target_fee_rate_type),
            use_all_utxos: sweep,
            use_unconfirmed_utxos: options.use_unconfirmed_utxos,
            recipient_pays_fee: options.recipient_pays_fee,
        };
        let mut plan = build_payment_tx(&self.planner, &request)?;
        self.attach_funding_transactions(&mut plan).await?;
        let assembled = assemble(self.params, &plan, &signatory.spend)?;
        let unsigned_txid = assembled.unsigned_txid().to_string();

        let decimals = self.params.decimals;
        let (to_address, to_index) = match plan.external_outputs.as_slice() {
            [single] => (single.address.clone(), to_indices.first().copied().flatten()),
            _ => (MULTI_OUTPUT_TO_ADDRESS.to_string(), None),
        };
        let amount = to_main_denomination(plan.external_total(), decimals);
        let fee_main = to_main_denomination(plan.fee, decimals);

        info!(
            coin = %self.params,
            from = %signatory.address,
            to = %to_address,
            amount = %amount,
            fee = %fee_main,
            inputs = plan.inputs.len(),
            unsigned_txid = %unsigned_txid,
            "created transaction"
        );
        Ok(UnsignedTransaction {
            id: None,
            from_address: signatory.address.clone(),
            to_address,
            from_index: from,
            to_index,
            amount,
            fee: fee_main,
            target_fee_level: fee.target_fee_level,
            target_fee_rate: fee.target_fee_rate,
            target_fee_rate_type: fee.target_fee_rate_type,
            status: TransactionStatus::Unsigned,
            data: TransactionData {
                plan,
                unsigned_txid,
                hex: assembled.to_hex(),
                partial: false,
            },
        })
    }

    /// Legacy inputs sign over the whole funding transaction.
    async fn attach_funding_transactions(&self, plan: &mut PaymentTx) -> Result<(), PaymentsError> {
        if self.deriver.address_type().is_segwit() {
            return Ok(());
        }
        for input in plan.inputs.iter_mut().filter(|i| i.tx_hex.is_none()) {
            let raw = self.provider.get_transaction(&input.txid).await?;
            input.tx_hex = Some(raw.hex);
        }
        Ok(())
    }

    /// Sign with every key this account holds for the sending index.
    ///
    /// Multisig transactions short of their threshold come back with
    /// `data.partial` set and the PSBT in `data.hex`.
    pub fn sign_transaction(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, PaymentsError> {
        if tx.status != TransactionStatus::Unsigned {
            return Err(PaymentsError::InvalidRequest(format!(
                "cannot sign a transaction with status {:?}",
                tx.status
            )));
        }
        let assembled = AssembledTx::from_hex(&tx.data.hex)?;
        if assembled.unsigned_txid().to_string() != tx.data.unsigned_txid {
            return Err(PaymentsError::InvalidRequest(
                "transaction data does not match its unsigned txid".into(),
            ));
        }
        let signatory = self.deriver.derive(tx.from_index)?;
        if signatory.address != tx.from_address {
            return Err(PaymentsError::InvalidRequest(format!(
                "index {} does not derive {}",
                tx.from_index, tx.from_address
            )));
        }
        let signed = assembled.sign(signatory.signing_keys()?)?;
        let result = self.complete(tx, &tx.data, signed)?;
        info!(
            coin = %self.params,
            id = %result.id,
            partial = result.data.partial,
            "signed transaction"
        );
        Ok(result)
    }

    /// Merge signatures collected by different parties of a multisig account.
    pub fn combine_partially_signed_transactions(
        &self,
        txs: Vec<SignedTransaction>,
    ) -> Result<SignedTransaction, PaymentsError> {
        let Some(first) = txs.first() else {
            return Err(PaymentsError::InvalidRequest("no transactions to combine".into()));
        };
        if let Some(done) = txs.iter().find(|tx| !tx.is_partial()) {
            return Ok(done.clone());
        }

        let mut combined = SignedTx::from_hex(&first.data.hex)?;
        for tx in &txs[1..] {
            if tx.data.unsigned_txid != first.data.unsigned_txid {
                return Err(PaymentsError::InvalidRequest(format!(
                    "cannot combine {} with {}",
                    tx.data.unsigned_txid, first.data.unsigned_txid
                )));
            }
            combined = combined.combine(SignedTx::from_hex(&tx.data.hex)?)?;
        }
        let base = UnsignedTransaction {
            id: None,
            from_address: first.from_address.clone(),
            to_address: first.to_address.clone(),
            from_index: first.from_index,
            to_index: first.to_index,
            amount: first.amount.clone(),
            fee: first.fee.clone(),
            target_fee_level: first.target_fee_level,
            target_fee_rate: first.target_fee_rate.clone(),
            target_fee_rate_type: first.target_fee_rate_type,
            status: TransactionStatus::Unsigned,
            data: first.data.clone(),
        };
        let result = self.complete(&base, &first.data, combined)?;
        info!(
            coin = %self.params,
            id = %result.id,
            parts = txs.len(),
            partial = result.data.partial,
            "combined partially signed transactions"
        );
        Ok(result)
    }

    fn complete(
        &self,
        tx: &UnsignedTransaction,
        data: &TransactionData,
        signed: SignedTx,
    ) -> Result<SignedTransaction, PaymentsError> {
        if signed.is_complete()? {
            let finalized = signed.finalize()?;
            let data = TransactionData {
                hex: finalized.hex,
                partial: false,
                ..data.clone()
            };
            Ok(SignedTransaction::from_unsigned(tx, finalized.txid, data))
        } else {
            let data = TransactionData {
                hex: signed.to_hex(),
                partial: true,
                ..data.clone()
            };
            Ok(SignedTransaction::from_unsigned(tx, data.unsigned_txid.clone(), data))
        }
    }

    pub async fn broadcast_transaction(&self, tx: &SignedTransaction) -> Result<BroadcastResult, PaymentsError> {
        if tx.status != TransactionStatus::Signed {
            return Err(PaymentsError::InvalidRequest(format!(
                "cannot broadcast a transaction with status {:?}",
                tx.status
            )));
        }
        if tx.is_partial() {
            return Err(PaymentsError::InvalidRequest(
                "transaction is missing multisig signatures".into(),
            ));
        }
        let response = self.provider.broadcast(&tx.data.hex).await?;
        if response.id != tx.id {
            warn!(expected = %tx.id, reported = %response.id, "provider reported a different txid");
        }
        info!(coin = %self.params, id = %tx.id, rebroadcast = response.rebroadcast, "broadcast transaction");
        Ok(BroadcastResult {
            id: tx.id.clone(),
            rebroadcast: response.rebroadcast,
            status: TransactionStatus::Pending,
        })
    }

    pub async fn get_transaction_info(&self, txid: &str) -> Result<TransactionInfo, PaymentsError> {
        let chain_tx = self.provider.get_transaction_info(txid).await?;
        let status = if chain_tx.failed {
            TransactionStatus::Failed
        } else if chain_tx.confirmations > 0 {
            TransactionStatus::Confirmed
        } else {
            TransactionStatus::Pending
        };
        Ok(TransactionInfo {
            id: chain_tx.txid,
            status,
            confirmations: chain_tx.confirmations,
            block_height: chain_tx.block_height,
            block_time: chain_tx.block_time,
            fee: chain_tx.fee.map(|f| to_main_denomination(f, self.params.decimals)),
            is_executed: status == TransactionStatus::Confirmed,
        })
    }
}
