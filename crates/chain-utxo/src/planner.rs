//! Coin selection and fee planning.
//!
//! [`build_payment_tx`] picks inputs for a set of desired outputs, prices the
//! transaction and allocates change. Every plan it returns conserves value
//! exactly: `sum(inputs) == sum(outputs) + fee`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::{decode_address, standardize_address, AddressType};
use crate::error::UtxoError;
use crate::network::CoinParams;
use crate::transaction::estimate_tx_vsize;
use crate::units::to_base_denomination;
use crate::utxo::{spendable_outputs, total_value, UnspentOutput};

/// Decimal places accepted in per-weight fee rates.
const FEE_RATE_DECIMALS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeRateType {
    /// Flat fee in the main denomination.
    Main,
    /// Flat fee in base units.
    Base,
    /// Base units per virtual byte.
    BasePerWeight,
}

/// A fee rate as supplied by callers: a decimal string plus its unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate {
    pub fee_rate: String,
    pub fee_rate_type: FeeRateType,
}

impl FeeRate {
    pub fn new(fee_rate: impl Into<String>, fee_rate_type: FeeRateType) -> Self {
        Self {
            fee_rate: fee_rate.into(),
            fee_rate_type,
        }
    }

    pub fn per_vbyte(rate: u64) -> Self {
        Self::new(rate.to_string(), FeeRateType::BasePerWeight)
    }
}

impl std::fmt::Display for FeeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.fee_rate_type {
            FeeRateType::Main => write!(f, "{} (main)", self.fee_rate),
            FeeRateType::Base => write!(f, "{} (base)", self.fee_rate),
            FeeRateType::BasePerWeight => write!(f, "{}/vB", self.fee_rate),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pricing {
    /// Thousandths of a base unit per vbyte.
    PerVbyteMillis(u64),
    Flat(u64),
}

impl Pricing {
    fn parse(rate: &FeeRate, decimals: u32) -> Result<Self, UtxoError> {
        match rate.fee_rate_type {
            FeeRateType::Main => to_base_denomination(&rate.fee_rate, decimals).map(Pricing::Flat),
            FeeRateType::Base => to_base_denomination(&rate.fee_rate, 0).map(Pricing::Flat),
            FeeRateType::BasePerWeight => {
                to_base_denomination(&rate.fee_rate, FEE_RATE_DECIMALS).map(Pricing::PerVbyteMillis)
            }
        }
    }

    fn fee(self, vsize: u64) -> u64 {
        match self {
            Pricing::Flat(fee) => fee,
            Pricing::PerVbyteMillis(millis) => {
                let scaled = millis as u128 * vsize as u128;
                u64::try_from(scaled.div_ceil(1_000)).unwrap_or(u64::MAX)
            }
        }
    }
}

/// A payment destination and amount in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub value: u64,
}

/// What the caller wants paid and what it may spend.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub unspent_outputs: Vec<UnspentOutput>,
    pub desired_outputs: Vec<TxOutput>,
    /// Change destinations, used round-robin when change is split.
    pub change_addresses: Vec<String>,
    pub fee_rate: FeeRate,
    /// Spend every eligible UTXO; implies `recipient_pays_fee`.
    pub use_all_utxos: bool,
    pub use_unconfirmed_utxos: bool,
    /// Deduct the fee from the external outputs instead of adding it on top.
    pub recipient_pays_fee: bool,
}

/// Account-level policy the planner prices and splits change with.
#[derive(Debug, Clone, Copy)]
pub struct PlannerContext {
    pub params: &'static CoinParams,
    pub address_type: AddressType,
    /// `(m, n)` for multisig inputs.
    pub multisig: Option<(usize, usize)>,
    /// Number of UTXOs the wallet tries to keep available.
    pub target_utxo_pool_size: usize,
    /// Smallest change output worth creating when splitting, in base units.
    pub min_change: u64,
    pub max_fee_percent: u32,
    /// Overrides the coin's dust threshold.
    pub dust_threshold: Option<u64>,
}

impl PlannerContext {
    pub fn new(params: &'static CoinParams, address_type: AddressType) -> Self {
        Self {
            params,
            address_type,
            multisig: None,
            target_utxo_pool_size: 1,
            min_change: 0,
            max_fee_percent: 50,
            dust_threshold: None,
        }
    }

    pub fn dust_threshold(&self) -> u64 {
        self.dust_threshold.unwrap_or(self.params.dust_threshold)
    }
}

/// A priced and balanced payment, ready for assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTx {
    pub inputs: Vec<UnspentOutput>,
    /// External outputs followed by change outputs.
    pub outputs: Vec<TxOutput>,
    pub external_outputs: Vec<TxOutput>,
    pub change_outputs: Vec<TxOutput>,
    pub fee: u64,
    /// Total value of the change outputs.
    pub change: u64,
    /// Set only when exactly one change output is created outside a sweep.
    pub change_address: Option<String>,
    /// Estimated signed size in vbytes.
    pub vsize: u64,
}

impl PaymentTx {
    pub fn input_total(&self) -> u64 {
        total_value(&self.inputs)
    }

    pub fn output_total(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    pub fn external_total(&self) -> u64 {
        self.external_outputs.iter().map(|o| o.value).sum()
    }
}

struct Shape<'a> {
    ctx: &'a PlannerContext,
    pricing: Pricing,
    external_lens: Vec<usize>,
    change_lens: Vec<usize>,
}

impl Shape<'_> {
    fn fee(&self, inputs: usize, change_outputs: usize) -> u64 {
        let mut lens = self.external_lens.clone();
        lens.extend((0..change_outputs).map(|i| self.change_lens[i % self.change_lens.len()]));
        let vsize = estimate_tx_vsize(self.ctx.address_type, self.ctx.multisig, inputs, &lens);
        self.pricing.fee(vsize)
    }

    fn vsize(&self, inputs: usize, change_outputs: usize) -> u64 {
        let mut lens = self.external_lens.clone();
        lens.extend((0..change_outputs).map(|i| self.change_lens[i % self.change_lens.len()]));
        estimate_tx_vsize(self.ctx.address_type, self.ctx.multisig, inputs, &lens)
    }
}

fn canonical(params: &CoinParams, address: &str) -> Result<(String, usize), UtxoError> {
    let standard = standardize_address(params, address, None)
        .ok_or_else(|| UtxoError::InvalidAddress(format!("{address} is not a valid {params} address")))?;
    let script = decode_address(params, &standard, None)?;
    Ok((standard, script.len()))
}

/// How many change outputs `remaining` should be split into.
fn change_output_count(ctx: &PlannerContext, remaining: u64, remaining_pool: usize) -> usize {
    let dust = ctx.dust_threshold();
    if remaining < dust {
        return 0;
    }
    let pool_gap = ctx.target_utxo_pool_size.saturating_sub(remaining_pool);
    let per_output = ctx.min_change.max(dust).max(1);
    let affordable = usize::try_from(remaining / per_output).unwrap_or(usize::MAX);
    let split = pool_gap.min(affordable);
    if split >= 2 {
        split
    } else {
        1
    }
}

fn insufficient(needed: u64, available: u64) -> UtxoError {
    UtxoError::InsufficientFunds {
        needed,
        available,
        shortfall: needed.saturating_sub(available),
    }
}

/// Select inputs and allocate fee and change for `request`.
///
/// # Panics
///
/// Panics if the resulting plan does not conserve value, which indicates a bug.
pub fn build_payment_tx(
    ctx: &PlannerContext,
    request: &PaymentRequest,
) -> Result<PaymentTx, UtxoError> {
    let params = ctx.params;
    let dust = ctx.dust_threshold();

    if request.desired_outputs.is_empty() {
        return Err(UtxoError::InvalidRequest("no outputs requested".into()));
    }
    if request.change_addresses.is_empty() {
        return Err(UtxoError::InvalidRequest("no change address supplied".into()));
    }

    let mut desired = Vec::with_capacity(request.desired_outputs.len());
    let mut external_lens = Vec::with_capacity(request.desired_outputs.len());
    for output in &request.desired_outputs {
        if output.value == 0 {
            return Err(UtxoError::InvalidRequest(format!(
                "output to {} has zero value",
                output.address
            )));
        }
        if output.value < dust {
            return Err(UtxoError::InvalidRequest(format!(
                "output of {} to {} is below the dust threshold {dust}",
                output.value, output.address
            )));
        }
        let (address, len) = canonical(params, &output.address)?;
        desired.push(TxOutput {
            address,
            value: output.value,
        });
        external_lens.push(len);
    }
    let change_addresses = request
        .change_addresses
        .iter()
        .map(|a| canonical(params, a))
        .collect::<Result<Vec<_>, _>>()?;

    let target = desired
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.value))
        .ok_or_else(|| UtxoError::InvalidRequest("output total overflows".into()))?;

    let shape = Shape {
        ctx,
        pricing: Pricing::parse(&request.fee_rate, params.decimals)?,
        external_lens,
        change_lens: change_addresses.iter().map(|(_, len)| *len).collect(),
    };

    let mut candidates = spendable_outputs(&request.unspent_outputs, request.use_unconfirmed_utxos);
    candidates.sort_by(|a, b| {
        a.value
            .cmp(&b.value)
            .then_with(|| a.txid.cmp(&b.txid))
            .then_with(|| a.vout.cmp(&b.vout))
    });
    let available = total_value(&candidates);
    let recipient_pays = request.use_all_utxos || request.recipient_pays_fee;
    let required = |inputs: usize, change_outputs: usize| {
        if recipient_pays {
            target
        } else {
            target.saturating_add(shape.fee(inputs, change_outputs))
        }
    };

    let inputs: Vec<UnspentOutput> = if request.use_all_utxos {
        if candidates.is_empty() || available < target {
            return Err(insufficient(target, available));
        }
        candidates
    } else if let Some(ideal) = candidates.iter().find(|u| u.value >= required(1, 1)) {
        debug!(utxo = %ideal.outpoint(), value = ideal.value, "selected single ideal input");
        vec![ideal.clone()]
    } else {
        let mut selected = Vec::new();
        let mut total = 0u64;
        for utxo in &candidates {
            total = total.saturating_add(utxo.value);
            selected.push(utxo.clone());
            if total >= required(selected.len(), 1) {
                break;
            }
        }
        if total < required(selected.len(), 0) {
            let count = candidates.len().max(1);
            return Err(insufficient(required(count, 0), available));
        }
        selected
    };

    let input_total = total_value(&inputs);
    let input_count = inputs.len();
    let remaining_pool = request.unspent_outputs.len().saturating_sub(input_count);
    let remaining_after = |fee: u64| {
        if recipient_pays {
            input_total.checked_sub(target)
        } else {
            target.checked_add(fee).and_then(|spent| input_total.checked_sub(spent))
        }
    };

    // Fee grows with the change count. Search down from the largest split the
    // pre-change remainder allows to the first one its own fee leaves room for.
    let change_for = |change_outputs: usize| {
        remaining_after(shape.fee(input_count, change_outputs))
            .map(|remaining| change_output_count(ctx, remaining, remaining_pool))
            .unwrap_or(0)
    };
    let mut change_count = change_for(0);
    while change_count > 0 && change_for(change_count) < change_count {
        change_count -= 1;
    }

    let base_fee = shape.fee(input_count, change_count);
    let remaining = remaining_after(base_fee)
        .ok_or_else(|| insufficient(required(input_count, change_count), input_total))?;

    let mut external_outputs = desired;
    if recipient_pays {
        let share = base_fee / external_outputs.len() as u64;
        let extra = base_fee % external_outputs.len() as u64;
        for (i, output) in external_outputs.iter_mut().enumerate() {
            let deduction = if i == 0 { share + extra } else { share };
            match output.value.checked_sub(deduction) {
                Some(value) if value >= dust => output.value = value,
                _ => return Err(insufficient(deduction.saturating_add(dust), output.value)),
            }
        }
    }

    let (fee, change_outputs) = if change_count == 0 {
        (base_fee + remaining, Vec::new())
    } else {
        let each = remaining / change_count as u64;
        let outputs = (0..change_count)
            .map(|i| TxOutput {
                address: change_addresses[i % change_addresses.len()].0.clone(),
                value: if i + 1 == change_count {
                    remaining - each * (change_count as u64 - 1)
                } else {
                    each
                },
            })
            .collect();
        (base_fee, outputs)
    };

    let external_total: u64 = external_outputs.iter().map(|o| o.value).sum();
    if fee as u128 * 100 > external_total as u128 * ctx.max_fee_percent as u128 {
        return Err(UtxoError::FeeTooHigh {
            fee,
            total: external_total,
            max_percent: ctx.max_fee_percent,
        });
    }

    let change: u64 = change_outputs.iter().map(|o| o.value).sum();
    let change_address = match change_outputs.as_slice() {
        [only] if !request.use_all_utxos => Some(only.address.clone()),
        _ => None,
    };
    let mut outputs = external_outputs.clone();
    outputs.extend(change_outputs.iter().cloned());

    let plan = PaymentTx {
        inputs,
        outputs,
        external_outputs,
        change_outputs,
        fee,
        change,
        change_address,
        vsize: shape.vsize(input_count, change_count),
    };
    assert_eq!(
        plan.input_total(),
        plan.output_total() + plan.fee,
        "payment plan does not conserve value"
    );

    debug!(
        inputs = plan.inputs.len(),
        external = plan.external_outputs.len(),
        change_outputs = plan.change_outputs.len(),
        fee = plan.fee,
        change = plan.change,
        vsize = plan.vsize,
        "planned payment"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{BITCOIN_MAINNET, BITCOIN_TESTNET};
    use proptest::prelude::*;

    const EXTERNAL: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
    const CHANGE: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
    const COIN: u64 = 100_000_000;

    fn btc(amount: &str) -> u64 {
        to_base_denomination(amount, 8).unwrap()
    }

    fn utxo(n: u8, amount: &str, confirmations: u64) -> UnspentOutput {
        UnspentOutput {
            confirmations: Some(confirmations),
            ..UnspentOutput::new(format!("{n:064x}"), 0, btc(amount))
        }
    }

    fn request(utxos: Vec<UnspentOutput>, value: u64) -> PaymentRequest {
        PaymentRequest {
            unspent_outputs: utxos,
            desired_outputs: vec![TxOutput {
                address: EXTERNAL.into(),
                value,
            }],
            change_addresses: vec![CHANGE.into()],
            fee_rate: FeeRate::new("0.001", FeeRateType::Main),
            use_all_utxos: false,
            use_unconfirmed_utxos: false,
            recipient_pays_fee: false,
        }
    }

    fn ctx() -> PlannerContext {
        PlannerContext::new(&BITCOIN_MAINNET, AddressType::P2wpkh)
    }

    #[test]
    fn sweep_drains_confirmed_utxos_and_deducts_fee() {
        let mut req = request(vec![utxo(1, "0.05", 1), utxo(2, "0.06", 0)], btc("0.05"));
        req.use_all_utxos = true;
        let plan = build_payment_tx(&ctx(), &req).unwrap();
        assert_eq!(plan.inputs.len(), 1);
        assert_eq!(plan.inputs[0].value, btc("0.05"));
        assert_eq!(plan.external_outputs[0].value, btc("0.049"));
        assert_eq!(plan.fee, btc("0.001"));
        assert!(plan.change_outputs.is_empty());
        assert_eq!(plan.change_address, None);
    }

    #[test]
    fn smallest_sufficient_single_input_is_ideal() {
        let utxos = vec![utxo(1, "0.1", 1), utxo(2, "0.8", 1), utxo(3, "1.5", 1)];
        let plan = build_payment_tx(&ctx(), &request(utxos, btc("0.799"))).unwrap();
        assert_eq!(plan.inputs.len(), 1);
        assert_eq!(plan.inputs[0].value, btc("0.8"));
        assert!(plan.change_outputs.is_empty());
        assert_eq!(plan.fee, btc("0.001"));
    }

    #[test]
    fn accumulates_and_emits_single_change() {
        let utxos = vec![utxo(1, "1", 1), utxo(2, "1.001", 1)];
        let plan = build_payment_tx(&ctx(), &request(utxos, btc("1.995"))).unwrap();
        assert_eq!(plan.inputs.len(), 2);
        assert_eq!(plan.change_outputs.len(), 1);
        assert_eq!(plan.change, btc("0.005"));
        assert_eq!(plan.change_address.as_deref(), Some(CHANGE));
        assert_eq!(plan.outputs.len(), 2);
        assert_eq!(plan.outputs[1], plan.change_outputs[0]);
    }

    #[test]
    fn refills_utxo_pool_with_split_change() {
        let utxos = vec![utxo(1, "1", 1), utxo(2, "1.001", 1), utxo(3, "1.7", 1)];
        let context = PlannerContext {
            target_utxo_pool_size: 4,
            min_change: btc("0.2"),
            ..ctx()
        };
        let plan = build_payment_tx(&context, &request(utxos, 3 * COIN)).unwrap();
        assert_eq!(plan.inputs.len(), 3);
        assert_eq!(plan.change_outputs.len(), 3);
        assert_eq!(plan.change, btc("0.7"));
        let values: Vec<u64> = plan.change_outputs.iter().map(|o| o.value).collect();
        assert_eq!(values, vec![23_333_333, 23_333_333, 23_333_334]);
        assert_eq!(plan.change_address, None);
    }

    #[test]
    fn large_pool_target_settles_on_affordable_split() {
        let mut req = request(vec![utxo(1, "1.001", 1)], COIN);
        req.fee_rate = FeeRate::per_vbyte(30);
        let context = PlannerContext {
            target_utxo_pool_size: 100,
            min_change: 1_000,
            ..ctx()
        };
        let plan = build_payment_tx(&context, &req).unwrap();
        let count = plan.change_outputs.len();
        assert!(count >= 2 && count < 100, "unexpected change count {count}");
        assert!(plan.change_outputs.iter().all(|o| o.value >= 1_000));
        assert_eq!(plan.fee, plan.vsize * 30);
        assert_eq!(plan.input_total(), plan.output_total() + plan.fee);

        // One more change output would no longer be affordable.
        let shape = Shape {
            ctx: &context,
            pricing: Pricing::parse(&req.fee_rate, 8).unwrap(),
            external_lens: vec![22],
            change_lens: vec![25],
        };
        let next_fee = shape.fee(1, count + 1);
        assert!(btc("0.001") - next_fee < 1_000 * (count as u64 + 1));
    }

    #[test]
    fn dust_remainder_is_folded_into_fee() {
        let utxos = vec![utxo(1, "1", 1), utxo(2, "1.001", 1)];
        let plan = build_payment_tx(&ctx(), &request(utxos, btc("1.999999"))).unwrap();
        assert!(plan.change_outputs.is_empty());
        assert_eq!(plan.fee, btc("0.001") + btc("0.000001"));
        assert_eq!(plan.change_address, None);
    }

    #[test]
    fn insufficient_funds_reports_shortfall() {
        let utxos = vec![utxo(1, "0.5", 1), utxo(2, "0.4", 1)];
        let err = build_payment_tx(&ctx(), &request(utxos, COIN)).unwrap_err();
        match err {
            UtxoError::InsufficientFunds {
                needed,
                available,
                shortfall,
            } => {
                assert_eq!(available, btc("0.9"));
                assert_eq!(needed, btc("1.001"));
                assert_eq!(shortfall, btc("0.101"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unconfirmed_utxos_only_with_flag() {
        let utxos = vec![utxo(1, "1", 0)];
        let mut req = request(utxos, btc("0.5"));
        assert!(matches!(
            build_payment_tx(&ctx(), &req),
            Err(UtxoError::InsufficientFunds { available: 0, .. })
        ));
        req.use_unconfirmed_utxos = true;
        assert!(build_payment_tx(&ctx(), &req).is_ok());
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let utxos = vec![utxo(1, "1", 1)];

        let mut req = request(utxos.clone(), btc("0.5"));
        req.desired_outputs.clear();
        assert!(matches!(build_payment_tx(&ctx(), &req), Err(UtxoError::InvalidRequest(_))));

        let req = request(utxos.clone(), 0);
        assert!(matches!(build_payment_tx(&ctx(), &req), Err(UtxoError::InvalidRequest(_))));

        let req = request(utxos.clone(), 100);
        assert!(matches!(build_payment_tx(&ctx(), &req), Err(UtxoError::InvalidRequest(_))));

        let mut req = request(utxos.clone(), btc("0.5"));
        req.change_addresses.clear();
        assert!(matches!(build_payment_tx(&ctx(), &req), Err(UtxoError::InvalidRequest(_))));

        let mut req = request(utxos, btc("0.5"));
        req.desired_outputs[0].address = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".into();
        assert!(matches!(build_payment_tx(&ctx(), &req), Err(UtxoError::InvalidAddress(_))));
    }

    #[test]
    fn excessive_fee_is_rejected() {
        let utxos = vec![utxo(1, "1", 1)];
        let mut req = request(utxos, btc("0.001"));
        req.fee_rate = FeeRate::new("0.002", FeeRateType::Main);
        assert!(matches!(
            build_payment_tx(&ctx(), &req),
            Err(UtxoError::FeeTooHigh { max_percent: 50, .. })
        ));
    }

    #[test]
    fn per_weight_fee_follows_size_estimate() {
        let utxos = vec![utxo(1, "1", 1)];
        let mut req = request(utxos, btc("0.5"));
        req.fee_rate = FeeRate::per_vbyte(10);
        let plan = build_payment_tx(&ctx(), &req).unwrap();
        assert_eq!(plan.fee, plan.vsize * 10);
        assert_eq!(plan.change_outputs.len(), 1);

        req.fee_rate = FeeRate::new("1.5", FeeRateType::BasePerWeight);
        let plan = build_payment_tx(&ctx(), &req).unwrap();
        assert_eq!(plan.fee, (plan.vsize * 3).div_ceil(2));
    }

    #[test]
    fn recipient_pays_fee_splits_across_outputs() {
        let utxos = vec![utxo(1, "1", 1)];
        let mut req = request(utxos, btc("0.3"));
        req.desired_outputs.push(TxOutput {
            address: CHANGE.into(),
            value: btc("0.2"),
        });
        req.recipient_pays_fee = true;
        req.fee_rate = FeeRate::new("1001", FeeRateType::Base);
        let plan = build_payment_tx(&ctx(), &req).unwrap();
        assert_eq!(plan.external_outputs[0].value, btc("0.3") - 501);
        assert_eq!(plan.external_outputs[1].value, btc("0.2") - 500);
        assert_eq!(plan.change, btc("0.5"));
        assert_eq!(plan.fee, 1001);
    }

    #[test]
    fn change_rotates_through_addresses() {
        let utxos = vec![utxo(1, "5", 1)];
        let mut req = request(utxos, COIN);
        req.change_addresses.push(EXTERNAL.into());
        let context = PlannerContext {
            target_utxo_pool_size: 3,
            ..ctx()
        };
        let plan = build_payment_tx(&context, &req).unwrap();
        assert_eq!(plan.change_outputs.len(), 3);
        assert_eq!(plan.change_outputs[0].address, CHANGE);
        assert_eq!(plan.change_outputs[1].address, EXTERNAL);
        assert_eq!(plan.change_outputs[2].address, CHANGE);
    }

    #[test]
    fn immature_coinbase_is_skipped() {
        let mut coinbase = utxo(1, "50", 10);
        coinbase.coinbase = true;
        let req = request(vec![coinbase, utxo(2, "1", 1)], btc("0.5"));
        let plan = build_payment_tx(&ctx(), &req).unwrap();
        assert_eq!(plan.inputs[0].value, COIN);
    }

    #[test]
    fn addresses_are_standardized() {
        let utxos = vec![utxo(1, "1", 1)];
        let mut req = request(utxos, btc("0.5"));
        req.desired_outputs[0].address = EXTERNAL.to_uppercase();
        let plan = build_payment_tx(&ctx(), &req).unwrap();
        assert_eq!(plan.external_outputs[0].address, EXTERNAL);
    }

    #[test]
    fn testnet_planner_uses_testnet_addresses() {
        let context = PlannerContext::new(&BITCOIN_TESTNET, AddressType::P2wpkh);
        let utxos = vec![utxo(1, "1", 1)];
        let req = request(utxos, btc("0.5"));
        assert!(matches!(build_payment_tx(&context, &req), Err(UtxoError::InvalidAddress(_))));
    }

    proptest! {
        #[test]
        fn plans_conserve_value(
            values in prop::collection::vec(1_000u64..500_000_000, 1..12),
            target in 1_000u64..1_000_000_000,
            rate in 1u64..200,
            pool in 1usize..200,
            min_change in prop_oneof![Just(0u64), 1_000u64..5_000_000],
            use_all in any::<bool>(),
        ) {
            let utxos: Vec<UnspentOutput> = values
                .iter()
                .enumerate()
                .map(|(i, v)| UnspentOutput {
                    confirmations: Some(1),
                    ..UnspentOutput::new(format!("{i:064x}"), i as u32, *v)
                })
                .collect();
            let mut req = request(utxos, target);
            req.fee_rate = FeeRate::per_vbyte(rate);
            req.use_all_utxos = use_all;
            let context = PlannerContext {
                target_utxo_pool_size: pool,
                min_change,
                max_fee_percent: 100,
                ..ctx()
            };
            if let Ok(plan) = build_payment_tx(&context, &req) {
                prop_assert_eq!(plan.input_total(), plan.output_total() + plan.fee);
                prop_assert!(plan.change_outputs.iter().all(|o| o.value >= context.dust_threshold()));
                if plan.change_outputs.len() >= 2 {
                    prop_assert!(plan.change_outputs.iter().all(|o| o.value >= min_change));
                    prop_assert!(plan.change_outputs.len() <= pool);
                }
                prop_assert!(plan.external_outputs.iter().all(|o| o.value >= context.dust_threshold()));
                if plan.change_outputs.len() != 1 || use_all {
                    prop_assert!(plan.change_address.is_none());
                }
            }
        }
    }
}
