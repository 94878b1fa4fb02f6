use chain_utxo::units::to_base_denomination;
use chain_utxo::{CoinParams, FeeRateType};
use tracing::{debug, warn};

use crate::error::PaymentsError;
use crate::provider::BlockchainProvider;
use crate::types::{FeeLevel, FeeOption, ResolvedFeeOption};

/// Turn a fee option into a concrete rate.
///
/// Custom rates are validated and passed through. Levels ask the provider
/// for a per-vbyte estimate and fall back to the coin's table when the
/// provider cannot answer. Level rates never go below the minimum relay rate.
pub async fn resolve_fee_option<P>(
    params: &CoinParams,
    provider: &P,
    option: &FeeOption,
) -> Result<ResolvedFeeOption, PaymentsError>
where
    P: BlockchainProvider + ?Sized,
{
    if option.fee_level == FeeLevel::Custom {
        let (rate, rate_type) = match (&option.fee_rate, option.fee_rate_type) {
            (Some(rate), Some(rate_type)) => (rate.trim().to_string(), rate_type),
            _ => {
                return Err(PaymentsError::InvalidRequest(
                    "custom fee level requires fee_rate and fee_rate_type".into(),
                ))
            }
        };
        let decimals = match rate_type {
            FeeRateType::Main => params.decimals,
            FeeRateType::Base => 0,
            FeeRateType::BasePerWeight => 3,
        };
        to_base_denomination(&rate, decimals)?;
        return Ok(ResolvedFeeOption {
            target_fee_level: FeeLevel::Custom,
            target_fee_rate: rate,
            target_fee_rate_type: rate_type,
        });
    }

    let fallback = match option.fee_level {
        FeeLevel::Low => params.fallback_fee_rates.low,
        FeeLevel::High => params.fallback_fee_rates.high,
        _ => params.fallback_fee_rates.medium,
    };
    let estimated = match provider.estimate_fee(option.fee_level).await {
        Ok(rate) => rate,
        Err(e) => {
            warn!(
                coin = %params,
                level = %option.fee_level,
                fallback,
                error = %e,
                "fee estimate unavailable, using fallback rate"
            );
            fallback
        }
    };
    let rate = estimated.max(params.min_relay_fee_rate);
    debug!(coin = %params, level = %option.fee_level, estimated, rate, "resolved fee rate");

    Ok(ResolvedFeeOption {
        target_fee_level: option.fee_level,
        target_fee_rate: rate.to_string(),
        target_fee_rate_type: FeeRateType::BasePerWeight,
    })
}
