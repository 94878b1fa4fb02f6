//! Fixed-point conversion between base units (integer) and the main
//! denomination (decimal string).

use crate::error::UtxoError;

/// Converts amounts for an asset with a fixed number of decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitConverter {
    pub decimals: u32,
}

impl UnitConverter {
    pub fn new(decimals: u32) -> Self {
        Self { decimals }
    }

    pub fn to_main_denomination(&self, base: u64) -> String {
        to_main_denomination(base, self.decimals)
    }

    pub fn to_base_denomination(&self, main: &str) -> Result<u64, UtxoError> {
        to_base_denomination(main, self.decimals)
    }
}

/// Render `base` units as a decimal string with trailing zeros trimmed.
pub fn to_main_denomination(base: u64, decimals: u32) -> String {
    if decimals == 0 {
        return base.to_string();
    }
    let scale = 10u128.pow(decimals);
    let whole = base as u128 / scale;
    let frac = base as u128 % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

/// Parse a decimal string into base units.
///
/// Amounts with more fractional digits than the asset supports are
/// rejected rather than rounded.
pub fn to_base_denomination(main: &str, decimals: u32) -> Result<u64, UtxoError> {
    let trimmed = main.trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if unsigned.is_empty() {
        return Err(UtxoError::InvalidAmount("empty amount".into()));
    }

    let (whole, frac) = match unsigned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (unsigned, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(UtxoError::InvalidAmount(format!("not a number: {main}")));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(UtxoError::InvalidAmount(format!("not a decimal number: {main}")));
    }
    if frac.len() > decimals as usize {
        return Err(UtxoError::InvalidAmount(format!(
            "{main} has more than {decimals} decimal places"
        )));
    }

    let scale = 10u128.pow(decimals);
    let whole_value: u128 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| UtxoError::InvalidAmount(format!("amount too large: {main}")))?
    };
    let frac_value: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = decimals as usize);
        padded
            .parse()
            .map_err(|_| UtxoError::InvalidAmount(format!("invalid fraction: {main}")))?
    };

    let total = whole_value
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_value))
        .ok_or_else(|| UtxoError::InvalidAmount(format!("amount too large: {main}")))?;
    u64::try_from(total).map_err(|_| UtxoError::InvalidAmount(format!("amount too large: {main}")))
}
