//! Fixed-point rate math.
//!
//! Two scaled-integer domains are used throughout the workspace:
//! - [`WAD`] (10^18) for asset amounts and normalized debt
//! - [`RAY`] (10^27) for the rate accumulator and spot prices
//!
//! Every division floors toward zero. The lending pool uses these same
//! helpers, so a caller converting with [`normalize_debt`] predicts the
//! pool's post-state exactly.
//!
use common_types::U256;
use rust_decimal::Decimal;
use thiserror::Error;

/// 10^18
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);
/// 10^27
pub const RAY: U256 = U256::from_limbs([11_515_845_246_265_065_472, 54_210_108, 0, 0]);

const RAY_TO_WAD: U256 = U256::from_limbs([1_000_000_000, 0, 0, 0]);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathError {
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("Division by zero in {0}")]
    DivisionByZero(&'static str),
    #[error("Value {0} does not fit a decimal")]
    DecimalRange(U256),
}

fn mul_div(x: U256, y: U256, denominator: U256, op: &'static str) -> Result<U256, MathError> {
    let product = x.checked_mul(y).ok_or(MathError::Overflow(op))?;
    product.checked_div(denominator).ok_or(MathError::DivisionByZero(op))
}

/// `x * y / WAD`
pub fn wmul(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div(x, y, WAD, "wmul")
}

/// `x * WAD / y`
pub fn wdiv(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div(x, WAD, y, "wdiv")
}

/// `x * y / RAY`
pub fn rmul(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div(x, y, RAY, "rmul")
}

/// `x * RAY / y`
pub fn rdiv(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div(x, RAY, y, "rdiv")
}

/// Convert an actual debt amount into normalized debt units at `rate`.
///
/// Floors, so repaying the result never costs more than `actual_debt`.
pub fn normalize_debt(actual_debt: U256, rate: U256) -> Result<U256, MathError> {
    rdiv(actual_debt, rate)
}

/// Convert normalized debt into the actual debt owed at `rate`.
pub fn actual_debt(normalized_debt: U256, rate: U256) -> Result<U256, MathError> {
    rmul(normalized_debt, rate)
}

/// Debt capacity of `collateral` at `spot`, in debt-asset units.
pub fn collateral_value(collateral: U256, spot: U256) -> Result<U256, MathError> {
    rmul(collateral, spot)
}

/// `rate * normalized_debt <= collateral * spot`, compared without division.
pub fn is_safe(normalized_debt: U256, rate: U256, collateral: U256, spot: U256) -> Result<bool, MathError> {
    let debt = normalized_debt.checked_mul(rate).ok_or(MathError::Overflow("is_safe"))?;
    let capacity = collateral.checked_mul(spot).ok_or(MathError::Overflow("is_safe"))?;
    Ok(debt <= capacity)
}

fn to_decimal(value: U256, scale: u32) -> Result<Decimal, MathError> {
    let mantissa = u128::try_from(value)
        .ok()
        .and_then(|v| i128::try_from(v).ok())
        .ok_or(MathError::DecimalRange(value))?;
    Decimal::try_from_i128_with_scale(mantissa, scale)
        .map(|d| d.normalize())
        .map_err(|_| MathError::DecimalRange(value))
}

/// Render a WAD-scaled amount as a decimal.
pub fn wad_to_decimal(value: U256) -> Result<Decimal, MathError> {
    to_decimal(value, 18)
}

/// Render a RAY-scaled value as a decimal, truncated to 18 places.
pub fn ray_to_decimal(value: U256) -> Result<Decimal, MathError> {
    to_decimal(value / RAY_TO_WAD, 18)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn wad(units: u64) -> U256 {
        U256::from(units) * WAD
    }

    #[test]
    fn test_scale_constants() {
        assert_eq!(WAD, U256::from(10u64).pow(U256::from(18u64)));
        assert_eq!(RAY, U256::from(10u64).pow(U256::from(27u64)));
    }

    #[test]
    fn test_normalize_debt_floors() {
        // rate = 1.1
        let rate = RAY + RAY / U256::from(10u64);
        let debt = wad(100);
        let normalized = normalize_debt(debt, rate).unwrap();
        assert_eq!(normalized, debt * RAY / rate);
        // 100 / 1.1 = 90.909..., floored in the last wei
        assert_eq!(normalized, U256::from(90_909_090_909_090_909_090u128));
        assert!(actual_debt(normalized, rate).unwrap() <= debt);
    }

    #[test]
    fn test_normalize_at_unit_rate_is_identity() {
        let debt = U256::from(123_456_789u64);
        assert_eq!(normalize_debt(debt, RAY).unwrap(), debt);
        assert_eq!(actual_debt(debt, RAY).unwrap(), debt);
    }

    #[test]
    fn test_zero_rate_is_division_by_zero() {
        assert_eq!(
            normalize_debt(wad(1), U256::ZERO),
            Err(MathError::DivisionByZero("rdiv"))
        );
    }

    #[test]
    fn test_overflow_is_reported() {
        assert_eq!(rmul(U256::MAX, U256::from(2u64)), Err(MathError::Overflow("rmul")));
        assert_eq!(
            is_safe(U256::MAX, U256::from(2u64), U256::ZERO, U256::ZERO),
            Err(MathError::Overflow("is_safe"))
        );
    }

    #[test]
    fn test_wad_helpers() {
        assert_eq!(wmul(wad(3), wad(2)).unwrap(), wad(6));
        assert_eq!(wdiv(wad(3), wad(2)).unwrap(), wad(3) / U256::from(2u64));
    }

    #[test]
    fn test_is_safe_boundary() {
        // spot 2.0: one unit of collateral backs two units of debt
        let spot = RAY * U256::from(2u64);
        assert!(is_safe(wad(200), RAY, wad(100), spot).unwrap());
        assert!(!is_safe(wad(200) + U256::from(1u64), RAY, wad(100), spot).unwrap());
        assert_eq!(collateral_value(wad(100), spot).unwrap(), wad(200));
    }

    #[test]
    fn test_decimal_rendering() {
        assert_eq!(wad_to_decimal(wad(5) / U256::from(2u64)).unwrap(), dec!(2.5));
        let rate = RAY + RAY / U256::from(20u64);
        assert_eq!(ray_to_decimal(rate).unwrap(), dec!(1.05));
        assert_eq!(ray_to_decimal(RAY * U256::from(2_000u64)).unwrap(), dec!(2000));
        assert!(wad_to_decimal(U256::MAX).is_err());
    }
}
