//! Scaled-integer fixed-point arithmetic for the omx market engine.
//!
//! All monetary amounts, token quantities and prices in the engine are exact
//! rationals represented as scaled 64-bit integers: amounts carry 6 decimal
//! places, prices carry 4. Every operation that affects market state goes
//! through this crate; no binary floating point is used anywhere.
//!
//! Intermediate products widen to 128 bits so that `q * L`-shaped terms never
//! overflow, and all divisions round half-to-even at the scale of the result.

mod error;
mod fixed;
mod solver;

pub use error::NumericError;
pub use fixed::{safe_divide, Amount, Price};
pub use solver::{isqrt_u128, solve_positive_quadratic, RootChoice};

/// Scale factor for [`Amount`] values as an `i128`, for widened arithmetic.
pub const AMOUNT_SCALE_I128: i128 = 1_000_000;

/// Scale factor for [`Price`] values as an `i128`, for widened arithmetic.
pub const PRICE_SCALE_I128: i128 = 10_000;

/// Division of widened integers rounding half-to-even.
///
/// Rounds the magnitude and reapplies the sign, so results are symmetric
/// around zero.
///
/// # Errors
/// Returns [`NumericError::DivisionByZero`] when `d == 0` and
/// [`NumericError::Overflow`] when the quotient does not fit in `i128`.
pub fn div_round_half_even(n: i128, d: i128) -> Result<i128, NumericError> {
    use std::cmp::Ordering;

    if d == 0 {
        return Err(NumericError::DivisionByZero);
    }
    let negative = (n < 0) != (d < 0);
    let un = n.unsigned_abs();
    let ud = d.unsigned_abs();
    let mut q = un / ud;
    let r = un % ud;
    // Compare r against ud - r instead of 2r vs ud to avoid u128 overflow.
    let round_up = match r.cmp(&(ud - r)) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => q % 2 == 1,
    };
    if round_up {
        q += 1;
    }
    let signed = i128::try_from(q).map_err(|_| NumericError::Overflow)?;
    Ok(if negative { -signed } else { signed })
}

/// `a * b / d` with a widened product and half-to-even rounding.
///
/// # Errors
/// Returns [`NumericError::Overflow`] when `a * b` does not fit in `i128`,
/// and [`NumericError::DivisionByZero`] when `d == 0`.
pub fn mul_div_round(a: i128, b: i128, d: i128) -> Result<i128, NumericError> {
    let product = a.checked_mul(b).ok_or(NumericError::Overflow)?;
    div_round_half_even(product, d)
}

/// `a * b / d` truncating toward zero. Used for escrow capacities where
/// rounding up could overdraw a pool.
///
/// # Errors
/// Same failure modes as [`mul_div_round`].
pub fn mul_div_floor(a: i128, b: i128, d: i128) -> Result<i128, NumericError> {
    if d == 0 {
        return Err(NumericError::DivisionByZero);
    }
    let product = a.checked_mul(b).ok_or(NumericError::Overflow)?;
    Ok(product / d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_even_rounds_to_nearest() {
        assert_eq!(div_round_half_even(7, 2).unwrap(), 4); // 3.5 -> 4 (even)
        assert_eq!(div_round_half_even(5, 2).unwrap(), 2); // 2.5 -> 2 (even)
        assert_eq!(div_round_half_even(9, 4).unwrap(), 2); // 2.25 -> 2
        assert_eq!(div_round_half_even(11, 4).unwrap(), 3); // 2.75 -> 3
    }

    #[test]
    fn test_half_even_is_sign_symmetric() {
        assert_eq!(div_round_half_even(-7, 2).unwrap(), -4);
        assert_eq!(div_round_half_even(7, -2).unwrap(), -4);
        assert_eq!(div_round_half_even(-7, -2).unwrap(), 4);
        assert_eq!(div_round_half_even(-5, 2).unwrap(), -2);
    }

    #[test]
    fn test_division_by_zero() {
        assert!(matches!(
            div_round_half_even(1, 0),
            Err(NumericError::DivisionByZero)
        ));
        assert!(matches!(
            mul_div_round(1, 1, 0),
            Err(NumericError::DivisionByZero)
        ));
    }

    #[test]
    fn test_mul_div_widens() {
        // q * L shaped product: both operands near 1e18.
        let a = 1_000_000_000_000_000_000i128;
        let b = 3i128;
        assert_eq!(mul_div_round(a, b, 2).unwrap(), a / 2 * 3);
    }

    #[test]
    fn test_mul_div_overflow_detected() {
        assert!(matches!(
            mul_div_round(i128::MAX, 2, 1),
            Err(NumericError::Overflow)
        ));
    }

    #[test]
    fn test_mul_div_floor_truncates() {
        assert_eq!(mul_div_floor(7, 1, 2).unwrap(), 3);
        assert_eq!(mul_div_floor(-7, 1, 2).unwrap(), -3);
    }
}
