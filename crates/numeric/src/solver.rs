//! Integer square root and the positive-root quadratic solver.
//!
//! The AMM cost function reduces to a quadratic in the trade cost `X`; this
//! module solves it entirely in widened integers. The square root is integer
//! Newton iteration — never the host float library — seeded from a
//! power-of-two estimate and terminated by a bit-accurate convergence check.

use crate::error::NumericError;
use crate::{mul_div_round, AMOUNT_SCALE_I128};

/// Hard bound on Newton iterations. From the power-of-two seed the iteration
/// converges in well under 10 steps for 128-bit inputs; the bound only guards
/// termination.
const NEWTON_MAX_ITERS: u32 = 64;

/// Which root of the quadratic the caller wants.
///
/// Buy-side cost equations have exactly one positive root (the larger);
/// sell-side proceeds equations have two positive roots and the physical
/// solution is the smaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootChoice {
    /// `(-b + sqrt(disc)) / 2a`.
    Larger,
    /// `(-b - sqrt(disc)) / 2a`.
    Smaller,
}

/// Floor square root of a `u128` by integer Newton iteration.
///
/// The seed `2^ceil(bits/2)` is guaranteed to be at or above the true root,
/// so the iteration decreases monotonically and stops at `floor(sqrt(n))`.
#[must_use]
pub fn isqrt_u128(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let bits = 128 - n.leading_zeros();
    let mut x = 1u128 << bits.div_ceil(2);
    for _ in 0..NEWTON_MAX_ITERS {
        let next = (x + n / x) >> 1;
        if next >= x {
            break;
        }
        x = next;
    }
    x
}

/// Square root rounded to the nearest integer.
///
/// The solver uses this instead of the floor so the sub-unit error of the
/// root never exceeds half a step.
#[must_use]
fn isqrt_rounded(n: u128) -> u128 {
    let r = isqrt_u128(n);
    // Round up when n is closer to (r+1)^2 than to r^2.
    let below = n - r * r;
    let above = (2 * r + 1) - below;
    if below > above {
        r + 1
    } else {
        r
    }
}

/// Solves `a*x^2 + b*x + c = 0` for the requested positive root.
///
/// Coefficients and the result are 10^6-scaled integers. Requires `a > 0`;
/// the engine's sell-side equation is normalized to positive `a` before the
/// call.
///
/// # Errors
/// - [`NumericError::NonPositiveLeadingCoefficient`] when `a <= 0`.
/// - [`NumericError::NegativeDiscriminant`] when no real root exists (shall
///   not occur under the engine's contract, but must be detectable).
/// - [`NumericError::NonPositiveRoot`] when the chosen root is not > 0.
/// - [`NumericError::Overflow`] when an intermediate does not fit.
pub fn solve_positive_quadratic(
    a: i128,
    b: i128,
    c: i128,
    root: RootChoice,
) -> Result<i128, NumericError> {
    if a <= 0 {
        return Err(NumericError::NonPositiveLeadingCoefficient);
    }

    // disc = b^2 - 4ac, at scale 10^12; its square root is back at 10^6.
    let b_sq = b.checked_mul(b).ok_or(NumericError::Overflow)?;
    let four_ac = a
        .checked_mul(c)
        .and_then(|v| v.checked_mul(4))
        .ok_or(NumericError::Overflow)?;
    let disc = b_sq.checked_sub(four_ac).ok_or(NumericError::Overflow)?;
    if disc < 0 {
        return Err(NumericError::NegativeDiscriminant);
    }

    let sqrt_disc = i128::try_from(isqrt_rounded(disc as u128)).map_err(|_| NumericError::Overflow)?;
    let numerator = match root {
        RootChoice::Larger => (-b).checked_add(sqrt_disc),
        RootChoice::Smaller => (-b).checked_sub(sqrt_disc),
    }
    .ok_or(NumericError::Overflow)?;

    let x = mul_div_round(numerator, AMOUNT_SCALE_I128, 2 * a)?;
    if x <= 0 {
        return Err(NumericError::NonPositiveRoot);
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const S: i128 = AMOUNT_SCALE_I128;

    // ==================== isqrt ====================

    #[test]
    fn test_isqrt_small_values() {
        assert_eq!(isqrt_u128(0), 0);
        assert_eq!(isqrt_u128(1), 1);
        assert_eq!(isqrt_u128(2), 1);
        assert_eq!(isqrt_u128(3), 1);
        assert_eq!(isqrt_u128(4), 2);
        assert_eq!(isqrt_u128(99), 9);
        assert_eq!(isqrt_u128(100), 10);
    }

    #[test]
    fn test_isqrt_large_values() {
        let n = u128::MAX;
        let r = isqrt_u128(n);
        assert!(r.checked_mul(r).map_or(true, |sq| sq <= n));
        assert!((r + 1).checked_mul(r + 1).map_or(true, |sq| sq > n));
    }

    #[test]
    fn test_isqrt_rounded_picks_nearest() {
        // 8 is closer to 9 than to 4.
        assert_eq!(isqrt_rounded(8), 3);
        assert_eq!(isqrt_rounded(6), 2);
    }

    proptest! {
        #[test]
        fn prop_isqrt_is_floor_sqrt(n in any::<u128>()) {
            let r = isqrt_u128(n);
            prop_assert!(r.checked_mul(r).map_or(true, |sq| sq <= n));
            let r1 = r + 1;
            prop_assert!(r1.checked_mul(r1).map_or(true, |sq| sq > n));
        }
    }

    // ==================== quadratic ====================

    #[test]
    fn test_solves_known_roots() {
        // x^2 - 3x + 2 = 0 -> roots 1 and 2.
        let a = S;
        let b = -3 * S;
        let c = 2 * S;
        assert_eq!(solve_positive_quadratic(a, b, c, RootChoice::Larger).unwrap(), 2 * S);
        assert_eq!(solve_positive_quadratic(a, b, c, RootChoice::Smaller).unwrap(), S);
    }

    #[test]
    fn test_single_positive_root_for_negative_c() {
        // x^2 + x - 6 = 0 -> roots 2 and -3; only the larger is positive.
        let x = solve_positive_quadratic(S, S, -6 * S, RootChoice::Larger).unwrap();
        assert_eq!(x, 2 * S);
    }

    #[test]
    fn test_negative_discriminant_detected() {
        // x^2 + 1 = 0 has no real roots.
        assert!(matches!(
            solve_positive_quadratic(S, 0, S, RootChoice::Larger),
            Err(NumericError::NegativeDiscriminant)
        ));
    }

    #[test]
    fn test_rejects_non_positive_leading_coefficient() {
        assert!(matches!(
            solve_positive_quadratic(0, S, -S, RootChoice::Larger),
            Err(NumericError::NonPositiveLeadingCoefficient)
        ));
        assert!(matches!(
            solve_positive_quadratic(-S, S, -S, RootChoice::Larger),
            Err(NumericError::NonPositiveRoot)
                | Err(NumericError::NonPositiveLeadingCoefficient)
        ));
    }

    #[test]
    fn test_rejects_non_positive_root() {
        // x^2 + 3x + 2 = 0 -> roots -1 and -2.
        assert!(matches!(
            solve_positive_quadratic(S, 3 * S, 2 * S, RootChoice::Larger),
            Err(NumericError::NonPositiveRoot)
        ));
    }

    proptest! {
        #[test]
        fn prop_root_satisfies_equation(
            a in 1i128..1_000,
            r1 in 1i128..1_000_000i128,
            r2 in 1i128..1_000_000i128,
        ) {
            // Construct (x - r1)(x - r2) * a with known integer roots.
            let b = -a * (r1 + r2);
            let c = a * r1 * r2;
            let larger = solve_positive_quadratic(a * S, b * S, c * S, RootChoice::Larger).unwrap();
            let smaller = solve_positive_quadratic(a * S, b * S, c * S, RootChoice::Smaller).unwrap();
            prop_assert_eq!(larger, r1.max(r2) * S);
            prop_assert_eq!(smaller, r1.min(r2) * S);
        }
    }
}
