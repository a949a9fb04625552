//! Closed-form AMM pricing: buy/sell cost quadratics and the asymptotic
//! penalty that keeps post-trade prices inside `(p_min, p_max)`.
//!
//! The trade cost `X` satisfies a fixed point: the execution price blends the
//! pre-trade price `p` and the post-trade price `p'`, but `p'` itself depends
//! on `X` through the liquidity update `L +/- f_i * X`. Eliminating `p'`
//! yields a quadratic in `X`:
//!
//! - buy:  `f_i*X^2 + (L - f_i*k)*X - (k*L + m) = 0`, larger root,
//!   with `k = d*a*p + kappa*d^2`, `m = d*b*(q + d)`;
//! - sell: `f_i*X^2 - (L + f_i*k)*X + (k*L + m) = 0`, smaller root,
//!   with `k = d*b*p - kappa*d^2`, `m = d*a*(q - d)`,
//!
//! where `a = mu/(mu+nu)`, `b = nu/(mu+nu)` and `q` is the effective supply
//! of the traded side. All arithmetic is widened-integer at the 10^6 scale.

use omx_numeric::{
    div_round_half_even, mul_div_round, solve_positive_quadratic, NumericError, RootChoice,
    Amount, Price, AMOUNT_SCALE_I128,
};

use crate::params::{EffectiveParams, EngineParams};
use crate::state::BinaryState;
use crate::types::Side;

/// Penalty applications before saturating exactly at the price bound.
const PENALTY_MAX_ROUNDS: u32 = 4;

const S: i128 = AMOUNT_SCALE_I128;

/// Result of pricing one AMM leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmmQuote {
    /// Cost paid in (buys) or proceeds paid out (sells), 6 dp.
    pub cost: Amount,
    /// Post-trade price of the traded side at the internal 10^6 scale.
    pub post_price_hi: Amount,
    /// Post-trade price rounded to the 4 dp price scale.
    pub post_price: Price,
    /// Whether the asymptotic penalty fired.
    pub penalized: bool,
}

/// Prices a trade of `delta` tokens against the AMM without mutating state.
///
/// # Errors
/// Surfaces [`NumericError`] on a negative discriminant, an unsolvable
/// penalty, or a sell that exceeds the circulating supply (the host's
/// balance check makes that unreachable in practice).
pub fn quote(
    binary: &BinaryState,
    side: Side,
    is_buy: bool,
    delta: Amount,
    eff: &EffectiveParams,
    params: &EngineParams,
) -> Result<AmmQuote, NumericError> {
    let l = binary.liquidity.raw_i128();
    let q = binary.pricing_supply(side).raw_i128();
    let d = delta.raw_i128();
    let f = eff.f_i.raw_i128();
    let kappa = eff.kappa.raw_i128();

    if d <= 0 {
        return Err(NumericError::NonPositiveRoot);
    }
    if !is_buy && d >= q {
        // q - d <= 0 would take the post-trade price through zero.
        return Err(NumericError::NonPositiveRoot);
    }

    // Pre-trade price of the traded side, full 10^6 precision.
    let p = mul_div_round(q, S, l)?;

    // Blend weights: on buys mu weights the old price, on sells the new one.
    let (w_old, w_new) = if is_buy {
        (eff.weight_p.raw_i128(), eff.weight_p_prime.raw_i128())
    } else {
        (eff.weight_p_prime.raw_i128(), eff.weight_p.raw_i128())
    };

    let d_sq = mul_div_round(d, d, S)?;
    let convexity = mul_div_round(kappa, d_sq, S)?;
    let blend_old = mul_div_round(mul_div_round(d, w_old, S)?, p, S)?;

    let x = if is_buy {
        let k = blend_old + convexity;
        let m = mul_div_round(mul_div_round(d, w_new, S)?, q + d, S)?;
        let coeff_b = l - mul_div_round(f, k, S)?;
        let coeff_c = -(mul_div_round(k, l, S)? + m);
        solve_positive_quadratic(f, coeff_b, coeff_c, RootChoice::Larger)?
    } else {
        let k = blend_old - convexity;
        let m = mul_div_round(mul_div_round(d, w_new, S)?, q - d, S)?;
        let coeff_b = -(l + mul_div_round(f, k, S)?);
        let coeff_c = mul_div_round(k, l, S)? + m;
        solve_positive_quadratic(f, coeff_b, coeff_c, RootChoice::Smaller)?
    };

    let (x, post_price_hi, penalized) =
        apply_penalty(x, q, d, l, f, is_buy, side_bound(params, is_buy), params.eta)?;

    let post_price = Price::try_from_i128(div_round_half_even(
        post_price_hi,
        S / omx_numeric::PRICE_SCALE_I128,
    )?)?;

    Ok(AmmQuote {
        cost: Amount::try_from_i128(x)?,
        post_price_hi: Amount::try_from_i128(post_price_hi)?,
        post_price,
        penalized,
    })
}

fn side_bound(params: &EngineParams, is_buy: bool) -> i128 {
    if is_buy {
        params.p_max.to_ratio().raw_i128()
    } else {
        params.p_min.to_ratio().raw_i128()
    }
}

/// Post-trade price `(q +/- d) / (L +/- f*X)` at the 10^6 scale.
fn post_price_hi(q: i128, d: i128, l: i128, f: i128, x: i128, is_buy: bool) -> Result<i128, NumericError> {
    let retained = mul_div_round(f, x, S)?;
    let (num, den) = if is_buy {
        (q + d, l + retained)
    } else {
        (q - d, l - retained)
    };
    if den <= 0 {
        return Err(NumericError::Overflow);
    }
    mul_div_round(num, S, den)
}

/// Applies the asymptotic penalty.
///
/// Buys above the cap inflate the cost by `(p'/p_max)^eta`; the larger
/// liquidity update drags `p'` back down toward the cap. Sells below the
/// floor inflate the payout by `(p_min/p')^eta`; `p' = (q-d)/(L - f*X)` is
/// increasing in `X`, so the larger drain lifts `p'` back toward the floor.
/// Either way a bounded number of rounds converges, any shortfall is closed
/// by saturating the cost so `p'` lands on the bound exactly, and trades
/// are never rejected.
fn apply_penalty(
    mut x: i128,
    q: i128,
    d: i128,
    l: i128,
    f: i128,
    is_buy: bool,
    bound: i128,
    eta: u32,
) -> Result<(i128, i128, bool), NumericError> {
    let mut p_prime = post_price_hi(q, d, l, f, x, is_buy)?;

    if !is_buy {
        if p_prime >= bound {
            return Ok((x, p_prime, false));
        }
        for _ in 0..PENALTY_MAX_ROUNDS {
            if p_prime <= 0 {
                break;
            }
            let ratio = mul_div_round(bound, S, p_prime)?;
            for _ in 0..eta {
                x = mul_div_round(x, ratio, S)?;
            }
            // Inflation can overshoot the whole pool; saturate below.
            if mul_div_round(f, x, S)? >= l {
                break;
            }
            p_prime = post_price_hi(q, d, l, f, x, is_buy)?;
            if p_prime >= bound {
                return Ok((x, p_prime, true));
            }
        }
        // Saturate exactly at the floor: solve (q - d) / (L - f*X) = p_min.
        let supply_at_bound = mul_div_round(q - d, S, bound)?;
        let x_saturated = mul_div_round(l - supply_at_bound, S, f)?;
        if x_saturated <= 0 {
            return Err(NumericError::NonPositiveRoot);
        }
        return Ok((x_saturated, bound, true));
    }

    if p_prime <= bound {
        return Ok((x, p_prime, false));
    }
    for _ in 0..PENALTY_MAX_ROUNDS {
        let ratio = mul_div_round(p_prime, S, bound)?;
        for _ in 0..eta {
            x = mul_div_round(x, ratio, S)?;
        }
        p_prime = post_price_hi(q, d, l, f, x, is_buy)?;
        if p_prime <= bound {
            return Ok((x, p_prime, true));
        }
    }

    // Saturate exactly at the cap: solve (q + d) / (L + f*X) = p_max.
    let supply_at_bound = mul_div_round(q + d, S, bound)?;
    let x_saturated = mul_div_round(supply_at_bound - l, S, f)?;
    if x_saturated <= 0 {
        return Err(NumericError::NonPositiveRoot);
    }
    Ok((x_saturated, bound, true))
}
