//! Collateral impact of an AMM leg: own-pool retention and cross-pool
//! diversion.
//!
//! Of a committed cost `X` on binary `i`, the fraction `f_i = 1 -
//! (N_active - 1) * zeta` stays in `V_i` and `zeta * X` is diverted to every
//! other active binary, which moves their prices in the opposite direction
//! and is what exposes opt-in limit pools to auto-filling.

use omx_numeric::Amount;

use crate::error::EngineError;
use crate::state::EngineState;

/// Applies the own-side update `V_i += sign * f_i * X`.
///
/// Subsidies are recomputed by the caller once both impact legs are in.
///
/// # Errors
/// Propagates arithmetic overflow; fails on an unknown outcome.
pub fn apply_own_impact(
    state: &mut EngineState,
    outcome: usize,
    cost: Amount,
    is_buy: bool,
    f_i: Amount,
) -> Result<(), EngineError> {
    let retained = cost.mul_ratio(f_i)?;
    let delta = if is_buy { retained } else { -retained };
    let binary = state
        .binary_mut(outcome)
        .ok_or_else(|| EngineError::invariant(format!("unknown outcome {outcome}")))?;
    binary.v += delta;
    Ok(())
}

/// Diverts `sign * zeta * X` into every other active binary, ascending
/// outcome order.
///
/// Returns the signed per-binary diversions for the auto-fill trigger.
///
/// # Errors
/// Propagates arithmetic overflow.
pub fn apply_cross_impacts(
    state: &mut EngineState,
    outcome: usize,
    cost: Amount,
    is_buy: bool,
    zeta: Amount,
) -> Result<Vec<(usize, Amount)>, EngineError> {
    let diverted = cost.mul_ratio(zeta)?;
    if diverted.is_zero() {
        return Ok(Vec::new());
    }
    let delta = if is_buy { diverted } else { -diverted };

    let mut diversions = Vec::new();
    for binary in state.binaries.iter_mut() {
        if !binary.active || binary.outcome == outcome {
            continue;
        }
        binary.v += delta;
        diversions.push((binary.outcome, delta));
    }
    Ok(diversions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{EngineParams, Tunable};
    use crate::state::EngineState;
    use omx_numeric::amt;

    fn setup() -> (EngineParams, EngineState) {
        let mut params = EngineParams::default();
        params.zeta = Tunable::fixed(amt!(0.1));
        let state = EngineState::init(&params).unwrap();
        (params, state)
    }

    #[test]
    fn test_own_impact_retains_f_i_of_cost() {
        let (params, mut state) = setup();
        apply_own_impact(&mut state, 0, amt!(100), true, amt!(0.8)).unwrap();
        state.recompute_subsidies(&params).unwrap();

        assert_eq!(state.binaries[0].v, amt!(80));
        // Subsidy phases out as V grows, so L < V + Z/N.
        assert!(state.binaries[0].liquidity > amt!(80));
        assert!(state.binaries[0].subsidy < amt!(333.333333));
    }

    #[test]
    fn test_own_impact_sell_reduces_v() {
        let (_, mut state) = setup();
        apply_own_impact(&mut state, 1, amt!(50), false, amt!(0.8)).unwrap();
        assert_eq!(state.binaries[1].v, amt!(-40));
    }

    #[test]
    fn test_cross_impact_diverts_to_other_active() {
        let (params, mut state) = setup();
        let diversions = apply_cross_impacts(&mut state, 0, amt!(100), true, amt!(0.1)).unwrap();
        state.recompute_subsidies(&params).unwrap();

        assert_eq!(diversions, vec![(1, amt!(10)), (2, amt!(10))]);
        assert_eq!(state.binaries[0].v, Amount::ZERO);
        assert_eq!(state.binaries[1].v, amt!(10));
        assert_eq!(state.binaries[2].v, amt!(10));
    }

    #[test]
    fn test_cross_impact_skips_inactive() {
        let (_, mut state) = setup();
        state.binaries[1].active = false;
        let diversions = apply_cross_impacts(&mut state, 0, amt!(100), true, amt!(0.1)).unwrap();
        assert_eq!(diversions, vec![(2, amt!(10))]);
        assert_eq!(state.binaries[1].v, Amount::ZERO);
    }

    #[test]
    fn test_sell_diverts_negative() {
        let (_, mut state) = setup();
        let diversions = apply_cross_impacts(&mut state, 2, amt!(100), false, amt!(0.1)).unwrap();
        assert_eq!(diversions, vec![(0, amt!(-10)), (1, amt!(-10))]);
    }

    #[test]
    fn test_zero_zeta_is_a_no_op() {
        let (_, mut state) = setup();
        let diversions =
            apply_cross_impacts(&mut state, 0, amt!(100), true, Amount::ZERO).unwrap();
        assert!(diversions.is_empty());
    }
}
