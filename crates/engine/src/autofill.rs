//! Opportunistic execution of opt-in limit pools after a cross-impact.
//!
//! A trade on binary `i` diverts `zeta * X` of collateral into every other
//! active binary `j`, shifting `j`'s prices. Opt-in limit pools on `j` that
//! the shift left in the money are filled against the AMM at their tick
//! price; the gap between the tick charge and the AMM cost is seigniorage,
//! split `sigma` to the system and `1 - sigma` back to the pool as a
//! pro-rata rebate.
//!
//! Deterministic order: binaries ascending, YES before NO, then ticks
//! walking away from the shifted price, then users lexicographically.

use omx_numeric::Amount;

use crate::amm;
use crate::book::{pro_rata_fills, PoolKey};
use crate::error::EngineError;
use crate::events::AutoFillDetail;
use crate::impact;
use crate::params::{EffectiveParams, EngineParams};
use crate::state::EngineState;
use crate::types::{
    Fill, FillKind, Side, AMM_COUNTERPARTY_ID, AUTO_FILL_COUNTERPARTY_ID,
};

/// Bisection steps for the max-fillable search. The predicate (post-trade
/// price vs. tick) is monotone in the size, so convergence is guaranteed.
const SEARCH_ITERS: u32 = 20;

/// Finds the largest `delta` in `(0, hi]` whose post-trade price stays on
/// the feasible side of the tick: at or below it for auto-buys, at or above
/// it for auto-sells. Quote failures count as infeasible.
fn search_max_delta(
    state: &EngineState,
    outcome: usize,
    side: Side,
    is_buy: bool,
    tick_ratio: Amount,
    hi: Amount,
    eff: &EffectiveParams,
    params: &EngineParams,
) -> Amount {
    let binary = match state.binary(outcome) {
        Some(b) => b,
        None => return Amount::ZERO,
    };
    let feasible = |delta: Amount| -> bool {
        match amm::quote(binary, side, is_buy, delta, eff, params) {
            Ok(q) => {
                if is_buy {
                    q.post_price_hi <= tick_ratio
                } else {
                    q.post_price_hi >= tick_ratio
                }
            }
            Err(_) => false,
        }
    };

    if feasible(hi) {
        return hi;
    }
    let mut lo = Amount::ZERO;
    let mut hi = hi;
    for _ in 0..SEARCH_ITERS {
        let mid = Amount::from_raw((lo.raw() + hi.raw()) / 2);
        if !mid.is_positive() || mid == lo {
            break;
        }
        if feasible(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Runs auto-fills for every diverted binary after an AMM leg on
/// `trigger_outcome`.
///
/// Each executed pool runs a real AMM trade on its binary (own impact plus
/// cross diversion, but no recursive auto-fills), so the search predicate
/// matches the realized post-trade price. Caps: per-pool size
/// `af_cap_frac * |D_j| / tick`, per-binary surplus `af_max_surplus * |D_j|`,
/// and `af_max_pools` pools overall.
///
/// # Errors
/// Propagates arithmetic overflow; any error rolls back the whole batch.
#[allow(clippy::too_many_arguments)]
pub fn trigger_auto_fills(
    state: &mut EngineState,
    trigger_outcome: usize,
    diversions: &[(usize, Amount)],
    eff: &EffectiveParams,
    params: &EngineParams,
    tick_id: u64,
    ts_ms: u64,
    next_trade: &mut u64,
) -> Result<(Vec<Fill>, Vec<AutoFillDetail>), EngineError> {
    let mut fills = Vec::new();
    let mut details = Vec::new();
    let mut pools_filled = 0usize;

    for &(outcome, diversion) in diversions {
        if pools_filled >= params.af_max_pools {
            break;
        }
        if diversion.is_zero() {
            continue;
        }
        let is_increase = diversion.is_positive();
        let surplus_budget = diversion.abs().mul_ratio(params.af_max_surplus)?;
        let mut surplus_used = Amount::ZERO;

        'sides: for side in [Side::Yes, Side::No] {
            // Rising V lowers prices and puts resting bids in the money;
            // falling V raises prices and exposes resting asks.
            let fill_buy_pools = is_increase;

            let mut keys: Vec<PoolKey> = {
                let Some(binary) = state.binary(outcome) else {
                    break 'sides;
                };
                if !binary.active {
                    break 'sides;
                }
                let pools = binary.lob_pools.side(side);
                let map = if fill_buy_pools { &pools.buy } else { &pools.sell };
                map.keys().copied().filter(|k| k.opt_in()).collect()
            };
            if is_increase {
                keys.sort_by(|a, b| b.tick().cmp(&a.tick()));
            } else {
                keys.sort_by(|a, b| a.tick().cmp(&b.tick()));
            }

            for key in keys {
                if pools_filled >= params.af_max_pools {
                    break 'sides;
                }
                if surplus_used >= surplus_budget {
                    break 'sides;
                }

                let tick_price = key.price(params.tick_size);
                let tick_ratio = tick_price.to_ratio();

                let (current_p, capacity) = {
                    let binary = state
                        .binary(outcome)
                        .ok_or_else(|| EngineError::invariant("binary vanished"))?;
                    let pools = binary.lob_pools.side(side);
                    let map = if fill_buy_pools { &pools.buy } else { &pools.sell };
                    let Some(pool) = map.get(&key) else { continue };
                    let capacity = if fill_buy_pools {
                        pool.volume.div_price_floor(tick_price)?
                    } else {
                        pool.volume
                    };
                    (binary.price_hi(side)?, capacity)
                };

                // The pool must be strictly in the money after the drift.
                if is_increase && tick_ratio <= current_p {
                    continue;
                }
                if !is_increase && tick_ratio >= current_p {
                    continue;
                }
                if !capacity.is_positive() {
                    continue;
                }

                let searched = search_max_delta(
                    state, outcome, side, is_increase, tick_ratio, capacity, eff, params,
                );
                let cap = diversion
                    .abs()
                    .mul_ratio(params.af_cap_frac)?
                    .div_price_floor(tick_price)?;
                let delta = searched.min(cap);
                if !delta.is_positive() {
                    continue;
                }

                let quote = {
                    let binary = state
                        .binary(outcome)
                        .ok_or_else(|| EngineError::invariant("binary vanished"))?;
                    amm::quote(binary, side, is_increase, delta, eff, params)?
                };
                let charge = delta.mul_price(tick_price)?;
                let surplus = if is_increase {
                    charge - quote.cost
                } else {
                    quote.cost - charge
                };
                if !surplus.is_positive() {
                    continue;
                }
                if surplus_used + surplus > surplus_budget {
                    break 'sides;
                }

                // ---- Commit ----
                let system_share = surplus.mul_ratio(params.sigma)?;
                let rebate_total = surplus - system_share;

                let mut position_deltas = std::collections::BTreeMap::new();
                let mut balance_deltas = std::collections::BTreeMap::new();
                {
                    let binary = state
                        .binary_mut(outcome)
                        .ok_or_else(|| EngineError::invariant("binary vanished"))?;
                    let pools = binary.lob_pools.side_mut(side);
                    let map = if fill_buy_pools {
                        &mut pools.buy
                    } else {
                        &mut pools.sell
                    };
                    let pool = map
                        .get_mut(&key)
                        .ok_or_else(|| EngineError::invariant("auto-fill pool vanished"))?;

                    for (user, tokens) in pro_rata_fills(pool, delta)? {
                        if is_increase {
                            position_deltas.insert(user, tokens);
                        } else {
                            let proceeds = tokens.mul_price(tick_price)?;
                            position_deltas.insert(user.clone(), -tokens);
                            balance_deltas.insert(user, proceeds);
                        }
                    }
                    for (user, rebate) in pro_rata_fills(pool, rebate_total)? {
                        *balance_deltas.entry(user).or_insert(Amount::ZERO) += rebate;
                    }

                    let old_volume = pool.volume;
                    let consumed = if fill_buy_pools { charge } else { delta };
                    pool.scale_shares(old_volume - consumed, old_volume, fill_buy_pools, tick_price)?;
                    if pool.shares.is_empty() {
                        map.remove(&key);
                    }

                    if is_increase {
                        match side {
                            Side::Yes => binary.q_yes += delta,
                            Side::No => binary.q_no += delta,
                        }
                    } else {
                        match side {
                            Side::Yes => binary.q_yes -= delta,
                            Side::No => binary.q_no -= delta,
                        }
                    }
                }

                // The AMM leg lands like any other: f_j stays home, zeta is
                // diverted, but no recursive auto-fills are triggered.
                impact::apply_own_impact(state, outcome, quote.cost, is_increase, eff.f_i)?;
                impact::apply_cross_impacts(state, outcome, quote.cost, is_increase, eff.zeta)?;
                {
                    let binary = state
                        .binary_mut(outcome)
                        .ok_or_else(|| EngineError::invariant("binary vanished"))?;
                    binary.v += system_share;
                    binary.seigniorage += system_share;
                }
                state.recompute_subsidies(params)?;

                surplus_used += surplus;
                pools_filled += 1;

                let trade_id = *next_trade;
                *next_trade += 1;
                let (buyer, seller) = if is_increase {
                    (
                        AUTO_FILL_COUNTERPARTY_ID.to_string(),
                        AMM_COUNTERPARTY_ID.to_string(),
                    )
                } else {
                    (
                        AMM_COUNTERPARTY_ID.to_string(),
                        AUTO_FILL_COUNTERPARTY_ID.to_string(),
                    )
                };
                tracing::debug!(
                    trigger = trigger_outcome,
                    outcome,
                    side = %side,
                    tick = key.tick(),
                    delta = %delta,
                    surplus = %surplus,
                    "auto-fill executed"
                );
                fills.push(Fill {
                    trade_id,
                    buyer,
                    seller,
                    outcome,
                    side,
                    price: tick_price,
                    size: delta,
                    fee: Amount::ZERO,
                    kind: FillKind::AutoFill,
                    price_yes: None,
                    price_no: None,
                    tick_id,
                    ts_ms,
                });
                details.push(AutoFillDetail {
                    outcome,
                    side,
                    tick: key.tick(),
                    delta,
                    surplus,
                    position_deltas,
                    balance_deltas,
                });
            }
        }
    }

    Ok((fills, details))
}
