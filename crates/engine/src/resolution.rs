//! Phased resolution: intermediate eliminations with virtual-supply
//! renormalization, and the final payout.
//!
//! Mutation order matters: the YES-price sum is snapshotted exactly once
//! before any NO payout, then NO holders are paid, freed liquidity is
//! redistributed, subsidies recomputed, and only then are the virtual YES
//! supplies set in a single pass. Resolution events carry `ts_ms = 0`; the
//! host stamps them on ingestion because the engine never reads a clock.

use std::collections::BTreeMap;

use omx_numeric::{Amount, Price};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ResolutionError};
use crate::events::{EliminationDetail, Event, EventKind};
use crate::params::{EngineParams, InterpolationMode};
use crate::state::{BinaryState, EngineState};
use crate::types::Side;

/// What kind of resolution round to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionMode {
    /// Pay the winner's YES holders and close the market.
    Final {
        /// The winning outcome.
        winner: usize,
    },
    /// Eliminate the listed outcomes, pay their NO holders, and renormalize
    /// the survivors.
    Intermediate {
        /// Outcomes to eliminate this round.
        eliminated: Vec<usize>,
    },
}

/// Payouts and events produced by one resolution call.
#[derive(Debug, Clone, Default)]
pub struct ResolutionOutcome {
    /// Collateral owed per user: token face values plus cancelled BUY
    /// escrow refunds.
    pub payouts: BTreeMap<String, Amount>,
    /// Round events, contiguous per round.
    pub events: Vec<Event>,
}

/// Runs a resolution round against the positions supplied by the host.
///
/// `positions` returns token holdings per `(outcome, side)` at the instant
/// of the call; tokens escrowed in SELL pools are added on top before
/// valuation, and BUY escrow is refunded (open LIMIT orders are cancelled
/// before payouts are computed).
///
/// # Errors
/// [`ResolutionError`] on precondition failures; numeric or invariant
/// failures are fatal. In every error case the caller's state is untouched.
pub fn trigger_resolution<F>(
    state: &mut EngineState,
    params: &EngineParams,
    mode: ResolutionMode,
    positions: F,
) -> Result<ResolutionOutcome, EngineError>
where
    F: Fn(usize, Side) -> BTreeMap<String, Amount>,
{
    params.validate()?;
    match mode {
        ResolutionMode::Intermediate { eliminated } => {
            intermediate_round(state, params, eliminated, positions)
        }
        ResolutionMode::Final { winner } => final_round(state, params, winner, positions),
    }
}

fn intermediate_round<F>(
    state: &mut EngineState,
    params: &EngineParams,
    eliminated: Vec<usize>,
    positions: F,
) -> Result<ResolutionOutcome, EngineError>
where
    F: Fn(usize, Side) -> BTreeMap<String, Amount>,
{
    if !params.mr_enabled {
        return Err(ResolutionError::IntermediateDisabled.into());
    }
    let mut targets = eliminated;
    targets.sort_unstable();
    targets.dedup();
    if targets.is_empty() {
        return Ok(ResolutionOutcome::default());
    }

    for &outcome in &targets {
        let binary = state
            .binary(outcome)
            .ok_or(ResolutionError::UnknownOutcome { outcome })?;
        if !binary.active {
            return Err(ResolutionError::AlreadyInactive { outcome }.into());
        }
    }
    if state.n_active() <= targets.len() {
        return Err(ResolutionError::NoActiveRemaining.into());
    }
    let budget = params.n_outcomes as u32 - 1;
    let attempted = state.eliminated_total + targets.len() as u32;
    if attempted > budget {
        return Err(ResolutionError::ScheduleExceeded { attempted, budget }.into());
    }

    let mut work = state.clone();
    let mut outcome_acc = ResolutionOutcome::default();

    // Snapshot the YES-price sum over active binaries once, before any
    // mutation; renormalization consumes it.
    let mut pre_sum_hi = Amount::ZERO;
    let mut pre_sum = Price::ZERO;
    for binary in work.binaries.iter().filter(|b| b.active) {
        pre_sum_hi += binary.price_hi(Side::Yes)?;
        pre_sum += binary.p_yes()?;
    }
    work.pre_sum_yes = pre_sum;

    let mut total_freed = Amount::ZERO;
    for &outcome in &targets {
        let binary = work
            .binary_mut(outcome)
            .ok_or(ResolutionError::UnknownOutcome { outcome })?;

        let escrow = drain_pools(binary, params, &mut outcome_acc.payouts)?;
        let mut no_holdings = positions(outcome, Side::No);
        merge_holdings(&mut no_holdings, escrow.get(&Side::No));

        let mut paid_no = Amount::ZERO;
        let mut round_payouts = BTreeMap::new();
        for (user, tokens) in &no_holdings {
            if !tokens.is_positive() {
                continue;
            }
            paid_no += *tokens;
            *round_payouts.entry(user.clone()).or_insert(Amount::ZERO) += *tokens;
        }

        let pool = binary.liquidity;
        if paid_no > pool {
            return Err(ResolutionError::PayoutExceedsPool {
                outcome,
                payout: paid_no,
                pool,
            }
            .into());
        }
        let freed = pool - paid_no;
        total_freed += freed;

        retire(binary);
        for (user, amount) in &round_payouts {
            *outcome_acc
                .payouts
                .entry(user.clone())
                .or_insert(Amount::ZERO) += *amount;
        }
        tracing::debug!(outcome, paid_no = %paid_no, freed = %freed, "outcome eliminated");
        outcome_acc.events.push(Event::new(
            0,
            EventKind::Elimination(EliminationDetail {
                outcome,
                paid_no,
                freed,
                payouts: round_payouts,
            }),
        ));
    }

    // Redistribute the freed liquidity equally across the survivors; the
    // rounding residual lands on the last one so the total is exact.
    let survivors: Vec<usize> = work.active_outcomes();
    if total_freed.is_positive() {
        let n = Amount::from_units(survivors.len() as i64);
        let share = total_freed.mul_div(Amount::ONE, n)?;
        let mut granted = Amount::ZERO;
        for (idx, &j) in survivors.iter().enumerate() {
            let grant = if idx + 1 == survivors.len() {
                total_freed - granted
            } else {
                share
            };
            granted += grant;
            let binary = work
                .binary_mut(j)
                .ok_or_else(|| EngineError::invariant("survivor vanished"))?;
            binary.v += grant;
        }
    }
    work.recompute_subsidies(params)?;

    // Renormalize: scale every survivor's YES price by pre_sum / post_sum
    // via its virtual supply. The cap (when enabled) floors virtual_yes at
    // zero, which may leave the realized sum short of the snapshot.
    let mut post_sum_hi = Amount::ZERO;
    for &j in &survivors {
        let binary = work
            .binary(j)
            .ok_or_else(|| EngineError::invariant("survivor vanished"))?;
        post_sum_hi += binary.price_hi(Side::Yes)?;
    }
    let mut capped = Vec::new();
    if post_sum_hi.is_positive() {
        for &j in &survivors {
            let binary = work
                .binary_mut(j)
                .ok_or_else(|| EngineError::invariant("survivor vanished"))?;
            let p_hi = binary
                .pricing_supply(Side::Yes)
                .ratio_of(binary.liquidity)?;
            let target_hi = p_hi.mul_div(pre_sum_hi, post_sum_hi)?;
            let mut virtual_yes = binary.liquidity.mul_ratio(target_hi)? - binary.q_yes;
            // Hard ceiling: the target must respect q_yes_eff <= p_max * L.
            let ceiling = binary.liquidity.mul_ratio(params.p_max.to_ratio())? - binary.q_yes;
            if virtual_yes > ceiling {
                virtual_yes = ceiling.max(Amount::ZERO);
                capped.push(j);
            } else if params.vc_enabled && virtual_yes.is_negative() {
                virtual_yes = Amount::ZERO;
                capped.push(j);
            }
            binary.virtual_yes = virtual_yes;
        }
    }

    let mut realized = Price::ZERO;
    for &j in &survivors {
        let binary = work
            .binary(j)
            .ok_or_else(|| EngineError::invariant("survivor vanished"))?;
        realized += binary.p_yes()?;
    }
    outcome_acc.events.push(Event::new(
        0,
        EventKind::RoundSummary {
            pre_sum_yes: pre_sum,
            post_sum_yes: realized,
            capped,
        },
    ));

    work.rounds_completed += 1;
    work.eliminated_total += targets.len() as u32;
    // Consumed: the snapshot never leaks into the next round.
    work.pre_sum_yes = Price::ZERO;
    if params.interpolation_mode == InterpolationMode::Reset {
        work.round_anchor_ms = None;
    }

    work.validate(params)?;
    *state = work;
    Ok(outcome_acc)
}

fn final_round<F>(
    state: &mut EngineState,
    params: &EngineParams,
    winner: usize,
    positions: F,
) -> Result<ResolutionOutcome, EngineError>
where
    F: Fn(usize, Side) -> BTreeMap<String, Amount>,
{
    {
        let binary = state
            .binary(winner)
            .ok_or(ResolutionError::UnknownOutcome { outcome: winner })?;
        if !binary.active {
            return Err(ResolutionError::AlreadyInactive { outcome: winner }.into());
        }
    }

    let mut work = state.clone();
    let mut outcome_acc = ResolutionOutcome::default();

    let losers: Vec<usize> = work
        .active_outcomes()
        .into_iter()
        .filter(|&j| j != winner)
        .collect();

    // Losers not eliminated in earlier rounds pay their NO holders now.
    for j in losers {
        let binary = work
            .binary_mut(j)
            .ok_or_else(|| EngineError::invariant("binary vanished"))?;
        let escrow = drain_pools(binary, params, &mut outcome_acc.payouts)?;
        let mut no_holdings = positions(j, Side::No);
        merge_holdings(&mut no_holdings, escrow.get(&Side::No));

        let mut paid_no = Amount::ZERO;
        for (user, tokens) in &no_holdings {
            if !tokens.is_positive() {
                continue;
            }
            paid_no += *tokens;
            *outcome_acc
                .payouts
                .entry(user.clone())
                .or_insert(Amount::ZERO) += *tokens;
        }
        if paid_no > binary.liquidity {
            return Err(ResolutionError::PayoutExceedsPool {
                outcome: j,
                payout: paid_no,
                pool: binary.liquidity,
            }
            .into());
        }
        retire(binary);
    }

    // Winner: YES redeems at face value, NO at zero.
    let paid_yes = {
        let binary = work
            .binary_mut(winner)
            .ok_or_else(|| EngineError::invariant("winner vanished"))?;
        let escrow = drain_pools(binary, params, &mut outcome_acc.payouts)?;
        let mut yes_holdings = positions(winner, Side::Yes);
        merge_holdings(&mut yes_holdings, escrow.get(&Side::Yes));

        let mut paid_yes = Amount::ZERO;
        for (user, tokens) in &yes_holdings {
            if !tokens.is_positive() {
                continue;
            }
            paid_yes += *tokens;
            *outcome_acc
                .payouts
                .entry(user.clone())
                .or_insert(Amount::ZERO) += *tokens;
        }
        if paid_yes > binary.liquidity {
            return Err(ResolutionError::WinnerPayoutExceedsPool {
                outcome: winner,
                payout: paid_yes,
                pool: binary.liquidity,
            }
            .into());
        }
        retire(binary);
        paid_yes
    };

    tracing::info!(winner, paid_yes = %paid_yes, "market resolved");
    outcome_acc.events.push(Event::new(
        0,
        EventKind::ResolutionFinal { winner, paid_yes },
    ));

    *state = work;
    Ok(outcome_acc)
}

/// Cancels every open LIMIT order on a binary: BUY escrow refunds go
/// straight into the payouts map, SELL escrowed tokens are returned per
/// `(side, user)` for payout valuation.
fn drain_pools(
    binary: &mut BinaryState,
    params: &EngineParams,
    payouts: &mut BTreeMap<String, Amount>,
) -> Result<BTreeMap<Side, BTreeMap<String, Amount>>, EngineError> {
    let mut escrow: BTreeMap<Side, BTreeMap<String, Amount>> = BTreeMap::new();
    for (side, is_buy, key, pool) in binary.lob_pools.drain_all() {
        for (user, share) in pool.shares {
            if is_buy {
                let refund = share.mul_price(key.price(params.tick_size))?;
                *payouts.entry(user).or_insert(Amount::ZERO) += refund;
            } else {
                *escrow
                    .entry(side)
                    .or_default()
                    .entry(user)
                    .or_insert(Amount::ZERO) += share;
            }
        }
    }
    Ok(escrow)
}

fn merge_holdings(
    holdings: &mut BTreeMap<String, Amount>,
    escrowed: Option<&BTreeMap<String, Amount>>,
) {
    if let Some(extra) = escrowed {
        for (user, tokens) in extra {
            *holdings.entry(user.clone()).or_insert(Amount::ZERO) += *tokens;
        }
    }
}

/// Marks a binary inactive and zeroes everything the payout consumed.
/// Accumulated seigniorage is kept for reporting.
fn retire(binary: &mut BinaryState) {
    binary.active = false;
    binary.v = Amount::ZERO;
    binary.subsidy = Amount::ZERO;
    binary.liquidity = Amount::ZERO;
    binary.q_yes = Amount::ZERO;
    binary.q_no = Amount::ZERO;
    binary.virtual_yes = Amount::ZERO;
}
