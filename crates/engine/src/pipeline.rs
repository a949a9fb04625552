//! The deterministic batch pipeline: `apply_orders`.
//!
//! One invocation is the unit of atomicity. All work happens on a clone of
//! the caller's state; the clone is swapped in only when every order has been
//! applied and the exit invariants hold, so a fatal error leaves the caller's
//! state untouched.
//!
//! Phases: validate entry state, resolve interpolated parameters, sort
//! orders by `(ts_ms, order_id)`, place LIMIT orders, cross-match each
//! binary, then run MARKET orders (LOB leg, AMM leg, impact, auto-fill) with
//! all-or-nothing slippage checks per order.

use std::collections::BTreeSet;

use omx_numeric::Amount;

use crate::amm;
use crate::autofill;
use crate::book;
use crate::error::{EngineError, RejectReason};
use crate::events::{Event, EventKind};
use crate::impact;
use crate::params::{EngineParams, InterpolationMode};
use crate::state::EngineState;
use crate::types::{Fill, FillKind, Order, OrderKind, Side, AMM_COUNTERPARTY_ID};

/// Fills and events produced by one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Every fill, in execution order.
    pub fills: Vec<Fill>,
    /// Accepted/rejected/fill/auto-fill events, in emission order.
    pub events: Vec<Event>,
}

/// Applies a batch of orders at `t_now_ms`.
///
/// Recoverable per-order problems become `ORDER_REJECTED` events; any
/// returned error is fatal and leaves `state` observationally equal to
/// entry.
///
/// # Errors
/// [`EngineError::Params`] on invalid parameters, [`EngineError::Numeric`] /
/// [`EngineError::Invariant`] on internal failures.
pub fn apply_orders(
    state: &mut EngineState,
    orders: &[Order],
    params: &EngineParams,
    t_now_ms: u64,
) -> Result<BatchOutcome, EngineError> {
    params.validate()?;
    state.validate(params)?;

    let mut work = state.clone();
    work.batch_seq += 1;
    let tick_id = work.batch_seq;

    // In Reset mode the interpolation clock restarts at the first batch
    // after a resolution round; the anchor is stamped here because
    // trigger_resolution never sees a clock.
    if params.mr_enabled
        && params.interpolation_mode == InterpolationMode::Reset
        && work.rounds_completed > 0
        && work.round_anchor_ms.is_none()
    {
        work.round_anchor_ms = Some(t_now_ms);
    }
    let anchor = if params.mr_enabled && params.interpolation_mode == InterpolationMode::Reset {
        work.round_anchor_ms.unwrap_or(0)
    } else {
        0
    };
    let elapsed = t_now_ms.saturating_sub(anchor);
    let (eff, clamp) = params.effective_at(elapsed, work.n_active());

    let mut outcome = BatchOutcome::default();
    if let Some(kind) = clamp {
        outcome.events.push(Event::new(t_now_ms, kind));
    }

    let mut sorted: Vec<&Order> = orders.iter().collect();
    sorted.sort_by(|a, b| {
        a.ts_ms
            .cmp(&b.ts_ms)
            .then_with(|| a.order_id.cmp(&b.order_id))
    });

    // ---- Phase 1: validation and LIMIT placement ----
    let mut rejected: BTreeSet<&str> = BTreeSet::new();
    for order in &sorted {
        if let Some(reason) = validate_order(&work, order, params) {
            rejected.insert(order.order_id.as_str());
            outcome.events.push(Event::new(
                t_now_ms,
                EventKind::OrderRejected {
                    order_id: order.order_id.clone(),
                    reason,
                },
            ));
            continue;
        }
        if order.kind == OrderKind::Limit {
            let limit_price = order
                .limit_price
                .ok_or_else(|| EngineError::invariant("limit order without price past validation"))?;
            let tick = (limit_price.raw() / params.tick_size.raw()) as u32;
            let binary = work
                .binary_mut(order.outcome)
                .ok_or_else(|| EngineError::invariant("outcome vanished past validation"))?;
            book::add_to_pool(
                binary,
                order.side,
                order.is_buy,
                tick,
                order.af_opt_in,
                &order.user_id,
                order.size,
                params.tick_size,
            )?;
            outcome.events.push(Event::new(
                t_now_ms,
                EventKind::OrderAccepted {
                    order_id: order.order_id.clone(),
                },
            ));
        }
    }

    // ---- Phase 2: cross-matching ----
    if params.cm_enabled {
        let binaries = &mut work.binaries;
        let next_trade = &mut work.next_trade_seq;
        let mut cross_fills = Vec::new();
        for binary in binaries.iter_mut() {
            if !binary.active {
                continue;
            }
            let fills = book::cross_match_binary(
                binary,
                params.f_match,
                params.tick_size,
                tick_id,
                t_now_ms,
                next_trade,
            )?;
            cross_fills.extend(fills);
        }
        work.recompute_subsidies(params)?;
        if !cross_fills.is_empty() {
            work.validate(params)?;
        }
        for fill in cross_fills {
            outcome
                .events
                .push(Event::new(t_now_ms, EventKind::CrossMatch(fill.clone())));
            outcome.fills.push(fill);
        }
    }

    // ---- Phase 3: MARKET orders ----
    for order in &sorted {
        if order.kind != OrderKind::Market || rejected.contains(order.order_id.as_str()) {
            continue;
        }
        match run_market_order(&work, order, params, &eff, tick_id, t_now_ms)? {
            MarketResult::Committed {
                state: next,
                fills,
                auto_fill_details,
            } => {
                next.validate(params)?;
                work = next;
                for fill in &fills {
                    let kind = match fill.kind {
                        FillKind::AutoFill => continue,
                        _ => EventKind::Fill(fill.clone()),
                    };
                    outcome.events.push(Event::new(t_now_ms, kind));
                }
                for detail in auto_fill_details {
                    outcome
                        .events
                        .push(Event::new(t_now_ms, EventKind::AutoFill(detail)));
                }
                outcome.fills.extend(fills);
            }
            MarketResult::SlippageRejected => {
                outcome.events.push(Event::new(
                    t_now_ms,
                    EventKind::OrderRejected {
                        order_id: order.order_id.clone(),
                        reason: RejectReason::SlippageExceeded,
                    },
                ));
            }
        }
    }

    work.validate(params)?;
    *state = work;
    Ok(outcome)
}

/// Cancels a user's resting LIMIT volume at one pool.
///
/// Returns the refund: escrowed collateral for bids, tokens for asks.
///
/// # Errors
/// Fatal errors roll the state back, as in [`apply_orders`].
pub fn cancel_limit(
    state: &mut EngineState,
    params: &EngineParams,
    outcome: usize,
    side: Side,
    is_buy: bool,
    tick: u32,
    opt_in: bool,
    user: &str,
) -> Result<Amount, EngineError> {
    state.validate(params)?;
    let mut work = state.clone();
    let binary = work
        .binary_mut(outcome)
        .ok_or_else(|| EngineError::invariant(format!("unknown outcome {outcome}")))?;
    let refund = book::cancel_from_pool(binary, side, is_buy, tick, opt_in, user, params.tick_size)?;
    work.validate(params)?;
    *state = work;
    Ok(refund)
}

fn validate_order(
    state: &EngineState,
    order: &Order,
    params: &EngineParams,
) -> Option<RejectReason> {
    let Some(binary) = state.binary(order.outcome) else {
        return Some(RejectReason::UnknownOutcome);
    };
    if !binary.active {
        return Some(RejectReason::InactiveOutcome);
    }
    if !order.size.is_positive() {
        return Some(RejectReason::NonPositiveSize);
    }
    if order.kind == OrderKind::Limit {
        let Some(price) = order.limit_price else {
            return Some(RejectReason::MissingLimitPrice);
        };
        if price < params.p_min || price > params.p_max {
            return Some(RejectReason::LimitPriceOutOfRange);
        }
        if price.raw() % params.tick_size.raw() != 0 {
            return Some(RejectReason::LimitPriceOffTick);
        }
    }
    None
}

enum MarketResult {
    Committed {
        state: EngineState,
        fills: Vec<Fill>,
        auto_fill_details: Vec<crate::events::AutoFillDetail>,
    },
    SlippageRejected,
}

/// Runs one MARKET order against a scratch copy: LOB leg first, AMM for the
/// remainder, then impact and auto-fills. Both legs commit together iff the
/// realized slippage passes; otherwise neither does.
fn run_market_order(
    base: &EngineState,
    order: &Order,
    params: &EngineParams,
    eff: &crate::params::EffectiveParams,
    tick_id: u64,
    t_now_ms: u64,
) -> Result<MarketResult, EngineError> {
    let mut scratch = base.clone();
    let side = order.side;
    let is_buy = order.is_buy;

    let p_pre_hi = scratch
        .binary(order.outcome)
        .ok_or_else(|| EngineError::invariant("unknown outcome in market leg"))?
        .price_hi(side)?;

    // LOB leg at resting tick prices.
    let (lob_fills, remaining) = {
        let next_trade = &mut scratch.next_trade_seq;
        let binary = scratch
            .binaries
            .get_mut(order.outcome)
            .ok_or_else(|| EngineError::invariant("unknown outcome in market leg"))?;
        book::match_market_order(
            binary,
            side,
            is_buy,
            order.size,
            params.fee,
            params.tick_size,
            &order.user_id,
            tick_id,
            t_now_ms,
            next_trade,
        )?
    };
    let mut money = Amount::ZERO;
    for fill in &lob_fills {
        money += fill.size.mul_price(fill.price)?;
    }

    // AMM leg for the remainder.
    let quote = if remaining.is_positive() {
        let binary = scratch
            .binary(order.outcome)
            .ok_or_else(|| EngineError::invariant("unknown outcome in market leg"))?;
        let quote = amm::quote(binary, side, is_buy, remaining, eff, params)?;
        money += quote.cost;
        Some(quote)
    } else {
        None
    };

    // Realized slippage over both legs, relative to the pre-trade price.
    if let Some(max_slippage) = order.max_slippage {
        let avg_hi = money.ratio_of(order.size)?;
        let drift = if is_buy {
            avg_hi - p_pre_hi
        } else {
            p_pre_hi - avg_hi
        };
        let slippage = drift.ratio_of(p_pre_hi)?;
        if slippage > max_slippage {
            tracing::debug!(
                order_id = %order.order_id,
                slippage = %slippage,
                limit = %max_slippage,
                "market order rejected on slippage"
            );
            return Ok(MarketResult::SlippageRejected);
        }
    }

    // ---- Commit ----
    let mut fills = lob_fills;
    {
        let binary = scratch
            .binaries
            .get_mut(order.outcome)
            .ok_or_else(|| EngineError::invariant("unknown outcome in market leg"))?;
        // Supply moves by the full executed size, LOB leg included.
        let total = order.size;
        let signed = if is_buy { total } else { -total };
        match side {
            Side::Yes => binary.q_yes += signed,
            Side::No => binary.q_no += signed,
        }
    }

    let mut auto_fill_details = Vec::new();
    if let Some(quote) = quote {
        impact::apply_own_impact(&mut scratch, order.outcome, quote.cost, is_buy, eff.f_i)?;
        let diversions =
            impact::apply_cross_impacts(&mut scratch, order.outcome, quote.cost, is_buy, eff.zeta)?;
        scratch.recompute_subsidies(params)?;

        let fee = remaining.mul_price(quote.post_price)?.mul_ratio(params.fee)?;
        let trade_id = scratch.next_trade_seq;
        scratch.next_trade_seq += 1;
        let (buyer, seller) = if is_buy {
            (order.user_id.clone(), AMM_COUNTERPARTY_ID.to_string())
        } else {
            (AMM_COUNTERPARTY_ID.to_string(), order.user_id.clone())
        };
        fills.push(Fill {
            trade_id,
            buyer,
            seller,
            outcome: order.outcome,
            side,
            price: quote.post_price,
            size: remaining,
            fee,
            kind: FillKind::Amm,
            price_yes: None,
            price_no: None,
            tick_id,
            ts_ms: t_now_ms,
        });

        if params.af_enabled && !diversions.is_empty() {
            // Auto-fill walks the whole state, so the trade counter rides
            // alongside instead of staying borrowed.
            let mut seq = scratch.next_trade_seq;
            let (af_fills, details) = autofill::trigger_auto_fills(
                &mut scratch,
                order.outcome,
                &diversions,
                eff,
                params,
                tick_id,
                t_now_ms,
                &mut seq,
            )?;
            scratch.next_trade_seq = seq;
            fills.extend(af_fills);
            auto_fill_details = details;
        }
    }

    Ok(MarketResult::Committed {
        state: scratch,
        fills,
        auto_fill_details,
    })
}
