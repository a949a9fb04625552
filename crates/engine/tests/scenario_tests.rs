//! End-to-end scenarios through the public API.
//!
//! Parameters mirror the common setup: N=3, Z=10000, gamma=0.0001, q0 chosen
//! so the initial price per side is 0.5, mu=nu=1, kappa=0.001, zeta=0.1,
//! f=0.01, f_match=0.005, p_max=0.99, p_min=0.01, eta=2, tick 0.01, all
//! toggles enabled.

use omx_engine::{
    apply_orders, EngineParams, EngineState, EventKind, Fill, FillKind, Order, OrderKind,
    RejectReason, ResolutionMode, Side, Tunable,
};
use omx_numeric::{amt, px, Amount, Price};
use std::collections::BTreeMap;

fn scenario_params() -> EngineParams {
    let mut params = EngineParams::default();
    params.z = Amount::from_units(10_000);
    params.q0 = Amount::from_raw(1_666_666_667);
    params.mu = Tunable::fixed(Amount::ONE);
    params.nu = Tunable::fixed(Amount::ONE);
    params.kappa = Tunable::fixed(amt!(0.001));
    params.zeta = Tunable::fixed(amt!(0.1));
    params.mr_enabled = true;
    params.res_schedule = vec![1, 1];
    params
}

fn market(id: &str, user: &str, outcome: usize, side: Side, is_buy: bool, size: Amount) -> Order {
    Order {
        order_id: id.to_string(),
        user_id: user.to_string(),
        outcome,
        side,
        kind: OrderKind::Market,
        is_buy,
        size,
        limit_price: None,
        max_slippage: None,
        af_opt_in: false,
        ts_ms: 0,
    }
}

fn limit(
    id: &str,
    user: &str,
    outcome: usize,
    side: Side,
    is_buy: bool,
    size: Amount,
    price: Price,
    af_opt_in: bool,
) -> Order {
    Order {
        order_id: id.to_string(),
        user_id: user.to_string(),
        outcome,
        side,
        kind: OrderKind::Limit,
        is_buy,
        size,
        limit_price: Some(price),
        max_slippage: None,
        af_opt_in,
        ts_ms: 0,
    }
}

// =============================================================================
// Market BUY YES, no slippage cap
// =============================================================================

#[test]
fn market_buy_yes_single_amm_fill() {
    let params = scenario_params();
    let mut state = EngineState::init(&params).unwrap();

    let order = market("o1", "alice", 0, Side::Yes, true, amt!(100));
    let outcome = apply_orders(&mut state, &[order], &params, 0).unwrap();

    assert_eq!(outcome.fills.len(), 1);
    let fill = &outcome.fills[0];
    assert_eq!(fill.kind, FillKind::Amm);
    assert_eq!(fill.size, amt!(100));
    assert!(fill.price >= px!(0.5) && fill.price <= px!(0.6), "price {}", fill.price);
    assert_eq!(
        fill.fee,
        fill.size
            .mul_price(fill.price)
            .unwrap()
            .mul_ratio(params.fee)
            .unwrap()
    );

    // V_1 rises by f_i * X, the others by zeta * X each; with
    // f_i = 0.8 and zeta = 0.1 the own share is eight times the diverted.
    let own = state.binaries[0].v;
    let diverted = state.binaries[1].v;
    assert!(own.is_positive() && diverted.is_positive());
    assert_eq!(state.binaries[2].v, diverted);
    let ratio = own.ratio_of(diverted).unwrap();
    assert!(ratio > amt!(7.99) && ratio < amt!(8.01), "own/diverted {ratio}");

    assert!(state.binaries[0].p_yes().unwrap() > px!(0.5));
    assert!(state.binaries[0].p_no().unwrap() < px!(0.5));
    assert!(state.binaries[1].p_yes().unwrap() < px!(0.5));
    assert!(state.binaries[2].p_yes().unwrap() < px!(0.5));
    state.validate(&params).unwrap();
}

// =============================================================================
// Oversized buy is penalized, never rejected
// =============================================================================

#[test]
fn oversized_buy_penalized_not_rejected() {
    let params = scenario_params();
    let mut state = EngineState::init(&params).unwrap();

    let order = market("o1", "whale", 0, Side::Yes, true, Amount::from_units(100_000));
    let outcome = apply_orders(&mut state, &[order], &params, 0).unwrap();

    assert_eq!(outcome.fills.len(), 1);
    assert!(outcome
        .events
        .iter()
        .all(|e| !matches!(e.kind, EventKind::OrderRejected { .. })));
    assert!(state.binaries[0].p_yes().unwrap() <= params.p_max);
    // Cost far exceeds 50000: the own-retained share alone clears 40000.
    assert!(state.binaries[0].v > Amount::from_units(40_000));
    state.validate(&params).unwrap();
}

// =============================================================================
// Tight slippage cap rejects without touching state
// =============================================================================

#[test]
fn tight_slippage_rejects() {
    let params = scenario_params();
    let mut state = EngineState::init(&params).unwrap();
    let before = state.to_blob().unwrap();

    let mut order = market("o1", "alice", 0, Side::Yes, true, amt!(100));
    order.max_slippage = Some(amt!(0.001));
    let outcome = apply_orders(&mut state, &[order], &params, 0).unwrap();

    assert!(outcome.fills.is_empty());
    assert_eq!(outcome.events.len(), 1);
    assert!(matches!(
        outcome.events[0].kind,
        EventKind::OrderRejected {
            reason: RejectReason::SlippageExceeded,
            ..
        }
    ));
    // Binaries unchanged; only the batch counter advanced.
    let after = EngineState::from_blob(&state.to_blob().unwrap()).unwrap();
    let restored = EngineState::from_blob(&before).unwrap();
    assert_eq!(after.binaries, restored.binaries);
}

// =============================================================================
// Cross-match clears the YES/NO overlap
// =============================================================================

#[test]
fn cross_match_clears_overlap() {
    let params = scenario_params();
    let mut state = EngineState::init(&params).unwrap();
    let v_before = state.binaries[0].v;
    let q_yes_before = state.binaries[0].q_yes;
    let q_no_before = state.binaries[0].q_no;

    // User A bids 100 YES at 0.55; user B asks 80 NO at 0.50. The pair sums
    // to 1.05, clearing $1 plus the match-fee margin.
    let mut bid = limit("a1", "alice", 0, Side::Yes, true, amt!(100), px!(0.55), false);
    bid.ts_ms = 1;
    let mut ask = limit("b1", "bob", 0, Side::No, false, amt!(80), px!(0.50), false);
    ask.ts_ms = 2;
    let outcome = apply_orders(&mut state, &[bid, ask], &params, 10).unwrap();

    let cross: Vec<&Fill> = outcome
        .fills
        .iter()
        .filter(|f| f.kind == FillKind::Cross)
        .collect();
    assert_eq!(cross.len(), 1);
    let fill = cross[0];
    assert_eq!(fill.size, amt!(80));
    assert_eq!(fill.price_yes, Some(px!(0.55)));
    assert_eq!(fill.price_no, Some(px!(0.50)));
    // fee = 0.005 * (0.55 + 0.50) * 80 / 2
    assert_eq!(fill.fee, amt!(0.21));

    assert_eq!(state.binaries[0].v - v_before, amt!(83.79));
    assert_eq!(state.binaries[0].q_yes - q_yes_before, amt!(80));
    assert_eq!(state.binaries[0].q_no - q_no_before, amt!(80));

    // 20 of A's 100 still rest in the book at 0.55.
    let pools = &state.binaries[0].lob_pools.yes.buy;
    let (_, pool) = pools.iter().next().unwrap();
    assert_eq!(pool.shares["alice"], amt!(20));
    assert!(state.binaries[0].lob_pools.no.sell.is_empty());
    state.validate(&params).unwrap();
}

// =============================================================================
// Cross-impact drift triggers an auto-fill
// =============================================================================

#[test]
fn auto_fill_triggered_by_cross_impact() {
    let params = scenario_params();
    let mut state = EngineState::init(&params).unwrap();

    // A rests an opt-in YES bid at 0.60 on outcome 1; B's big buy on
    // outcome 0 diverts collateral into outcome 1, dropping its price and
    // putting A's bid in the money.
    let mut bid = limit("a1", "alice", 1, Side::Yes, true, amt!(50), px!(0.60), true);
    bid.ts_ms = 1;
    let mut buy = market("b1", "bob", 0, Side::Yes, true, Amount::from_units(500));
    buy.ts_ms = 2;
    let outcome = apply_orders(&mut state, &[bid, buy], &params, 10).unwrap();

    let amm: Vec<&Fill> = outcome
        .fills
        .iter()
        .filter(|f| f.kind == FillKind::Amm)
        .collect();
    assert_eq!(amm.len(), 1);
    assert_eq!(amm[0].outcome, 0);

    let auto: Vec<&Fill> = outcome
        .fills
        .iter()
        .filter(|f| f.kind == FillKind::AutoFill)
        .collect();
    assert!(!auto.is_empty());
    assert_eq!(auto[0].outcome, 1);
    assert_eq!(auto[0].price, px!(0.60));

    let detail = outcome
        .events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::AutoFill(detail) => Some(detail),
            _ => None,
        })
        .expect("auto-fill event");
    assert!(detail.surplus.is_positive());
    // A receives tokens plus the (1 - sigma) surplus rebate.
    assert!(detail.position_deltas["alice"].is_positive());
    assert!(detail.balance_deltas["alice"].is_positive());
    // The sigma share is captured and mirrored into V.
    assert!(state.binaries[1].seigniorage.is_positive());

    // A's resting bid was partially consumed.
    let resting: Amount = state.binaries[1]
        .lob_pools
        .yes
        .buy
        .values()
        .map(|p| p.shares.get("alice").copied().unwrap_or(Amount::ZERO))
        .fold(Amount::ZERO, |acc, s| acc + s);
    assert!(resting < amt!(50));
    state.validate(&params).unwrap();
}

// =============================================================================
// Intermediate resolution renormalizes the YES price sum
// =============================================================================

#[test]
fn intermediate_resolution_preserves_price_sum() {
    let params = scenario_params();
    let mut state = EngineState::init(&params).unwrap();
    // Diverge prices to 0.6 / 0.5 / 0.45.
    state.binaries[0].q_yes = Amount::from_units(2_000);
    state.binaries[2].q_yes = Amount::from_units(1_500);
    let pre_sum = px!(0.6) + px!(0.5) + px!(0.45);

    let positions = |outcome: usize, side: Side| {
        let mut map = BTreeMap::new();
        if outcome == 2 && side == Side::No {
            map.insert("nohodler".to_string(), amt!(120));
        }
        map
    };

    let outcome = omx_engine::trigger_resolution(
        &mut state,
        &params,
        ResolutionMode::Intermediate { eliminated: vec![2] },
        positions,
    )
    .unwrap();

    assert_eq!(outcome.payouts["nohodler"], amt!(120));
    assert!(!state.binaries[2].active);

    let realized = state.binaries[0].p_yes().unwrap() + state.binaries[1].p_yes().unwrap();
    let drift = (realized.raw() - pre_sum.raw()).abs();
    assert!(drift <= 2, "realized {realized} vs snapshot {pre_sum}");
    state.validate(&params).unwrap();

    // Trading continues on the survivors; the eliminated binary rejects.
    let orders = vec![
        market("m1", "carol", 0, Side::Yes, true, amt!(10)),
        market("m2", "carol", 2, Side::Yes, true, amt!(10)),
    ];
    let batch = apply_orders(&mut state, &orders, &params, 60_000).unwrap();
    assert_eq!(batch.fills.len(), 1);
    assert!(batch.events.iter().any(|e| matches!(
        e.kind,
        EventKind::OrderRejected {
            reason: RejectReason::InactiveOutcome,
            ..
        }
    )));
}
