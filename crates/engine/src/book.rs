//! Tick-quantized limit order book: pooled resting orders, YES/NO
//! cross-matching, and the LOB leg of market orders.
//!
//! Orders at the same `(side, direction, tick, opt_in)` share one pool with
//! pro-rata ownership. BUY pools escrow collateral (`volume = sum of
//! share * tick_price`); SELL pools escrow tokens (`volume = sum of
//! shares`). Pools appear lazily and are deleted when empty.

use std::collections::BTreeMap;
use std::fmt;

use omx_numeric::{Amount, NumericError, Price};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;
use crate::state::BinaryState;
use crate::types::{
    Fill, FillKind, Side, NO_POOL_COUNTERPARTY_ID, YES_POOL_COUNTERPARTY_ID,
};

// =============================================================================
// Pool key
// =============================================================================

/// Key of one pool within a `(side, direction)` map: the tick, with the sign
/// bit carrying the auto-fill opt-in flag.
///
/// Positive keys are opt-in pools, negative keys are not. Tick zero is never
/// valid (limit prices are bounded below by `p_min > 0`), so the encoding is
/// unambiguous. On the wire the key is the decimal string of the signed
/// integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolKey(i32);

impl PoolKey {
    /// Builds a key from a tick (> 0) and the opt-in flag.
    #[must_use]
    pub fn new(tick: u32, opt_in: bool) -> Self {
        let raw = tick as i32;
        Self(if opt_in { raw } else { -raw })
    }

    /// The price tick, ignoring the opt-in sign.
    #[must_use]
    pub fn tick(self) -> u32 {
        self.0.unsigned_abs()
    }

    /// Whether orders in this pool opted into auto-filling.
    #[must_use]
    pub fn opt_in(self) -> bool {
        self.0 > 0
    }

    /// Tick price at the given granularity.
    #[must_use]
    pub fn price(self, tick_size: Price) -> Price {
        Price::from_raw((self.tick() as i64).saturating_mul(tick_size.raw()))
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for PoolKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

struct PoolKeyVisitor;

impl Visitor<'_> for PoolKeyVisitor {
    type Value = PoolKey;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a signed tick as a decimal string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<PoolKey, E> {
        v.parse::<i32>()
            .map(PoolKey)
            .map_err(|_| E::custom(format!("invalid pool key: {v}")))
    }
}

impl<'de> Deserialize<'de> for PoolKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(PoolKeyVisitor)
    }
}

// =============================================================================
// Pools
// =============================================================================

/// One resting pool: committed volume plus per-user shares in tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobPool {
    /// Committed collateral (BUY pools) or tokens (SELL pools).
    pub volume: Amount,
    /// Per-user shares, always in tokens.
    pub shares: BTreeMap<String, Amount>,
}

impl LobPool {
    /// Total token shares in the pool.
    #[must_use]
    pub fn total_shares(&self) -> Amount {
        self.shares
            .values()
            .fold(Amount::ZERO, |acc, s| acc + *s)
    }

    /// Recomputes `volume` from the shares so the pool-volume invariant
    /// holds exactly after pro-rata scaling.
    pub(crate) fn recompute_volume(
        &mut self,
        is_buy: bool,
        tick_price: Price,
    ) -> Result<(), NumericError> {
        let mut total = Amount::ZERO;
        for share in self.shares.values() {
            let contribution = if is_buy {
                share.mul_price(tick_price)?
            } else {
                *share
            };
            total += contribution;
        }
        self.volume = total;
        Ok(())
    }

    /// Scales every share by `numerator / denominator`, drops dust, and
    /// recomputes the volume.
    pub(crate) fn scale_shares(
        &mut self,
        numerator: Amount,
        denominator: Amount,
        is_buy: bool,
        tick_price: Price,
    ) -> Result<(), NumericError> {
        if !numerator.is_positive() {
            self.shares.clear();
            self.volume = Amount::ZERO;
            return Ok(());
        }
        for share in self.shares.values_mut() {
            *share = share.mul_div(numerator, denominator)?;
        }
        self.shares.retain(|_, s| s.is_positive());
        self.recompute_volume(is_buy, tick_price)
    }
}

/// Pools of one side, split by direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionPools {
    /// Resting bids, keyed by signed tick.
    pub buy: BTreeMap<PoolKey, LobPool>,
    /// Resting asks, keyed by signed tick.
    pub sell: BTreeMap<PoolKey, LobPool>,
}

impl DirectionPools {
    fn map(&self, is_buy: bool) -> &BTreeMap<PoolKey, LobPool> {
        if is_buy {
            &self.buy
        } else {
            &self.sell
        }
    }

    fn map_mut(&mut self, is_buy: bool) -> &mut BTreeMap<PoolKey, LobPool> {
        if is_buy {
            &mut self.buy
        } else {
            &mut self.sell
        }
    }
}

/// All resting pools of one binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobPools {
    /// YES-token pools.
    pub yes: DirectionPools,
    /// NO-token pools.
    pub no: DirectionPools,
}

impl LobPools {
    /// Pools for the given token side.
    #[must_use]
    pub fn side(&self, side: Side) -> &DirectionPools {
        match side {
            Side::Yes => &self.yes,
            Side::No => &self.no,
        }
    }

    /// Mutable pools for the given token side.
    pub fn side_mut(&mut self, side: Side) -> &mut DirectionPools {
        match side {
            Side::Yes => &mut self.yes,
            Side::No => &mut self.no,
        }
    }

    /// True when no pool is resting on this binary.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.yes.buy.is_empty()
            && self.yes.sell.is_empty()
            && self.no.buy.is_empty()
            && self.no.sell.is_empty()
    }

    /// Removes and returns every pool, for resolution-time cancellation.
    pub fn drain_all(&mut self) -> Vec<(Side, bool, PoolKey, LobPool)> {
        let mut drained = Vec::new();
        for side in [Side::Yes, Side::No] {
            for is_buy in [true, false] {
                let map = self.side_mut(side).map_mut(is_buy);
                let keys: Vec<PoolKey> = map.keys().copied().collect();
                for key in keys {
                    if let Some(pool) = map.remove(&key) {
                        drained.push((side, is_buy, key, pool));
                    }
                }
            }
        }
        drained
    }

    /// Validates pool invariants: positive ticks, positive shares, and the
    /// volume identity per direction.
    ///
    /// # Errors
    /// Returns [`EngineError::Invariant`] on the first violated pool.
    pub fn validate(&self, outcome: usize, tick_size: Price) -> Result<(), EngineError> {
        for side in [Side::Yes, Side::No] {
            for is_buy in [true, false] {
                for (key, pool) in self.side(side).map(is_buy) {
                    if key.tick() == 0 {
                        return Err(EngineError::invariant(format!(
                            "pool with zero tick on outcome {outcome}"
                        )));
                    }
                    if pool.shares.is_empty() || !pool.volume.is_positive() {
                        return Err(EngineError::invariant(format!(
                            "empty pool retained at {side} {key} on outcome {outcome}"
                        )));
                    }
                    if pool.shares.values().any(|s| !s.is_positive()) {
                        return Err(EngineError::invariant(format!(
                            "non-positive share at {side} {key} on outcome {outcome}"
                        )));
                    }
                    let mut expected = Amount::ZERO;
                    for share in pool.shares.values() {
                        let contribution = if is_buy {
                            share.mul_price(key.price(tick_size))?
                        } else {
                            *share
                        };
                        expected += contribution;
                    }
                    if expected != pool.volume {
                        return Err(EngineError::invariant(format!(
                            "pool volume mismatch at {side} {key} on outcome {outcome}: \
                             {} != {expected}",
                            pool.volume
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Pool operations
// =============================================================================

/// Adds a resting LIMIT order to its pool, creating the pool lazily.
///
/// # Errors
/// Propagates arithmetic overflow.
pub fn add_to_pool(
    binary: &mut BinaryState,
    side: Side,
    is_buy: bool,
    tick: u32,
    opt_in: bool,
    user: &str,
    size: Amount,
    tick_size: Price,
) -> Result<(), EngineError> {
    let key = PoolKey::new(tick, opt_in);
    let pool = binary
        .lob_pools
        .side_mut(side)
        .map_mut(is_buy)
        .entry(key)
        .or_default();
    let share = pool.shares.entry(user.to_string()).or_insert(Amount::ZERO);
    *share += size;
    pool.recompute_volume(is_buy, key.price(tick_size))
        .map_err(EngineError::from)
}

/// Withdraws a user's remaining share from a pool.
///
/// Returns the refund: committed collateral for BUY pools, tokens for SELL
/// pools. Returns zero when the user has no share. The pool is deleted when
/// it empties.
///
/// # Errors
/// Propagates arithmetic overflow.
pub fn cancel_from_pool(
    binary: &mut BinaryState,
    side: Side,
    is_buy: bool,
    tick: u32,
    opt_in: bool,
    user: &str,
    tick_size: Price,
) -> Result<Amount, EngineError> {
    let key = PoolKey::new(tick, opt_in);
    let map = binary.lob_pools.side_mut(side).map_mut(is_buy);
    let Some(pool) = map.get_mut(&key) else {
        return Ok(Amount::ZERO);
    };
    let Some(share) = pool.shares.remove(user) else {
        return Ok(Amount::ZERO);
    };
    let refund = if is_buy {
        share.mul_price(key.price(tick_size))?
    } else {
        share
    };
    pool.recompute_volume(is_buy, key.price(tick_size))?;
    if pool.shares.is_empty() || !pool.volume.is_positive() {
        map.remove(&key);
    }
    Ok(refund)
}

/// Distributes `fill` tokens across pool users pro rata by share, assigning
/// the rounding residual to the lexicographically last holder so the total
/// is exact.
pub(crate) fn pro_rata_fills(
    pool: &LobPool,
    fill: Amount,
) -> Result<Vec<(String, Amount)>, NumericError> {
    let total = pool.total_shares();
    let mut out = Vec::with_capacity(pool.shares.len());
    let mut assigned = Amount::ZERO;
    let last = pool.shares.keys().next_back().cloned();
    for (user, share) in &pool.shares {
        let portion = if Some(user) == last.as_ref() {
            fill - assigned
        } else {
            fill.mul_div(*share, total)?
        };
        assigned += portion;
        if portion.is_positive() {
            out.push((user.clone(), portion));
        }
    }
    Ok(out)
}

/// Cross-matches YES buy pools against NO sell pools inside one binary.
///
/// A YES bid at tick `T` pairs with a NO ask at tick `S` when
/// `T + S >= 1 + f_match * (T + S) / 2` (all in price units). The buyer pays
/// exactly `T`, the seller receives exactly `S`, the fee is charged
/// separately, and one YES/NO token pair is minted per filled unit:
/// `V += (T + S) * fill - fee`.
///
/// Returns the CROSS fills in deterministic order (YES ticks descending,
/// complementary NO ticks ascending).
///
/// # Errors
/// Propagates arithmetic overflow.
#[allow(clippy::too_many_arguments)]
pub fn cross_match_binary(
    binary: &mut BinaryState,
    f_match: Amount,
    tick_size: Price,
    tick_id: u64,
    ts_ms: u64,
    next_trade: &mut u64,
) -> Result<Vec<Fill>, EngineError> {
    let mut fills = Vec::new();

    // Snapshot key lists up front; volumes drain as matches land.
    let mut yes_keys: Vec<PoolKey> = binary.lob_pools.yes.buy.keys().copied().collect();
    yes_keys.sort_by(|a, b| b.tick().cmp(&a.tick()).then(a.0.cmp(&b.0)));

    for yes_key in yes_keys {
        let price_yes = yes_key.price(tick_size);
        // Lowest complementary NO tick that can clear $1.
        let min_no_tick = {
            let gap = Price::ONE.raw() - price_yes.raw();
            let ts = tick_size.raw();
            ((gap + ts - 1) / ts).max(1)
        };

        let mut no_keys: Vec<PoolKey> = binary
            .lob_pools
            .no
            .sell
            .keys()
            .copied()
            .filter(|k| k.tick() as i64 >= min_no_tick)
            .collect();
        no_keys.sort_by(|a, b| a.tick().cmp(&b.tick()).then(a.0.cmp(&b.0)));

        for no_key in no_keys {
            let price_no = no_key.price(tick_size);
            let sum = price_yes + price_no;
            // Clearing condition: T + S >= 1 + f_match * (T + S) / 2.
            let half_fee = sum
                .to_ratio()
                .mul_ratio(f_match)?
                .mul_ratio(Amount::from_raw(500_000))?;
            if sum.to_ratio() < Amount::ONE + half_fee {
                continue;
            }

            let (yes_volume, no_volume) = {
                let yes_pool = match binary.lob_pools.yes.buy.get(&yes_key) {
                    Some(p) => p,
                    None => break,
                };
                let no_pool = match binary.lob_pools.no.sell.get(&no_key) {
                    Some(p) => p,
                    None => continue,
                };
                (yes_pool.volume, no_pool.volume)
            };
            let yes_capacity = yes_volume.div_price_floor(price_yes)?;
            let fill = yes_capacity.min(no_volume);
            if !fill.is_positive() {
                continue;
            }

            let gross = fill.mul_price(price_yes)? + fill.mul_price(price_no)?;
            let fee = gross.mul_ratio(f_match)?.mul_ratio(Amount::from_raw(500_000))?;

            binary.v += gross - fee;
            binary.q_yes += fill;
            binary.q_no += fill;

            let yes_consumed = fill.mul_price(price_yes)?;
            if let Some(pool) = binary.lob_pools.yes.buy.get_mut(&yes_key) {
                let remaining = pool.volume - yes_consumed;
                pool.scale_shares(remaining, yes_volume, true, price_yes)?;
                if pool.shares.is_empty() {
                    binary.lob_pools.yes.buy.remove(&yes_key);
                }
            }
            if let Some(pool) = binary.lob_pools.no.sell.get_mut(&no_key) {
                let remaining = pool.volume - fill;
                pool.scale_shares(remaining, no_volume, false, price_no)?;
                if pool.shares.is_empty() {
                    binary.lob_pools.no.sell.remove(&no_key);
                }
            }

            let trade_id = *next_trade;
            *next_trade += 1;
            fills.push(Fill {
                trade_id,
                buyer: YES_POOL_COUNTERPARTY_ID.to_string(),
                seller: NO_POOL_COUNTERPARTY_ID.to_string(),
                outcome: binary.outcome,
                side: Side::Yes,
                price: price_yes,
                size: fill,
                fee,
                kind: FillKind::Cross,
                price_yes: Some(price_yes),
                price_no: Some(price_no),
                tick_id,
                ts_ms,
            });

            if binary.lob_pools.yes.buy.get(&yes_key).is_none() {
                break;
            }
        }
    }

    Ok(fills)
}

/// Walks opposing pools for a market order's LOB leg: buys take asks in
/// ascending tick order, sells hit bids in descending tick order, always at
/// the pool's tick price. Emits one fill per pool user (pro rata).
///
/// Token supply updates for this leg happen in the order pipeline at commit
/// time, not here.
///
/// Returns the fills and the unfilled remainder.
///
/// # Errors
/// Propagates arithmetic overflow.
#[allow(clippy::too_many_arguments)]
pub fn match_market_order(
    binary: &mut BinaryState,
    side: Side,
    is_buy: bool,
    size: Amount,
    fee_rate: Amount,
    tick_size: Price,
    taker: &str,
    tick_id: u64,
    ts_ms: u64,
    next_trade: &mut u64,
) -> Result<(Vec<Fill>, Amount), EngineError> {
    let mut fills = Vec::new();
    let mut remaining = size;

    let opposing_is_buy = !is_buy;
    let mut keys: Vec<PoolKey> = binary
        .lob_pools
        .side(side)
        .map(opposing_is_buy)
        .keys()
        .copied()
        .collect();
    if is_buy {
        keys.sort_by(|a, b| a.tick().cmp(&b.tick()).then(a.0.cmp(&b.0)));
    } else {
        keys.sort_by(|a, b| b.tick().cmp(&a.tick()).then(a.0.cmp(&b.0)));
    }

    for key in keys {
        if !remaining.is_positive() {
            break;
        }
        let price = key.price(tick_size);
        let map = binary.lob_pools.side_mut(side).map_mut(opposing_is_buy);
        let Some(pool) = map.get_mut(&key) else {
            continue;
        };

        // SELL pools hold tokens; BUY pools hold collateral.
        let capacity = if opposing_is_buy {
            pool.volume.div_price_floor(price)?
        } else {
            pool.volume
        };
        let fill = remaining.min(capacity);
        if !fill.is_positive() {
            continue;
        }

        for (user, user_fill) in pro_rata_fills(pool, fill)? {
            let fee = user_fill.mul_price(price)?.mul_ratio(fee_rate)?;
            let trade_id = *next_trade;
            *next_trade += 1;
            let (buyer, seller) = if is_buy {
                (taker.to_string(), user)
            } else {
                (user, taker.to_string())
            };
            fills.push(Fill {
                trade_id,
                buyer,
                seller,
                outcome: binary.outcome,
                side,
                price,
                size: user_fill,
                fee,
                kind: FillKind::Lob,
                price_yes: None,
                price_no: None,
                tick_id,
                ts_ms,
            });
        }

        let old_volume = pool.volume;
        let consumed = if opposing_is_buy {
            fill.mul_price(price)?
        } else {
            fill
        };
        let new_volume = old_volume - consumed;
        pool.scale_shares(new_volume, old_volume, opposing_is_buy, price)?;
        if pool.shares.is_empty() {
            map.remove(&key);
        }
        remaining -= fill;
    }

    Ok((fills, remaining))
}
