//! Engine state: per-binary fields, the global renormalization anchor, and
//! the invariant checks enforced at every mutation boundary.
//!
//! The engine is the exclusive owner of [`EngineState`]. Callers pass it in
//! by mutable reference; on any fatal error the state is left observationally
//! equal to entry because all mutation happens on a working copy that is only
//! swapped in on success.

use omx_numeric::{Amount, Price};
use serde::{Deserialize, Serialize};

use crate::book::LobPools;
use crate::error::EngineError;
use crate::params::EngineParams;

/// One binary sub-market ("outcome i wins: YES / NO").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryState {
    /// Outcome index.
    pub outcome: usize,
    /// User-contributed collateral. Starts at zero; sign follows net trade
    /// direction.
    pub v: Amount,
    /// Market-maker subsidy: `max(0, Z/N - gamma * V)`.
    pub subsidy: Amount,
    /// Effective pool `L = V + subsidy`. Strictly positive while active.
    pub liquidity: Amount,
    /// Circulating YES supply including the q0 seed.
    pub q_yes: Amount,
    /// Circulating NO supply including the q0 seed.
    pub q_no: Amount,
    /// Renormalization addend; affects pricing only, never redeemable.
    pub virtual_yes: Amount,
    /// Accumulated auto-fill surplus captured by the system (already
    /// mirrored into `v`; reported for accounting).
    pub seigniorage: Amount,
    /// False once eliminated. Eliminated binaries are never re-traded.
    pub active: bool,
    /// Resting limit-order pools.
    pub lob_pools: LobPools,
}

impl BinaryState {
    /// Effective YES supply used for pricing: `q_yes + virtual_yes`.
    #[must_use]
    pub fn q_yes_eff(&self) -> Amount {
        self.q_yes + self.virtual_yes
    }

    /// Supply of the given side as used for pricing.
    #[must_use]
    pub fn pricing_supply(&self, side: crate::types::Side) -> Amount {
        match side {
            crate::types::Side::Yes => self.q_yes_eff(),
            crate::types::Side::No => self.q_no,
        }
    }

    /// YES price `q_yes_eff / L` at 4 dp.
    ///
    /// # Errors
    /// Fails if `L` is zero (only possible on a drained inactive binary).
    pub fn p_yes(&self) -> Result<Price, EngineError> {
        Price::ratio_of(self.q_yes_eff(), self.liquidity).map_err(EngineError::from)
    }

    /// NO price `q_no / L` at 4 dp.
    ///
    /// # Errors
    /// Fails if `L` is zero.
    pub fn p_no(&self) -> Result<Price, EngineError> {
        Price::ratio_of(self.q_no, self.liquidity).map_err(EngineError::from)
    }

    /// Price of the given side at 4 dp.
    ///
    /// # Errors
    /// Fails if `L` is zero.
    pub fn price(&self, side: crate::types::Side) -> Result<Price, EngineError> {
        match side {
            crate::types::Side::Yes => self.p_yes(),
            crate::types::Side::No => self.p_no(),
        }
    }

    /// Side price as a 10^6-scaled ratio, for internal math that must not
    /// lose the last two digits.
    ///
    /// # Errors
    /// Fails if `L` is zero.
    pub fn price_hi(&self, side: crate::types::Side) -> Result<Amount, EngineError> {
        self.pricing_supply(side)
            .ratio_of(self.liquidity)
            .map_err(EngineError::from)
    }
}

/// Read-only per-binary report for host dashboards and tick summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySnapshot {
    /// Outcome index.
    pub outcome: usize,
    /// True until eliminated.
    pub active: bool,
    /// YES price, zero once drained.
    pub p_yes: Price,
    /// NO price, zero once drained.
    pub p_no: Price,
    /// Effective pool.
    pub liquidity: Amount,
    /// User-contributed collateral.
    pub v: Amount,
    /// Market-maker subsidy.
    pub subsidy: Amount,
    /// Captured auto-fill surplus.
    pub seigniorage: Amount,
}

/// The complete market state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    /// One binary per outcome, indexed by `outcome`.
    pub binaries: Vec<BinaryState>,
    /// Sum of YES prices over active binaries, snapshotted at the start of a
    /// resolution round and zeroed once consumed.
    pub pre_sum_yes: Price,
    /// Batch counter; stamped on fills as `tick_id`.
    pub batch_seq: u64,
    /// Monotonic trade-id counter.
    pub next_trade_seq: u64,
    /// Interpolation anchor for `Reset` mode; `None` while waiting for the
    /// first batch after a round.
    pub round_anchor_ms: Option<u64>,
    /// Completed intermediate rounds.
    pub rounds_completed: u32,
    /// Outcomes eliminated so far.
    pub eliminated_total: u32,
}

impl EngineState {
    /// Initializes a fresh market from validated parameters.
    ///
    /// Each binary starts with `V = 0`, `subsidy = L = Z/N` and both token
    /// supplies seeded at `q0`, so the initial price per side is
    /// `q0 / (Z/N)`.
    ///
    /// # Errors
    /// Fails if the parameters do not validate.
    pub fn init(params: &EngineParams) -> Result<Self, EngineError> {
        params.validate()?;
        let subsidy = params
            .z
            .mul_div(Amount::ONE, Amount::from_units(params.n_outcomes as i64))?;
        let binaries = (0..params.n_outcomes)
            .map(|outcome| BinaryState {
                outcome,
                v: Amount::ZERO,
                subsidy,
                liquidity: subsidy,
                q_yes: params.q0,
                q_no: params.q0,
                virtual_yes: Amount::ZERO,
                seigniorage: Amount::ZERO,
                active: true,
                lob_pools: LobPools::default(),
            })
            .collect();
        Ok(Self {
            binaries,
            pre_sum_yes: Price::ZERO,
            batch_seq: 0,
            next_trade_seq: 1,
            round_anchor_ms: None,
            rounds_completed: 0,
            eliminated_total: 0,
        })
    }

    /// Looks up a binary by outcome index.
    #[must_use]
    pub fn binary(&self, outcome: usize) -> Option<&BinaryState> {
        self.binaries.get(outcome)
    }

    /// Mutable lookup by outcome index.
    #[must_use]
    pub fn binary_mut(&mut self, outcome: usize) -> Option<&mut BinaryState> {
        self.binaries.get_mut(outcome)
    }

    /// Number of still-active binaries.
    #[must_use]
    pub fn n_active(&self) -> usize {
        self.binaries.iter().filter(|b| b.active).count()
    }

    /// Active outcome indices in ascending order.
    #[must_use]
    pub fn active_outcomes(&self) -> Vec<usize> {
        self.binaries
            .iter()
            .filter(|b| b.active)
            .map(|b| b.outcome)
            .collect()
    }

    /// Recomputes `subsidy_i = clamp(Z/N - gamma * V_i, 0, Z/N)` and
    /// `L_i = V_i + subsidy_i` for every active binary.
    ///
    /// The upper clamp keeps the maker's total exposure bounded by Z even
    /// when net selling drives `V_i` below zero; in the `V_i >= 0` regime
    /// it is the plain phase-out `max(0, Z/N - gamma * V_i)`.
    ///
    /// # Errors
    /// Propagates arithmetic overflow.
    pub fn recompute_subsidies(&mut self, params: &EngineParams) -> Result<(), EngineError> {
        let base = params
            .z
            .mul_div(Amount::ONE, Amount::from_units(params.n_outcomes as i64))?;
        for binary in self.binaries.iter_mut().filter(|b| b.active) {
            let phase_out = binary.v.mul_ratio(params.gamma)?;
            binary.subsidy = (base - phase_out).max(Amount::ZERO).min(base);
            binary.liquidity = binary.v + binary.subsidy;
        }
        Ok(())
    }

    /// Validates every state invariant. Called on entry and exit of
    /// `apply_orders` and at mutation boundaries inside the pipeline; any
    /// failure is a fatal internal error.
    ///
    /// # Errors
    /// Returns [`EngineError::Invariant`] naming the first violated check.
    pub fn validate(&self, params: &EngineParams) -> Result<(), EngineError> {
        if self.binaries.len() != params.n_outcomes {
            return Err(EngineError::invariant(format!(
                "binary count {} != n_outcomes {}",
                self.binaries.len(),
                params.n_outcomes
            )));
        }
        let p_max_ratio = params.p_max.to_ratio();
        let mut subsidy_total = Amount::ZERO;
        for binary in &self.binaries {
            if binary.outcome >= params.n_outcomes {
                return Err(EngineError::invariant(format!(
                    "outcome {} out of range",
                    binary.outcome
                )));
            }
            binary.lob_pools.validate(binary.outcome, params.tick_size)?;
            if !binary.active {
                continue;
            }
            let i = binary.outcome;
            if !binary.liquidity.is_positive() {
                return Err(EngineError::invariant(format!("L[{i}] must be > 0")));
            }
            if binary.liquidity != binary.v + binary.subsidy {
                return Err(EngineError::invariant(format!(
                    "L[{i}] != V[{i}] + subsidy[{i}]"
                )));
            }
            if params.vc_enabled && binary.virtual_yes.is_negative() {
                return Err(EngineError::invariant(format!(
                    "virtual_yes[{i}] must be >= 0"
                )));
            }
            if binary.q_no.is_negative() || binary.q_yes.is_negative() {
                return Err(EngineError::invariant(format!(
                    "token supply on outcome {i} went negative"
                )));
            }
            let cap = binary.liquidity.mul_ratio(p_max_ratio)?;
            if binary.q_yes_eff() > cap {
                return Err(EngineError::invariant(format!(
                    "p_yes[{i}] above p_max: q_yes_eff {} > {}",
                    binary.q_yes_eff(),
                    cap
                )));
            }
            if binary.q_no > cap {
                return Err(EngineError::invariant(format!(
                    "p_no[{i}] above p_max: q_no {} > {}",
                    binary.q_no, cap
                )));
            }
            let two_l = binary.liquidity + binary.liquidity;
            if binary.q_yes_eff() + binary.q_no >= two_l {
                return Err(EngineError::invariant(format!(
                    "solvency on outcome {i}: q_yes_eff + q_no >= 2L"
                )));
            }
            subsidy_total += binary.subsidy;
        }
        if subsidy_total > params.z {
            return Err(EngineError::invariant(format!(
                "total subsidy {subsidy_total} exceeds Z {}",
                params.z
            )));
        }
        Ok(())
    }

    /// Canonical JSON blob for the host's store. Deterministic: map keys are
    /// sorted, fixed-point values are scaled-integer strings, and
    /// round-tripping is bitwise idempotent.
    ///
    /// # Errors
    /// Fails only if the state contains non-serializable values, which the
    /// type system rules out in practice.
    pub fn to_blob(&self) -> Result<String, EngineError> {
        serde_json::to_string(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// Decodes a state blob produced by [`Self::to_blob`].
    ///
    /// # Errors
    /// Returns [`EngineError::Serialization`] on malformed input.
    pub fn from_blob(blob: &str) -> Result<Self, EngineError> {
        serde_json::from_str(blob).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// Read-only per-binary report (prices, pools, captured surplus).
    #[must_use]
    pub fn market_snapshot(&self) -> Vec<BinarySnapshot> {
        self.binaries
            .iter()
            .map(|b| BinarySnapshot {
                outcome: b.outcome,
                active: b.active,
                p_yes: b.p_yes().unwrap_or(Price::ZERO),
                p_no: b.p_no().unwrap_or(Price::ZERO),
                liquidity: b.liquidity,
                v: b.v,
                subsidy: b.subsidy,
                seigniorage: b.seigniorage,
            })
            .collect()
    }
}
