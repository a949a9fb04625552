//! Engine parameters: static tunables, validation, time interpolation.
//!
//! Four tunables (`mu`, `nu`, `kappa`, `zeta`) interpolate linearly over the
//! session (or over the current round when `interpolation_mode` is `Reset`
//! and multi-resolution is enabled). Everything else is static and validated
//! once per call.

use omx_numeric::{Amount, Price};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::events::EventKind;

/// How the interpolation clock behaves across resolution rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InterpolationMode {
    /// The clock restarts at the first batch after each round.
    Reset,
    /// The clock runs from session start regardless of rounds.
    Continue,
}

/// A linearly interpolated tunable with 10^6-scaled endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunable {
    /// Value at t = 0.
    pub start: Amount,
    /// Value at t >= total_duration.
    pub end: Amount,
}

impl Tunable {
    /// A tunable pinned to a constant value.
    #[must_use]
    pub const fn fixed(value: Amount) -> Self {
        Self {
            start: value,
            end: value,
        }
    }

    /// Effective value at `elapsed_ms` of a `duration_ms`-long ramp, with
    /// the fraction clamped to `[0, 1]`.
    #[must_use]
    pub fn at(&self, elapsed_ms: u64, duration_ms: u64) -> Amount {
        if elapsed_ms >= duration_ms || duration_ms == 0 {
            return self.end;
        }
        let span = self.end.raw_i128() - self.start.raw_i128();
        let delta = span * elapsed_ms as i128 / duration_ms as i128;
        Amount::from_raw(self.start.raw().saturating_add(delta as i64))
    }
}

/// Static and interpolated engine parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineParams {
    /// Number of mutually exclusive outcomes (3..=10).
    pub n_outcomes: usize,
    /// Host-facing outcome labels, one per outcome.
    pub outcome_names: Vec<String>,
    /// Total market-maker subsidy budget, > 0.
    pub z: Amount,
    /// Subsidy phase-out rate per unit of user collateral, in (0, 0.001].
    pub gamma: Amount,
    /// Initial virtual token seed per side, > 0 and < p_max * Z / N.
    pub q0: Amount,
    /// Trade fee fraction, in [0, 0.05).
    pub fee: Amount,
    /// Asymptotic upper price bound, in (0.5, 1).
    pub p_max: Price,
    /// Asymptotic lower price bound, in (0, 0.5).
    pub p_min: Price,
    /// Penalty exponent, >= 1.
    pub eta: u32,
    /// LOB price granularity, > 0.
    pub tick_size: Price,
    /// Cross-match fee fraction, in [0, 0.02).
    pub f_match: Amount,
    /// System share of auto-fill seigniorage, in [0, 1].
    pub sigma: Amount,
    /// Per-pool auto-fill size cap as a fraction of the diverted collateral.
    pub af_cap_frac: Amount,
    /// Maximum pools filled per trigger, across all binaries.
    pub af_max_pools: usize,
    /// Per-binary surplus cap as a fraction of the diverted collateral.
    pub af_max_surplus: Amount,
    /// Enables YES/NO cross-matching.
    pub cm_enabled: bool,
    /// Enables auto-filling of opt-in limit pools.
    pub af_enabled: bool,
    /// Enables intermediate (multi-round) resolutions.
    pub mr_enabled: bool,
    /// Clamps renormalization virtual supply at zero.
    pub vc_enabled: bool,
    /// Initial-price weight.
    pub mu: Tunable,
    /// New-price weight.
    pub nu: Tunable,
    /// Convexity term.
    pub kappa: Tunable,
    /// Cross-impact coupling.
    pub zeta: Tunable,
    /// Interpolation clock behavior.
    pub interpolation_mode: InterpolationMode,
    /// Outcomes eliminated per intermediate round; must sum to N - 1 when
    /// `mr_enabled`.
    pub res_schedule: Vec<u32>,
    /// Interpolation ramp length in milliseconds.
    pub total_duration_ms: u64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            n_outcomes: 3,
            outcome_names: vec![
                "Outcome A".to_string(),
                "Outcome B".to_string(),
                "Outcome C".to_string(),
            ],
            z: Amount::from_units(1_000),
            gamma: Amount::from_raw(100),         // 0.0001
            q0: Amount::from_raw(166_666_667),    // (Z/N)/2 so the initial price is 0.5
            fee: Amount::from_raw(10_000),        // 0.01
            p_max: Price::from_raw(9_900),        // 0.99
            p_min: Price::from_raw(100),          // 0.01
            eta: 2,
            tick_size: Price::from_raw(100),      // 0.01
            f_match: Amount::from_raw(5_000),     // 0.005
            sigma: Amount::from_raw(500_000),     // 0.5
            af_cap_frac: Amount::from_raw(100_000), // 0.1
            af_max_pools: 3,
            af_max_surplus: Amount::from_raw(50_000), // 0.05
            cm_enabled: true,
            af_enabled: true,
            mr_enabled: false,
            vc_enabled: true,
            mu: Tunable::fixed(Amount::from_units(2)),
            nu: Tunable::fixed(Amount::ONE),
            kappa: Tunable::fixed(Amount::ZERO),
            zeta: Tunable {
                start: Amount::from_raw(50_000), // 0.05
                end: Amount::ZERO,
            },
            interpolation_mode: InterpolationMode::Continue,
            res_schedule: Vec::new(),
            total_duration_ms: 3_600_000,
        }
    }
}

impl EngineParams {
    /// Validates every static range of the parameter set.
    ///
    /// # Errors
    /// Returns [`EngineError::Params`] naming the first offending field.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(3..=10).contains(&self.n_outcomes) {
            return Err(EngineError::params("n_outcomes", "must be in 3..=10"));
        }
        if self.outcome_names.len() != self.n_outcomes {
            return Err(EngineError::params(
                "outcome_names",
                "must have one label per outcome",
            ));
        }
        if !self.z.is_positive() {
            return Err(EngineError::params("z", "must be > 0"));
        }
        if !self.gamma.is_positive() || self.gamma > Amount::from_raw(1_000) {
            return Err(EngineError::params("gamma", "must be in (0, 0.001]"));
        }
        if self.fee.is_negative() || self.fee >= Amount::from_raw(50_000) {
            return Err(EngineError::params("fee", "must be in [0, 0.05)"));
        }
        if self.p_max <= Price::from_raw(5_000) || self.p_max >= Price::ONE {
            return Err(EngineError::params("p_max", "must be in (0.5, 1)"));
        }
        if !self.p_min.is_positive() || self.p_min >= Price::from_raw(5_000) {
            return Err(EngineError::params("p_min", "must be in (0, 0.5)"));
        }
        if self.eta < 1 {
            return Err(EngineError::params("eta", "must be >= 1"));
        }
        if !self.tick_size.is_positive() {
            return Err(EngineError::params("tick_size", "must be > 0"));
        }
        if self.f_match.is_negative() || self.f_match >= Amount::from_raw(20_000) {
            return Err(EngineError::params("f_match", "must be in [0, 0.02)"));
        }
        if self.sigma.is_negative() || self.sigma > Amount::ONE {
            return Err(EngineError::params("sigma", "must be in [0, 1]"));
        }
        if self.af_cap_frac.is_negative() {
            return Err(EngineError::params("af_cap_frac", "must be >= 0"));
        }
        if self.af_max_surplus.is_negative() {
            return Err(EngineError::params("af_max_surplus", "must be >= 0"));
        }
        if !self.q0.is_positive() {
            return Err(EngineError::params("q0", "must be > 0"));
        }
        // Initial price q0 / (Z/N) must sit inside (p_min, p_max).
        let per_binary = self
            .z
            .mul_div(Amount::ONE, Amount::from_units(self.n_outcomes as i64))
            .map_err(EngineError::Numeric)?;
        let cap = per_binary
            .mul_ratio(self.p_max.to_ratio())
            .map_err(EngineError::Numeric)?;
        if self.q0 >= cap {
            return Err(EngineError::params("q0", "must be < p_max * Z / N"));
        }
        if self.total_duration_ms == 0 {
            return Err(EngineError::params("total_duration_ms", "must be > 0"));
        }
        for (field, tunable) in [
            ("mu", &self.mu),
            ("nu", &self.nu),
            ("kappa", &self.kappa),
            ("zeta", &self.zeta),
        ] {
            if tunable.start.is_negative() || tunable.end.is_negative() {
                return Err(EngineError::params(field, "endpoints must be >= 0"));
            }
        }
        if (self.mu.start + self.nu.start).is_zero() || (self.mu.end + self.nu.end).is_zero() {
            return Err(EngineError::params("mu", "mu + nu must stay > 0"));
        }
        if self.mr_enabled {
            let total: u32 = self.res_schedule.iter().sum();
            if total != self.n_outcomes as u32 - 1 {
                return Err(EngineError::params(
                    "res_schedule",
                    "rounds must eliminate exactly N - 1 outcomes",
                ));
            }
        }
        Ok(())
    }

    /// Computes the effective tunables for a batch.
    ///
    /// `elapsed_ms` is measured from the session or round anchor (see
    /// [`InterpolationMode`]); `n_active` is the count of still-active
    /// binaries. When the configured zeta would drive the retention fraction
    /// `f_i = 1 - (N_active - 1) * zeta` to zero or below, zeta is clamped
    /// and a warning event is returned alongside.
    #[must_use]
    pub fn effective_at(
        &self,
        elapsed_ms: u64,
        n_active: usize,
    ) -> (EffectiveParams, Option<EventKind>) {
        let duration = self.total_duration_ms;
        let mu = self.mu.at(elapsed_ms, duration);
        let nu = self.nu.at(elapsed_ms, duration);
        let kappa = self.kappa.at(elapsed_ms, duration);
        let mut zeta = self.zeta.at(elapsed_ms, duration).max(Amount::ZERO);

        let mut clamp_event = None;
        if n_active >= 2 {
            // Largest zeta keeping f_i strictly positive at this N_active.
            let limit = Amount::from_raw(Amount::SCALE / (n_active as i64 - 1) - 1);
            if zeta > limit {
                tracing::warn!(
                    configured = %zeta,
                    effective = %limit,
                    n_active,
                    "zeta clamped to keep retention fraction positive"
                );
                clamp_event = Some(EventKind::ParamsClamped {
                    field: "zeta".to_string(),
                    configured: zeta,
                    effective: limit,
                });
                zeta = limit;
            }
        }

        let others = n_active.saturating_sub(1) as i64;
        let f_i = Amount::ONE - Amount::from_raw(zeta.raw().saturating_mul(others));

        // Price weights a = mu / (mu + nu), b = 1 - a; the complement is
        // taken exactly so the weights always sum to one.
        let total = mu + nu;
        let weight_p = mu.ratio_of(total).unwrap_or(Amount::ZERO);
        let weight_p_prime = Amount::ONE - weight_p;

        (
            EffectiveParams {
                mu,
                nu,
                kappa,
                zeta,
                f_i,
                weight_p,
                weight_p_prime,
            },
            clamp_event,
        )
    }
}

/// Tunables resolved for one batch, plus derived quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveParams {
    /// Initial-price weight at this instant.
    pub mu: Amount,
    /// New-price weight at this instant.
    pub nu: Amount,
    /// Convexity at this instant.
    pub kappa: Amount,
    /// Cross-impact coupling at this instant, after clamping.
    pub zeta: Amount,
    /// Local collateral retention `1 - (N_active - 1) * zeta`, always > 0.
    pub f_i: Amount,
    /// `mu / (mu + nu)`.
    pub weight_p: Amount,
    /// `nu / (mu + nu)`, exact complement of `weight_p`.
    pub weight_p_prime: Amount,
}
