//! Deterministic core engine for a multi-outcome prediction market.
//!
//! One event with N mutually exclusive outcomes is traded as N independent
//! binary sub-markets ("outcome i wins: YES / NO"); every YES or NO token
//! redeems for exactly $1 of collateral if its bet is correct. Users trade
//! through a hybrid of:
//!
//! - a parametric AMM with tunable own- and cross-impact ([`amm`],
//!   [`impact`]),
//! - a tick-quantized limit order book with pro-rata pools ([`book`]),
//! - YES/NO cross-matching inside a binary ([`book::cross_match_binary`]),
//! - opt-in auto-filling of resting orders on cross-impact drifts
//!   ([`autofill`]).
//!
//! The engine is a library with exactly two host-facing operations:
//! [`apply_orders`] (one deterministic batch per tick) and
//! [`trigger_resolution`] (intermediate eliminations with virtual-YES
//! renormalization, and the final payout). It performs no I/O, never reads a
//! clock, and mutates state all-or-nothing: a fatal error leaves the
//! caller's [`EngineState`] untouched.
//!
//! Fills against the system use the reserved counterparty ids
//! [`types::AMM_COUNTERPARTY_ID`] and [`types::AUTO_FILL_COUNTERPARTY_ID`];
//! the host must post those accounting entries against its market-maker
//! account.

pub mod amm;
pub mod autofill;
pub mod book;
pub mod error;
pub mod events;
pub mod impact;
pub mod params;
pub mod pipeline;
pub mod resolution;
pub mod state;
pub mod types;

pub use error::{EngineError, RejectReason, ResolutionError};
pub use events::{AutoFillDetail, EliminationDetail, Event, EventKind};
pub use params::{EffectiveParams, EngineParams, InterpolationMode, Tunable};
pub use pipeline::{apply_orders, cancel_limit, BatchOutcome};
pub use resolution::{trigger_resolution, ResolutionMode, ResolutionOutcome};
pub use state::{BinarySnapshot, BinaryState, EngineState};
pub use types::{Fill, FillKind, Order, OrderKind, Side};
