//! Events emitted by `apply_orders` and `trigger_resolution`.
//!
//! The host persists and forwards these; payload shapes are part of the
//! external contract. Events serialize as `{ "type": ..., "payload": ...,
//! "ts_ms": ... }`.

use std::collections::BTreeMap;

use omx_numeric::{Amount, Price};
use serde::{Deserialize, Serialize};

use crate::error::RejectReason;
use crate::types::{Fill, Side};

/// A timestamped engine event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event body, tagged by kind.
    #[serde(flatten)]
    pub kind: EventKind,
    /// Batch or resolution timestamp.
    pub ts_ms: u64,
}

impl Event {
    /// Creates an event at the given timestamp.
    #[must_use]
    pub fn new(ts_ms: u64, kind: EventKind) -> Self {
        Self { kind, ts_ms }
    }
}

/// Detail payload of an auto-fill execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoFillDetail {
    /// Binary the opt-in pool sits on.
    pub outcome: usize,
    /// YES or NO pool.
    pub side: Side,
    /// Tick of the filled pool.
    pub tick: u32,
    /// Token quantity executed against the AMM.
    pub delta: Amount,
    /// Seigniorage captured: `charge - cost` (auto-buy) or `proceeds -
    /// charge` (auto-sell). Always >= 0.
    pub surplus: Amount,
    /// Token deltas per pool user (positive for auto-buys).
    pub position_deltas: BTreeMap<String, Amount>,
    /// Collateral deltas per pool user, including the `(1 - sigma)` surplus
    /// rebate.
    pub balance_deltas: BTreeMap<String, Amount>,
}

/// Per-round payload of an intermediate elimination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EliminationDetail {
    /// Eliminated outcome.
    pub outcome: usize,
    /// Total face value paid to NO holders.
    pub paid_no: Amount,
    /// Residual pool redistributed to surviving binaries.
    pub freed: Amount,
    /// Per-user payouts for this outcome.
    pub payouts: BTreeMap<String, Amount>,
}

/// Event body variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// A LIMIT order was placed into its pool.
    OrderAccepted {
        /// Id of the accepted order.
        order_id: String,
    },

    /// An order was dropped; the rest of the batch proceeded.
    OrderRejected {
        /// Id of the rejected order.
        order_id: String,
        /// Why it was dropped.
        reason: RejectReason,
    },

    /// An AMM or LOB execution.
    Fill(Fill),

    /// A YES-buy / NO-sell pairing inside one binary.
    CrossMatch(Fill),

    /// An opt-in limit pool executed against the AMM.
    AutoFill(AutoFillDetail),

    /// One outcome eliminated in an intermediate round.
    Elimination(EliminationDetail),

    /// Summary of a completed intermediate round.
    RoundSummary {
        /// Sum of YES prices over active binaries, snapshotted before the
        /// round.
        pre_sum_yes: Price,
        /// Realized sum after renormalization.
        post_sum_yes: Price,
        /// Outcomes whose virtual supply was clamped at zero; when
        /// non-empty the realized sum may fall short of the snapshot.
        capped: Vec<usize>,
    },

    /// Final resolution: winner paid, market closed.
    ResolutionFinal {
        /// Winning outcome.
        winner: usize,
        /// Total face value paid to YES holders of the winner.
        paid_yes: Amount,
    },

    /// A configured tunable was clamped before use.
    ParamsClamped {
        /// Parameter name.
        field: String,
        /// Configured 10^6-scaled value.
        configured: Amount,
        /// Value actually used.
        effective: Amount,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_numeric::amt;

    #[test]
    fn test_event_wire_shape() {
        let event = Event::new(
            42,
            EventKind::OrderRejected {
                order_id: "o-9".to_string(),
                reason: RejectReason::InactiveOutcome,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ORDER_REJECTED");
        assert_eq!(json["payload"]["order_id"], "o-9");
        assert_eq!(json["payload"]["reason"], "inactive_outcome");
        assert_eq!(json["ts_ms"], 42);
    }

    #[test]
    fn test_round_summary_roundtrip() {
        let event = Event::new(
            7,
            EventKind::RoundSummary {
                pre_sum_yes: Price::from_raw(15_500),
                post_sum_yes: Price::from_raw(15_499),
                capped: vec![2],
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_auto_fill_detail_holds_per_user_deltas() {
        let mut rebates = BTreeMap::new();
        rebates.insert("alice".to_string(), amt!(0.25));
        let detail = AutoFillDetail {
            outcome: 2,
            side: Side::Yes,
            tick: 60,
            delta: amt!(10),
            surplus: amt!(0.5),
            position_deltas: BTreeMap::new(),
            balance_deltas: rebates,
        };
        let json = serde_json::to_value(Event::new(0, EventKind::AutoFill(detail))).unwrap();
        assert_eq!(json["type"], "AUTO_FILL");
        assert_eq!(json["payload"]["balance_deltas"]["alice"], "250000");
    }
}
