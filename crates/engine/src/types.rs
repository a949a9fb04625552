//! Order and fill types, plus the reserved counterparty ids.

use omx_numeric::{Amount, Price};
use serde::{Deserialize, Serialize};

/// Counterparty id stamped on AMM fills. The host must post the collateral
/// legs of these fills against its market-maker account.
pub const AMM_COUNTERPARTY_ID: &str = "$amm";

/// Counterparty id stamped on auto-fill executions against the AMM.
pub const AUTO_FILL_COUNTERPARTY_ID: &str = "$autofill";

/// Aggregate id for the YES-buy side of a cross-match fill; per-user amounts
/// follow from the pool shares in the state blob.
pub const YES_POOL_COUNTERPARTY_ID: &str = "$pool_yes_buy";

/// Aggregate id for the NO-sell side of a cross-match fill.
pub const NO_POOL_COUNTERPARTY_ID: &str = "$pool_no_sell";

/// Token side of a binary sub-market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
        }
    }

    /// The other side of the binary.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    /// Executes within the batch it arrives in, or is rejected on slippage.
    Market,
    /// Rests in a tick pool until filled or cancelled.
    Limit,
}

/// A user order submitted to the batch pipeline.
///
/// `order_id` is unique and stable; `ts_ms` is monotonic per submission.
/// Orders are applied in `(ts_ms, order_id)` order, which makes the batch
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Host-assigned stable id.
    pub order_id: String,
    /// Submitting user.
    pub user_id: String,
    /// Outcome index in `0..n_outcomes`.
    pub outcome: usize,
    /// YES or NO token.
    pub side: Side,
    /// MARKET or LIMIT.
    pub kind: OrderKind,
    /// Buy (true) or sell (false).
    pub is_buy: bool,
    /// Token quantity, must be > 0.
    pub size: Amount,
    /// Required for LIMIT orders; must be tick-aligned within
    /// `[p_min, p_max]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Price>,
    /// Optional cap on realized slippage for MARKET orders, as a 10^6-scaled
    /// fraction of the pre-trade price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_slippage: Option<Amount>,
    /// Whether a resting LIMIT order may be auto-filled on cross-impact
    /// price shifts.
    #[serde(default)]
    pub af_opt_in: bool,
    /// Submission timestamp in milliseconds.
    pub ts_ms: u64,
}

/// How a fill was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillKind {
    /// Against the automated market maker.
    Amm,
    /// Against a resting limit pool at its tick price.
    Lob,
    /// YES buy matched with NO sell inside one binary.
    Cross,
    /// Opt-in limit pool executed against the AMM after a cross-impact.
    AutoFill,
}

/// An executed trade.
///
/// `buyer`/`seller` may be one of the reserved counterparty ids. CROSS fills
/// carry both limit prices; all other kinds leave them unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Deterministic sequence number, unique across the market's lifetime.
    pub trade_id: u64,
    /// Receiving side.
    pub buyer: String,
    /// Delivering side.
    pub seller: String,
    /// Outcome index.
    pub outcome: usize,
    /// YES or NO token.
    pub side: Side,
    /// Execution price (post-trade price for AMM fills, tick price
    /// otherwise).
    pub price: Price,
    /// Token quantity.
    pub size: Amount,
    /// Fee charged separately from the price.
    pub fee: Amount,
    /// Origin of the fill.
    pub kind: FillKind,
    /// YES limit price, CROSS fills only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_yes: Option<Price>,
    /// NO limit price, CROSS fills only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_no: Option<Price>,
    /// Batch tick in which the fill occurred.
    pub tick_id: u64,
    /// Batch timestamp.
    pub ts_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_numeric::{amt, px};

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Yes.opposite(), Side::No);
        assert_eq!(Side::No.opposite(), Side::Yes);
    }

    #[test]
    fn test_side_wire_format() {
        assert_eq!(serde_json::to_string(&Side::Yes).unwrap(), "\"YES\"");
        assert_eq!(serde_json::to_string(&Side::No).unwrap(), "\"NO\"");
    }

    #[test]
    fn test_order_roundtrip_with_optional_fields() {
        let order = Order {
            order_id: "o-1".to_string(),
            user_id: "alice".to_string(),
            outcome: 1,
            side: Side::Yes,
            kind: OrderKind::Limit,
            is_buy: true,
            size: amt!(100),
            limit_price: Some(px!(0.55)),
            max_slippage: None,
            af_opt_in: true,
            ts_ms: 1_000,
        };
        let json = serde_json::to_string(&order).unwrap();
        assert!(!json.contains("max_slippage"));
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn test_fill_omits_cross_prices_when_absent() {
        let fill = Fill {
            trade_id: 7,
            buyer: "alice".to_string(),
            seller: AMM_COUNTERPARTY_ID.to_string(),
            outcome: 0,
            side: Side::Yes,
            price: px!(0.52),
            size: amt!(100),
            fee: amt!(0.52),
            kind: FillKind::Amm,
            price_yes: None,
            price_no: None,
            tick_id: 3,
            ts_ms: 5_000,
        };
        let json = serde_json::to_string(&fill).unwrap();
        assert!(!json.contains("price_yes"));
        let back: Fill = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fill);
    }
}
