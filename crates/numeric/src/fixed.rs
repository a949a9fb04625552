//! `Amount` (6 dp) and `Price` (4 dp) scaled-integer types.
//!
//! Both serialize as the base-10 string of the underlying scaled integer,
//! which is the wire convention for the engine state blob. `Display` renders
//! the human-readable decimal instead.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::NumericError;
use crate::{div_round_half_even, mul_div_floor, mul_div_round};

// =============================================================================
// Amount
// =============================================================================

/// A collateral balance or token quantity with 6 decimal places.
///
/// Backed by an `i64` scaled by 10^6. Plain `+`/`-` operators saturate;
/// engine code uses the `checked_*` variants at boundaries where overflow is
/// conceivable and the widened helpers for products.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    /// Scale factor: 10^6.
    pub const SCALE: i64 = 1_000_000;
    /// Number of decimal places.
    pub const DECIMALS: u32 = 6;
    /// Zero.
    pub const ZERO: Self = Self(0);
    /// One whole unit (1.000000).
    pub const ONE: Self = Self(Self::SCALE);
    /// Largest representable amount.
    pub const MAX: Self = Self(i64::MAX);

    /// Wraps a raw scaled integer.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Builds an amount from whole units (saturating).
    #[inline]
    #[must_use]
    pub const fn from_units(units: i64) -> Self {
        Self(units.saturating_mul(Self::SCALE))
    }

    /// Returns the raw scaled integer.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Returns the raw value widened to `i128` for intermediate math.
    #[inline]
    #[must_use]
    pub const fn raw_i128(self) -> i128 {
        self.0 as i128
    }

    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Absolute value (saturating at `i64::MAX`).
    #[inline]
    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    #[inline]
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    #[inline]
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// Checked addition.
    #[inline]
    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Checked subtraction.
    #[inline]
    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Saturating addition.
    #[inline]
    #[must_use]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Multiplies by a dimensionless ratio (an `Amount` where 1.0 = 10^6),
    /// rounding half-to-even.
    ///
    /// # Errors
    /// Returns [`NumericError::Overflow`] if the result does not fit.
    pub fn mul_ratio(self, ratio: Amount) -> Result<Self, NumericError> {
        let raw = mul_div_round(self.raw_i128(), ratio.raw_i128(), Self::SCALE as i128)?;
        Self::try_from_i128(raw)
    }

    /// Multiplies a token quantity by a price, yielding collateral.
    ///
    /// # Errors
    /// Returns [`NumericError::Overflow`] if the result does not fit.
    pub fn mul_price(self, price: Price) -> Result<Self, NumericError> {
        let raw = mul_div_round(self.raw_i128(), price.raw_i128(), Price::SCALE as i128)?;
        Self::try_from_i128(raw)
    }

    /// Divides collateral by a price, yielding a token quantity, rounding
    /// half-to-even.
    ///
    /// # Errors
    /// Fails on a zero price or overflow.
    pub fn div_price(self, price: Price) -> Result<Self, NumericError> {
        let raw = mul_div_round(self.raw_i128(), Price::SCALE as i128, price.raw_i128())?;
        Self::try_from_i128(raw)
    }

    /// Divides collateral by a price, truncating toward zero. Used for pool
    /// capacities so escrow is never overdrawn by rounding.
    ///
    /// # Errors
    /// Fails on a zero price or overflow.
    pub fn div_price_floor(self, price: Price) -> Result<Self, NumericError> {
        let raw = mul_div_floor(self.raw_i128(), Price::SCALE as i128, price.raw_i128())?;
        Self::try_from_i128(raw)
    }

    /// The ratio `self / den` as a 10^6-scaled value, half-to-even.
    ///
    /// # Errors
    /// Fails on a zero denominator or overflow.
    pub fn ratio_of(self, den: Amount) -> Result<Self, NumericError> {
        let raw = mul_div_round(self.raw_i128(), Self::SCALE as i128, den.raw_i128())?;
        Self::try_from_i128(raw)
    }

    /// Pro-rata helper: `self * num / den`, half-to-even.
    ///
    /// # Errors
    /// Fails on a zero denominator or overflow.
    pub fn mul_div(self, num: Amount, den: Amount) -> Result<Self, NumericError> {
        let raw = mul_div_round(self.raw_i128(), num.raw_i128(), den.raw_i128())?;
        Self::try_from_i128(raw)
    }

    /// Converts to a price (4 dp), rounding half-to-even.
    ///
    /// # Errors
    /// Fails if the value does not fit the price range.
    pub fn to_price(self) -> Result<Price, NumericError> {
        let raw = div_round_half_even(self.raw_i128(), (Self::SCALE / Price::SCALE) as i128)?;
        Price::try_from_i128(raw)
    }

    /// Narrows a widened raw value back to an `Amount`.
    ///
    /// # Errors
    /// Returns [`NumericError::Overflow`] if the value does not fit in `i64`.
    pub fn try_from_i128(raw: i128) -> Result<Self, NumericError> {
        i64::try_from(raw).map(Self).map_err(|_| NumericError::Overflow)
    }

    /// Parses a decimal literal such as `"100"`, `"0.5"` or `"-1.25"`.
    ///
    /// # Errors
    /// Rejects malformed input and more than 6 fractional digits.
    pub fn parse(input: &str) -> Result<Self, NumericError> {
        parse_scaled(input, Self::DECIMALS).map(Self)
    }
}

impl std::ops::Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl std::ops::Neg for Amount {
    type Output = Self;
    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_scaled(f, self.0, Self::DECIMALS)
    }
}

impl FromStr for Amount {
    type Err = NumericError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(ScaledIntVisitor).map(Self)
    }
}

// =============================================================================
// Price
// =============================================================================

/// A token price with 4 decimal places, backed by an `i64` scaled by 10^4.
///
/// Prices live in `(0, 1)` for individual tokens but sums of prices (and the
/// renormalization targets) can exceed one, so the full signed range is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(i64);

impl Price {
    /// Scale factor: 10^4.
    pub const SCALE: i64 = 10_000;
    /// Number of decimal places.
    pub const DECIMALS: u32 = 4;
    /// Zero.
    pub const ZERO: Self = Self(0);
    /// Face value: $1.0000.
    pub const ONE: Self = Self(Self::SCALE);

    /// Wraps a raw scaled integer.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw scaled integer.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Returns the raw value widened to `i128`.
    #[inline]
    #[must_use]
    pub const fn raw_i128(self) -> i128 {
        self.0 as i128
    }

    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Checked addition.
    #[inline]
    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Saturating addition.
    #[inline]
    #[must_use]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Widens to a 10^6-scaled ratio. Exact (multiplies by 100).
    #[inline]
    #[must_use]
    pub const fn to_ratio(self) -> Amount {
        Amount::from_raw(self.0.saturating_mul(Amount::SCALE / Self::SCALE))
    }

    /// The price `num / den` of two amounts at 4 dp, half-to-even.
    ///
    /// # Errors
    /// Fails on a zero denominator or overflow.
    pub fn ratio_of(num: Amount, den: Amount) -> Result<Self, NumericError> {
        let raw = mul_div_round(num.raw_i128(), Self::SCALE as i128, den.raw_i128())?;
        Self::try_from_i128(raw)
    }

    /// Narrows a widened raw value back to a `Price`.
    ///
    /// # Errors
    /// Returns [`NumericError::Overflow`] if the value does not fit in `i64`.
    pub fn try_from_i128(raw: i128) -> Result<Self, NumericError> {
        i64::try_from(raw).map(Self).map_err(|_| NumericError::Overflow)
    }

    /// Parses a decimal literal such as `"0.55"`.
    ///
    /// # Errors
    /// Rejects malformed input and more than 4 fractional digits.
    pub fn parse(input: &str) -> Result<Self, NumericError> {
        parse_scaled(input, Self::DECIMALS).map(Self)
    }
}

impl std::ops::Add for Price {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for Price {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl std::ops::AddAssign for Price {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_scaled(f, self.0, Self::DECIMALS)
    }
}

impl FromStr for Price {
    type Err = NumericError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(ScaledIntVisitor).map(Self)
    }
}

// =============================================================================
// Free functions & shared plumbing
// =============================================================================

/// Exact division `n / d` at the 6-dp amount scale, half-to-even.
///
/// # Errors
/// Returns [`NumericError::DivisionByZero`] when `d` is zero.
pub fn safe_divide(n: Amount, d: Amount) -> Result<Amount, NumericError> {
    n.ratio_of(d)
}

struct ScaledIntVisitor;

impl Visitor<'_> for ScaledIntVisitor {
    type Value = i64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a base-10 string of a scaled integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
        v.parse::<i64>()
            .map_err(|_| E::custom(format!("invalid scaled integer: {v}")))
    }
}

fn parse_scaled(input: &str, decimals: u32) -> Result<i64, NumericError> {
    let trimmed: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let err = || NumericError::InvalidLiteral {
        input: input.to_string(),
    };

    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.as_str()),
    };
    if body.is_empty() {
        return Err(err());
    }

    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(err());
    }
    if frac_part.len() > decimals as usize {
        return Err(err());
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(err());
    }

    let scale = 10i128.pow(decimals);
    let int_val: i128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| err())?
    };
    let frac_scale = 10i128.pow(decimals - frac_part.len() as u32);
    let frac_val: i128 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse::<i128>().map_err(|_| err())? * frac_scale
    };

    let raw = int_val
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or(NumericError::Overflow)?;
    let raw = if negative { -raw } else { raw };
    i64::try_from(raw).map_err(|_| NumericError::Overflow)
}

fn format_scaled(f: &mut fmt::Formatter<'_>, raw: i64, decimals: u32) -> fmt::Result {
    let scale = 10i64.pow(decimals);
    let sign = if raw < 0 { "-" } else { "" };
    let abs = raw.unsigned_abs();
    let units = abs / scale as u64;
    let frac = abs % scale as u64;
    write!(f, "{sign}{units}.{frac:0width$}", width = decimals as usize)
}

/// Builds an [`Amount`] from a decimal literal at the call site.
#[macro_export]
macro_rules! amt {
    ($v:expr) => {
        $crate::Amount::parse(stringify!($v)).expect("invalid amount literal")
    };
}

/// Builds a [`Price`] from a decimal literal at the call site.
#[macro_export]
macro_rules! px {
    ($v:expr) => {
        $crate::Price::parse(stringify!($v)).expect("invalid price literal")
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Parsing & Display ====================

    #[test]
    fn test_amount_parse_whole() {
        assert_eq!(Amount::parse("100").unwrap(), Amount::from_raw(100_000_000));
    }

    #[test]
    fn test_amount_parse_fraction() {
        assert_eq!(Amount::parse("0.5").unwrap(), Amount::from_raw(500_000));
        assert_eq!(Amount::parse("-1.25").unwrap(), Amount::from_raw(-1_250_000));
        assert_eq!(Amount::parse(".25").unwrap(), Amount::from_raw(250_000));
    }

    #[test]
    fn test_amount_parse_rejects_excess_precision() {
        assert!(Amount::parse("0.1234567").is_err());
        assert!(Price::parse("0.12345").is_err());
    }

    #[test]
    fn test_amount_parse_rejects_garbage() {
        assert!(Amount::parse("").is_err());
        assert!(Amount::parse("abc").is_err());
        assert!(Amount::parse("1.2.3").is_err());
        assert!(Amount::parse("-").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let a = Amount::from_raw(1_234_567);
        assert_eq!(a.to_string(), "1.234567");
        assert_eq!(Amount::parse(&a.to_string()).unwrap(), a);

        let p = Price::from_raw(5_500);
        assert_eq!(p.to_string(), "0.5500");
    }

    #[test]
    fn test_macros() {
        assert_eq!(amt!(100.25), Amount::from_raw(100_250_000));
        assert_eq!(px!(0.55), Price::from_raw(5_500));
    }

    // ==================== Arithmetic ====================

    #[test]
    fn test_mul_price() {
        // 80 tokens at $0.55 = $44.
        let tokens = amt!(80);
        let price = px!(0.55);
        assert_eq!(tokens.mul_price(price).unwrap(), amt!(44));
    }

    #[test]
    fn test_div_price_floor_never_overdraws() {
        // $10 at $0.33 -> 30.303030 tokens exactly floored.
        let cash = amt!(10);
        let tokens = cash.div_price_floor(px!(0.33)).unwrap();
        assert!(tokens.mul_price(px!(0.33)).unwrap() <= cash);
    }

    #[test]
    fn test_ratio_of() {
        let half = amt!(1).ratio_of(amt!(2)).unwrap();
        assert_eq!(half, amt!(0.5));
    }

    #[test]
    fn test_safe_divide_zero_denominator() {
        assert!(matches!(
            safe_divide(amt!(1), Amount::ZERO),
            Err(NumericError::DivisionByZero)
        ));
    }

    #[test]
    fn test_price_ratio_of_amounts() {
        // q/L = 1666.666667 / 3333.333333 -> 0.5000
        let q = Amount::from_raw(1_666_666_667);
        let l = Amount::from_raw(3_333_333_333);
        assert_eq!(Price::ratio_of(q, l).unwrap(), px!(0.5));
    }

    #[test]
    fn test_saturating_ops() {
        assert_eq!(Amount::MAX + amt!(1), Amount::MAX);
        assert_eq!(-Amount::from_raw(i64::MIN), Amount::MAX);
    }

    #[test]
    fn test_to_ratio_is_exact() {
        assert_eq!(px!(0.55).to_ratio(), amt!(0.55));
    }

    // ==================== Serde ====================

    #[test]
    fn test_serde_wire_format_is_scaled_integer_string() {
        let a = amt!(83.79);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"83790000\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_serde_rejects_non_integer() {
        assert!(serde_json::from_str::<Amount>("\"1.5\"").is_err());
        assert!(serde_json::from_str::<Price>("\"x\"").is_err());
    }
}
