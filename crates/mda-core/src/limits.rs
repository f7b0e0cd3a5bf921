//! Hard and soft limit enforcement.
//!
//! Every value mutation passes through the checks in this module before it can
//! reach a driver. Two bounds apply to a continuous value:
//!
//! - **Hard limits** are physical or driver-imposed. They are fixed when the
//!   driver builds the endpoint and can never be overridden.
//! - **Soft limits** are operator-configurable and are meant to sit inside the
//!   hard limits. They start out unrestricted.
//!
//! Discrete values use the same two categories: an index past the end of the
//! option list is a hard-limit violation, an index marked temporarily invalid
//! is a soft-limit violation.
//!
//! Hard limits are always evaluated before soft limits. A soft pair that is
//! wider than the hard pair therefore never lets a value past the hard bounds,
//! which is why soft limits are not validated against hard limits when they
//! are assigned.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// LimitPair
// =============================================================================

/// A `(lower, upper)` bound where either side may be unbounded (`None`).
///
/// Serializes as a two-element array (`[0.0, null]`), matching the tuple form
/// used by snapshot consumers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "(Option<f64>, Option<f64>)", into = "(Option<f64>, Option<f64>)")]
pub struct LimitPair {
    /// Lower bound, inclusive. `None` means no lower bound.
    pub lower: Option<f64>,
    /// Upper bound, inclusive. `None` means no upper bound.
    pub upper: Option<f64>,
}

impl LimitPair {
    /// Create a pair from optional bounds.
    pub const fn new(lower: Option<f64>, upper: Option<f64>) -> Self {
        Self { lower, upper }
    }

    /// Create a pair with both bounds finite.
    pub const fn bounded(lower: f64, upper: f64) -> Self {
        Self::new(Some(lower), Some(upper))
    }

    /// A pair that admits every finite value.
    pub const fn unbounded() -> Self {
        Self::new(None, None)
    }

    /// True when neither side restricts the value.
    pub fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// True when `value` lies inside the pair (bounds inclusive).
    ///
    /// NaN is never inside any pair, including the unbounded one.
    pub fn contains(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        self.lower.map_or(true, |lo| lo <= value) && self.upper.map_or(true, |hi| value <= hi)
    }

    /// True when the bounds are ordered (`lower <= upper`) and not NaN.
    pub fn is_well_formed(&self) -> bool {
        let finite_or_none = |b: Option<f64>| b.map_or(true, |v| !v.is_nan());
        if !finite_or_none(self.lower) || !finite_or_none(self.upper) {
            return false;
        }
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) => lo <= hi,
            _ => true,
        }
    }

    /// Why `self` is a questionable soft pair for `hard`, if it is.
    ///
    /// Assignment never fails on this; callers log it.
    pub fn soft_limit_concern(&self, hard: &LimitPair) -> Option<&'static str> {
        if !self.is_well_formed() {
            Some("soft limits are inverted or NaN; every set will be rejected")
        } else if !self.is_subset_of(hard) {
            Some("soft limits extend beyond hard limits; hard limits still apply")
        } else {
            None
        }
    }

    /// True when every value admitted by `self` is also admitted by `outer`.
    pub fn is_subset_of(&self, outer: &LimitPair) -> bool {
        let lower_ok = match (outer.lower, self.lower) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(o), Some(s)) => o <= s,
        };
        let upper_ok = match (outer.upper, self.upper) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(o), Some(s)) => s <= o,
        };
        lower_ok && upper_ok
    }
}

impl From<(Option<f64>, Option<f64>)> for LimitPair {
    fn from((lower, upper): (Option<f64>, Option<f64>)) -> Self {
        Self { lower, upper }
    }
}

impl From<LimitPair> for (Option<f64>, Option<f64>) {
    fn from(pair: LimitPair) -> Self {
        (pair.lower, pair.upper)
    }
}

impl fmt::Display for LimitPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |b: Option<f64>| b.map_or_else(|| "unbounded".to_string(), |v| v.to_string());
        write!(f, "[{}, {}]", bound(self.lower), bound(self.upper))
    }
}

// =============================================================================
// Limit checks
// =============================================================================

/// Outcome of checking a candidate against hard and soft limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCheck {
    /// The candidate may be written to hardware.
    Accepted,
    /// The candidate violates a physical/driver bound.
    AtHardLimit,
    /// The candidate violates an operator-configured bound.
    AtSoftLimit,
}

impl LimitCheck {
    /// True for [`LimitCheck::Accepted`].
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Check a continuous candidate. Hard limits are evaluated first.
pub fn check_continuous(candidate: f64, hard: &LimitPair, soft: &LimitPair) -> LimitCheck {
    if !hard.contains(candidate) {
        LimitCheck::AtHardLimit
    } else if !soft.contains(candidate) {
        LimitCheck::AtSoftLimit
    } else {
        LimitCheck::Accepted
    }
}

/// Check a discrete candidate index against the option count and the set of
/// temporarily invalid indices.
pub fn check_discrete(index: usize, option_count: usize, invalid: &BTreeSet<usize>) -> LimitCheck {
    if index >= option_count {
        LimitCheck::AtHardLimit
    } else if invalid.contains(&index) {
        LimitCheck::AtSoftLimit
    } else {
        LimitCheck::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_inclusive_bounds() {
        let pair = LimitPair::bounded(0.0, 1000.0);
        assert!(pair.contains(0.0));
        assert!(pair.contains(1000.0));
        assert!(pair.contains(500.0));
        assert!(!pair.contains(-0.001));
        assert!(!pair.contains(1000.001));
    }

    #[test]
    fn test_half_open_pairs() {
        let lower_only = LimitPair::new(Some(10.0), None);
        assert!(lower_only.contains(1e12));
        assert!(!lower_only.contains(9.0));

        let upper_only = LimitPair::new(None, Some(-5.0));
        assert!(upper_only.contains(-1e12));
        assert!(!upper_only.contains(0.0));
    }

    #[test]
    fn test_nan_is_never_contained() {
        assert!(!LimitPair::unbounded().contains(f64::NAN));
        assert!(!LimitPair::bounded(0.0, 1.0).contains(f64::NAN));
    }

    #[test]
    fn test_subset() {
        let hard = LimitPair::bounded(0.0, 1000.0);
        assert!(LimitPair::bounded(0.0, 100.0).is_subset_of(&hard));
        assert!(hard.is_subset_of(&hard));
        assert!(!LimitPair::unbounded().is_subset_of(&hard));
        assert!(!LimitPair::bounded(-1.0, 100.0).is_subset_of(&hard));
        assert!(LimitPair::bounded(-1.0, 100.0).is_subset_of(&LimitPair::unbounded()));
    }

    #[test]
    fn test_well_formed() {
        assert!(LimitPair::bounded(1.0, 1.0).is_well_formed());
        assert!(LimitPair::unbounded().is_well_formed());
        assert!(!LimitPair::bounded(2.0, 1.0).is_well_formed());
        assert!(!LimitPair::new(Some(f64::NAN), None).is_well_formed());
    }

    #[test]
    fn test_soft_limit_concern() {
        let hard = LimitPair::bounded(0.0, 1000.0);
        assert_eq!(LimitPair::bounded(0.0, 100.0).soft_limit_concern(&hard), None);
        assert!(LimitPair::bounded(100.0, 0.0)
            .soft_limit_concern(&hard)
            .unwrap()
            .contains("inverted"));
        assert!(LimitPair::unbounded()
            .soft_limit_concern(&hard)
            .unwrap()
            .contains("beyond hard limits"));
    }

    #[test]
    fn test_continuous_hard_before_soft() {
        let hard = LimitPair::bounded(0.0, 1000.0);
        let soft = LimitPair::bounded(0.0, 100.0);
        assert_eq!(check_continuous(50.0, &hard, &soft), LimitCheck::Accepted);
        assert_eq!(check_continuous(500.0, &hard, &soft), LimitCheck::AtSoftLimit);
        assert_eq!(check_continuous(1500.0, &hard, &soft), LimitCheck::AtHardLimit);
        assert_eq!(check_continuous(-1.0, &hard, &soft), LimitCheck::AtHardLimit);
    }

    #[test]
    fn test_soft_wider_than_hard_cannot_widen() {
        let hard = LimitPair::bounded(0.0, 10.0);
        let soft = LimitPair::bounded(-100.0, 100.0);
        assert_eq!(check_continuous(50.0, &hard, &soft), LimitCheck::AtHardLimit);
    }

    #[test]
    fn test_discrete_checks() {
        let mut invalid = BTreeSet::new();
        assert_eq!(check_discrete(2, 2, &invalid), LimitCheck::AtHardLimit);
        assert_eq!(check_discrete(1, 2, &invalid), LimitCheck::Accepted);
        invalid.insert(1);
        assert_eq!(check_discrete(1, 2, &invalid), LimitCheck::AtSoftLimit);
        // Out-of-range wins even if the index is also marked invalid.
        invalid.insert(5);
        assert_eq!(check_discrete(5, 2, &invalid), LimitCheck::AtHardLimit);
    }

    #[test]
    fn test_limit_pair_serde_tuple_form() {
        let pair = LimitPair::new(Some(0.0), None);
        let json = serde_json::to_string(&pair).unwrap();
        assert_eq!(json, "[0.0,null]");
        let back: LimitPair = serde_json::from_str("[null,100.0]").unwrap();
        assert_eq!(back, LimitPair::new(None, Some(100.0)));
    }
}
