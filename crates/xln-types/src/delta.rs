//! The per-account, per-token `Delta` ledger entry (spec §3, "Delta").
//!
//! `Delta` itself is inert data; the only code path permitted to construct or
//! mutate one post-genesis is `xln_rcpan::update_delta`, which enforces the
//! RCPAN invariant as an active post-condition rather than clamping.

use crate::error::CoreError;
use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// Optional per-side spending allowance layered on top of the credit limits
/// (spec §3, "optional allowances").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    pub left_allowance: BigInt,
    pub right_allowance: BigInt,
}

/// A single token's balance state within one bilateral account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Locked on the settlement ledger; always >= 0.
    pub collateral: BigInt,
    /// Adjusted by on-chain settlements.
    pub on_delta: BigInt,
    /// Adjusted by in-channel activity.
    pub off_delta: BigInt,
    /// Left party's credit limit; always >= 0.
    pub left_credit_limit: BigInt,
    /// Right party's credit limit; always >= 0.
    pub right_credit_limit: BigInt,
    pub allowance: Option<Allowance>,
}

impl Delta {
    /// A fresh, empty delta for a newly opened token slot.
    pub fn empty() -> Self {
        Self {
            collateral: BigInt::zero(),
            on_delta: BigInt::zero(),
            off_delta: BigInt::zero(),
            left_credit_limit: BigInt::zero(),
            right_credit_limit: BigInt::zero(),
            allowance: None,
        }
    }

    /// Construct a delta, rejecting it outright if it violates RCPAN.
    pub fn new(
        collateral: BigInt,
        on_delta: BigInt,
        off_delta: BigInt,
        left_credit_limit: BigInt,
        right_credit_limit: BigInt,
    ) -> Result<Self, CoreError> {
        let d = Self {
            collateral,
            on_delta,
            off_delta,
            left_credit_limit,
            right_credit_limit,
            allowance: None,
        };
        d.check_rcpan()?;
        Ok(d)
    }

    /// δ = on_delta + off_delta, the net amount owed from left to right.
    pub fn net(&self) -> BigInt {
        &self.on_delta + &self.off_delta
    }

    /// Validate `-left_credit_limit <= delta <= collateral + right_credit_limit`
    /// without mutating anything (spec §4.4).
    pub fn check_rcpan(&self) -> Result<(), CoreError> {
        let delta = self.net();
        let lower = -&self.left_credit_limit;
        let upper = &self.collateral + &self.right_credit_limit;
        if delta < lower || delta > upper {
            return Err(CoreError::RcpanViolation {
                delta: delta.to_string(),
                lower: lower.to_string(),
                upper: upper.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_delta_satisfies_rcpan() {
        assert!(Delta::empty().check_rcpan().is_ok());
    }

    #[test]
    fn construction_rejects_out_of_bounds_delta() {
        let err = Delta::new(
            BigInt::from(0),
            BigInt::from(0),
            BigInt::from(-1),
            BigInt::from(0),
            BigInt::from(0),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::RcpanViolation { .. }));
    }

    #[test]
    fn construction_accepts_delta_within_bounds() {
        let d = Delta::new(
            BigInt::from(100),
            BigInt::from(0),
            BigInt::from(-50),
            BigInt::from(1_000),
            BigInt::from(1_000),
        )
        .unwrap();
        assert_eq!(d.net(), BigInt::from(-50));
    }
}
