//! The RCPAN invariant engine (spec §4.4).
//!
//! `update_delta` is the only code path in this workspace permitted to
//! mutate a [`Delta`](xln_types::Delta): it validates the post-condition
//! `-left_credit_limit <= on_delta + off_delta <= collateral + right_credit_limit`
//! before ever returning a changed value. On violation it returns a typed
//! error and the caller's original state is untouched — this is *active*
//! enforcement, never a silent clamp.

use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use xln_types::{CoreError, Delta};

/// Which side of the account a capacity/limit change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// A single mutation to apply to a [`Delta`]. Every account-tx kind in
/// `xln-account` resolves to one of these before calling [`update_delta`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Move `amount` from the settlement ledger's reserve into collateral.
    AddCollateral(BigInt),
    /// Settlement-driven adjustment to `on_delta`.
    AdjustOnDelta(BigInt),
    /// In-channel activity adjustment to `off_delta` (e.g. a direct payment).
    AdjustOffDelta(BigInt),
    /// Set one side's credit limit to an absolute amount.
    SetCreditLimit { side: Side, amount: BigInt },
}

/// Apply `change` to `current`, returning the new delta iff the result
/// satisfies RCPAN. `current` is never mutated on failure.
pub fn update_delta(current: &Delta, change: &Change) -> Result<Delta, CoreError> {
    let mut next = current.clone();
    match change {
        Change::AddCollateral(amount) => next.collateral += amount,
        Change::AdjustOnDelta(amount) => next.on_delta += amount,
        Change::AdjustOffDelta(amount) => next.off_delta += amount,
        Change::SetCreditLimit { side, amount } => match side {
            Side::Left => next.left_credit_limit = amount.clone(),
            Side::Right => next.right_credit_limit = amount.clone(),
        },
    }
    next.check_rcpan()?;
    Ok(next)
}

/// Capacity available to one side of an account (spec §4.4, "Capacity
/// derivation").
pub struct Capacity {
    pub in_capacity: BigInt,
    pub out_capacity: BigInt,
}

/// Capacity as seen from the left party's perspective.
pub fn left_capacity(delta: &Delta) -> Capacity {
    let net = delta.net();
    Capacity {
        in_capacity: &delta.right_credit_limit - &net,
        out_capacity: &delta.collateral + &delta.left_credit_limit + &net,
    }
}

/// Capacity as seen from the right party's perspective: obtained by
/// negating δ and swapping the credit limits.
pub fn right_capacity(delta: &Delta) -> Capacity {
    let net = -delta.net();
    Capacity {
        in_capacity: &delta.left_credit_limit - &net,
        out_capacity: &delta.collateral + &delta.right_credit_limit + &net,
    }
}

/// One entry of a settlement batch diff (spec §4.4, "Settlement zero-sum").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDiff {
    pub left_diff: BigInt,
    pub right_diff: BigInt,
    pub collateral_diff: BigInt,
    pub on_delta_diff: BigInt,
}

/// Validate that a settlement diff's `left_diff + right_diff +
/// collateral_diff` sums to zero. Violation is a hard error rejected before
/// any on-chain submission.
pub fn check_zero_sum(diff: &SettlementDiff) -> Result<(), CoreError> {
    let sum = &diff.left_diff + &diff.right_diff + &diff.collateral_diff;
    if !sum.is_zero() {
        return Err(CoreError::ZeroSumViolation {
            token: String::new(),
            sum: sum.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(collateral: i64, on: i64, off: i64, ll: i64, lr: i64) -> Delta {
        Delta::new(
            BigInt::from(collateral),
            BigInt::from(on),
            BigInt::from(off),
            BigInt::from(ll),
            BigInt::from(lr),
        )
        .unwrap()
    }

    #[test]
    fn payment_under_rcpan_succeeds() {
        // A->B account, L_L=L_R=1_000_000, C=0, δ=0. Direct payment of 500_000.
        let d = delta(0, 0, 0, 1_000_000, 1_000_000);
        let updated = update_delta(&d, &Change::AdjustOffDelta(BigInt::from(-500_000))).unwrap();
        assert_eq!(updated.net(), BigInt::from(-500_000));
    }

    #[test]
    fn payment_over_rcpan_is_rejected_and_state_untouched() {
        let d = delta(0, 0, 0, 1_000_000, 1_000_000);
        let err =
            update_delta(&d, &Change::AdjustOffDelta(BigInt::from(-1_000_001))).unwrap_err();
        assert!(matches!(err, CoreError::RcpanViolation { .. }));
    }

    #[test]
    fn zero_sum_settlement_is_accepted() {
        let diff = SettlementDiff {
            left_diff: BigInt::from(100),
            right_diff: BigInt::from(-100),
            collateral_diff: BigInt::from(0),
            on_delta_diff: BigInt::from(0),
        };
        assert!(check_zero_sum(&diff).is_ok());
    }

    #[test]
    fn non_zero_sum_settlement_is_rejected() {
        let diff = SettlementDiff {
            left_diff: BigInt::from(100),
            right_diff: BigInt::from(-100),
            collateral_diff: BigInt::from(1),
            on_delta_diff: BigInt::from(0),
        };
        assert!(matches!(check_zero_sum(&diff), Err(CoreError::ZeroSumViolation { .. })));
    }

    #[test]
    fn left_and_right_capacity_are_consistent() {
        let d = delta(1_000, 100, -50, 500, 700);
        let left = left_capacity(&d);
        let right = right_capacity(&d);
        assert_eq!(left.out_capacity, BigInt::from(1_000 + 500 + 50));
        assert_eq!(right.in_capacity, BigInt::from(500 + 50));
    }
}
