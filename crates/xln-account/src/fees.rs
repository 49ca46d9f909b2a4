//! Multi-hop forwarding fee schedule (spec §4.3, "Multi-hop forwarding").

use num_bigint::BigInt;
use num_traits::One;

/// Computes the fee an account deducts before forwarding a payment to the
/// next hop. The fixed-formula implementation is the only one that ships
/// (spec.md leaves fee-schedule configurability as an open question); this
/// trait is the seam a future per-entity or per-token policy would plug into.
pub trait FeeSchedule: Send + Sync {
    fn fee(&self, amount: &BigInt) -> BigInt;
}

/// `max(amount / 1000, 1)`, exactly as specified.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedFeeSchedule;

impl FeeSchedule for FixedFeeSchedule {
    fn fee(&self, amount: &BigInt) -> BigInt {
        let one = BigInt::one();
        let share = amount / 1000;
        if share > one {
            share
        } else {
            one
        }
    }
}
