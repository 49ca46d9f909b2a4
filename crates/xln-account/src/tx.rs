//! Account-tx kinds (spec §4.3, "Account-tx kinds").

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use xln_rcpan::Side;
use xln_types::{EntityId, TokenId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountTx {
    /// Open a fresh, zeroed delta slot for `token`.
    AddDelta { token: TokenId },
    /// Set one side's credit limit to an absolute amount.
    SetCreditLimit {
        token: TokenId,
        side: Side,
        amount: BigInt,
    },
    /// Move `amount` of `token` toward `to`, following `route` (spec §4.3,
    /// "Multi-hop forwarding"). `from`/`to` are the ultimate payment
    /// endpoints, not necessarily the two parties of this account.
    DirectPayment {
        token: TokenId,
        amount: BigInt,
        route: Vec<EntityId>,
        from: EntityId,
        to: EntityId,
        description: String,
    },
    /// Layer a spending allowance on top of the credit limits.
    SetAllowance {
        token: TokenId,
        left_allowance: BigInt,
        right_allowance: BigInt,
    },
    /// Acknowledge a settlement batch the ledger confirmed via `j_event`.
    SettlementAck { token: TokenId, batch_id: String },
}

// Manual Serialize/Deserialize impls are unnecessary: Side needs derives too.
