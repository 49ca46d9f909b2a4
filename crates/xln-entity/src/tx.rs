//! Entity-tx kinds (spec §4.2, "Supported tx kinds and contracts").

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use xln_account::AccountInput;
use xln_rcpan::SettlementDiff;
use xln_types::{EntityId, SignerId, TokenId};

use crate::quorum::QuorumConfig;

/// An externally observed ledger event, routed into the owning entity
/// (spec §3, "Lifecycle"; spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JEvent {
    RegisterEntity { quorum: QuorumConfig },
    ReserveUpdated { token: TokenId, new_reserve: BigInt },
    SettlementConfirmed { counterparty: EntityId, token: TokenId },
    TokenRegistered { external_ref: String, token: TokenId },
}

/// A governance action a `propose`/`vote` cycle can execute. Kept
/// deliberately small: the spec only requires that *some* well-formed
/// action exist and execute once voting power clears the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProposalAction {
    UpdateQuorum(QuorumConfig),
    Noop { note: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EntityTx {
    Chat {
        signer: SignerId,
        nonce: u64,
        message: String,
    },
    Propose {
        signer: SignerId,
        nonce: u64,
        proposal_id: u64,
        action: ProposalAction,
    },
    Vote {
        signer: SignerId,
        nonce: u64,
        proposal_id: u64,
        approve: bool,
    },
    JEvent {
        event: JEvent,
    },
    OpenAccount {
        signer: SignerId,
        nonce: u64,
        counterparty: EntityId,
    },
    AccountInput {
        input: AccountInput,
    },
    DirectPayment {
        signer: SignerId,
        nonce: u64,
        token: TokenId,
        amount: BigInt,
        to: EntityId,
        description: String,
    },
    DepositCollateral {
        signer: SignerId,
        nonce: u64,
        counterparty: EntityId,
        token: TokenId,
        amount: BigInt,
    },
    RequestWithdrawal {
        signer: SignerId,
        nonce: u64,
        counterparty: EntityId,
        token: TokenId,
        amount: BigInt,
    },
    SettleDiffs {
        signer: SignerId,
        nonce: u64,
        counterparty: EntityId,
        diffs: Vec<(TokenId, SettlementDiff)>,
    },
}

impl EntityTx {
    /// The signer whose nonce this tx consumes, if any (`j_event` and
    /// `accountInput` are not signer-nonced: they arrive from an external
    /// collaborator or a counterparty, not from this entity's own quorum).
    pub fn signer(&self) -> Option<SignerId> {
        match self {
            EntityTx::Chat { signer, .. }
            | EntityTx::Propose { signer, .. }
            | EntityTx::Vote { signer, .. }
            | EntityTx::OpenAccount { signer, .. }
            | EntityTx::DirectPayment { signer, .. }
            | EntityTx::DepositCollateral { signer, .. }
            | EntityTx::RequestWithdrawal { signer, .. }
            | EntityTx::SettleDiffs { signer, .. } => Some(*signer),
            EntityTx::JEvent { .. } | EntityTx::AccountInput { .. } => None,
        }
    }

    pub fn nonce(&self) -> Option<u64> {
        match self {
            EntityTx::Chat { nonce, .. }
            | EntityTx::Propose { nonce, .. }
            | EntityTx::Vote { nonce, .. }
            | EntityTx::OpenAccount { nonce, .. }
            | EntityTx::DirectPayment { nonce, .. }
            | EntityTx::DepositCollateral { nonce, .. }
            | EntityTx::RequestWithdrawal { nonce, .. }
            | EntityTx::SettleDiffs { nonce, .. } => Some(*nonce),
            EntityTx::JEvent { .. } | EntityTx::AccountInput { .. } => None,
        }
    }
}
