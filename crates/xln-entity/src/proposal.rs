//! Governance proposals (spec §4.2, `propose`/`vote` tx kinds).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xln_types::SignerId;

use crate::tx::ProposalAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    Pending,
    Executed,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub action: ProposalAction,
    pub votes: BTreeMap<SignerId, bool>,
    pub status: ProposalStatus,
}

impl Proposal {
    pub fn new(id: u64, action: ProposalAction) -> Self {
        Self {
            id,
            action,
            votes: BTreeMap::new(),
            status: ProposalStatus::Pending,
        }
    }
}
