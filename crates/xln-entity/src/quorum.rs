//! Quorum configuration for an entity's validator set (spec §3, "Entity
//! replica"; spec §4.2, "Quorum/consensus").

use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use xln_types::SignerId;

/// A validator's voting power and public key within one entity's quorum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerInfo {
    pub power: u64,
    pub key: VerifyingKey,
}

/// The set of signers entitled to vote on an entity's frames, and the power
/// required to commit one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuorumConfig {
    pub signers: BTreeMap<SignerId, SignerInfo>,
    pub threshold: u64,
}

impl QuorumConfig {
    pub fn single_signer(signer: SignerId, key: VerifyingKey) -> Self {
        let mut signers = BTreeMap::new();
        signers.insert(signer, SignerInfo { power: 1, key });
        Self { signers, threshold: 1 }
    }

    pub fn total_power(&self) -> u64 {
        self.signers.values().map(|s| s.power).sum()
    }

    pub fn power_of(&self, signer: SignerId) -> u64 {
        self.signers.get(&signer).map(|s| s.power).unwrap_or(0)
    }

    /// True if `signer` alone holds enough voting power to commit without
    /// collecting any other precommit (spec §4.2, "Single-signer
    /// short-circuit").
    pub fn is_sufficient_alone(&self, signer: SignerId) -> bool {
        self.power_of(signer) >= self.threshold
    }

    /// Sum of voting power among `signers`, deduplicated.
    pub fn power_of_set(&self, signers: impl IntoIterator<Item = SignerId>) -> u64 {
        let mut seen = std::collections::BTreeSet::new();
        signers
            .into_iter()
            .filter(|s| seen.insert(*s))
            .map(|s| self.power_of(s))
            .sum()
    }

    /// The designated proposer: the first signer in sorted order (spec §3,
    /// "the proposer (first validator, deterministic)").
    pub fn proposer(&self) -> Option<SignerId> {
        self.signers.keys().next().copied()
    }
}
