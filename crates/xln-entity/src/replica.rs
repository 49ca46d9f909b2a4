//! Quorum propose/precommit/commit orchestration (spec §4.2,
//! "Quorum/consensus"; "Single-signer short-circuit"; "Failure semantics").
//!
//! Each validator of an entity runs its own `EntityReplica`, holding its own
//! copy of [`EntityState`]. Replicas converge purely by exchanging
//! [`ReplicaMessage`]s; there is no shared memory between them.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use tracing::{debug, warn};
use xln_merkle::{keccak256, Hash};
use xln_types::{CoreError, EntityId, SignerId};

use crate::frame::EntityFrame;
use crate::state::{EntityOutput, EntityState};
use crate::tx::EntityTx;

/// Messages exchanged between an entity's validators to agree on a frame.
#[derive(Debug, Clone)]
pub enum ReplicaMessage {
    Propose {
        frame: EntityFrame,
        proposer: SignerId,
        signature: Vec<u8>,
    },
    Precommit {
        height: u64,
        state_hash: Hash,
        signer: SignerId,
        signature: Vec<u8>,
    },
    Commit {
        height: u64,
        state_hash: Hash,
    },
}

pub struct EntityReplica {
    pub entity_id: EntityId,
    pub signer_id: SignerId,
    pub state: EntityState,
    pub mempool: Vec<EntityTx>,
    pub prev_frame_hash: Hash,
    pub pending_proposal: Option<EntityFrame>,
    precommits: BTreeMap<SignerId, Vec<u8>>,
}

impl EntityReplica {
    pub fn new(entity_id: EntityId, signer_id: SignerId, state: EntityState) -> Self {
        Self {
            entity_id,
            signer_id,
            state,
            mempool: Vec::new(),
            prev_frame_hash: keccak256(&[]),
            pending_proposal: None,
            precommits: BTreeMap::new(),
        }
    }

    pub fn is_proposer(&self) -> bool {
        self.state.quorum.proposer() == Some(self.signer_id)
    }

    pub fn enqueue(&mut self, tx: EntityTx) {
        self.mempool.push(tx);
    }

    /// idle -> proposed, or an immediate commit under the single-signer
    /// short-circuit. No-op for non-proposers or an empty mempool.
    pub fn tick(
        &mut self,
        now_ms: i64,
        my_key: &SigningKey,
    ) -> Result<(Vec<ReplicaMessage>, Vec<EntityOutput>), CoreError> {
        if !self.is_proposer() || self.mempool.is_empty() || self.pending_proposal.is_some() {
            return Ok((Vec::new(), Vec::new()));
        }
        let txs = std::mem::take(&mut self.mempool);
        let (committed_txs, outputs) = self.apply_each(txs);
        if committed_txs.is_empty() {
            return Ok((Vec::new(), outputs));
        }
        let frame = EntityFrame::build(self.state.height + 1, now_ms, committed_txs, self.prev_frame_hash, self.state.accounts_root());
        let signature = my_key.sign(&frame.state_hash).to_bytes().to_vec();

        if self.state.quorum.is_sufficient_alone(self.signer_id) {
            debug!(height = frame.height, "single-signer short-circuit commit");
            self.commit(&frame);
            return Ok((
                vec![ReplicaMessage::Commit {
                    height: frame.height,
                    state_hash: frame.state_hash,
                }],
                outputs,
            ));
        }

        self.precommits.insert(self.signer_id, signature.clone());
        self.pending_proposal = Some(frame.clone());
        Ok((
            vec![ReplicaMessage::Propose {
                frame,
                proposer: self.signer_id,
                signature,
            }],
            outputs,
        ))
    }

    /// Apply each tx independently; a failing tx is excluded from the
    /// frame and reported as an error output, but does not block the rest
    /// (spec §4.1's "single malformed input never halts" posture, applied
    /// at frame-building granularity since `EntityState` cannot cheaply be
    /// rolled back mid-frame).
    fn apply_each(&mut self, txs: Vec<EntityTx>) -> (Vec<EntityTx>, Vec<EntityOutput>) {
        let mut committed = Vec::new();
        let mut outputs = Vec::new();
        for tx in txs {
            match self.state.apply(&tx) {
                Ok(mut tx_outputs) => {
                    outputs.append(&mut tx_outputs);
                    committed.push(tx);
                }
                Err(error) => {
                    warn!(error = %error, "entity tx rejected, excluded from frame");
                    outputs.push(EntityOutput::Error {
                        signer: tx.signer().unwrap_or(self.signer_id),
                        error,
                    });
                }
            }
        }
        (committed, outputs)
    }

    fn commit(&mut self, frame: &EntityFrame) {
        self.state.height = frame.height;
        self.prev_frame_hash = frame.state_hash;
        self.pending_proposal = None;
        self.precommits.clear();
    }

    pub fn receive(
        &mut self,
        message: ReplicaMessage,
        my_key: &SigningKey,
    ) -> Result<(Vec<ReplicaMessage>, Vec<EntityOutput>), CoreError> {
        match message {
            ReplicaMessage::Propose {
                frame,
                proposer,
                signature,
            } => self.handle_propose(frame, proposer, &signature, my_key),
            ReplicaMessage::Precommit {
                height,
                state_hash,
                signer,
                signature,
            } => self.handle_precommit(height, state_hash, signer, &signature),
            ReplicaMessage::Commit { height, state_hash } => {
                self.handle_commit(height, state_hash)
            }
        }
    }

    fn handle_propose(
        &mut self,
        frame: EntityFrame,
        proposer: SignerId,
        signature: &[u8],
        my_key: &SigningKey,
    ) -> Result<(Vec<ReplicaMessage>, Vec<EntityOutput>), CoreError> {
        if Some(proposer) != self.state.quorum.proposer() {
            return Err(CoreError::Unauthorized {
                signer: proposer.to_string(),
            });
        }
        if frame.prev_frame_hash != self.prev_frame_hash {
            return Err(CoreError::StateHashMismatch {
                expected: hex::encode(self.prev_frame_hash),
                computed: hex::encode(frame.prev_frame_hash),
            });
        }
        let proposer_key = &self
            .state
            .quorum
            .signers
            .get(&proposer)
            .ok_or_else(|| CoreError::Unauthorized {
                signer: proposer.to_string(),
            })?
            .key;
        verify_signature(proposer_key, &frame.state_hash, signature)?;
        if frame.recompute_hash() != frame.state_hash {
            return Err(CoreError::StateHashMismatch {
                expected: hex::encode(frame.recompute_hash()),
                computed: hex::encode(frame.state_hash),
            });
        }
        // Re-apply every tx the proposer committed; our own state must be
        // in sync, so this should never fail in the honest case.
        let mut outputs = Vec::new();
        for tx in &frame.txs {
            outputs.append(&mut self.state.apply(tx)?);
        }
        // Now that txs are applied, the frame's claimed accounts_root must
        // match what re-applying actually produced (spec §4.2's peer check
        // "re-applying the frame yields the same state hash" — made
        // meaningful because accounts_root commits to resulting state).
        let recomputed_accounts_root = self.state.accounts_root();
        if recomputed_accounts_root != frame.accounts_root {
            return Err(CoreError::StateHashMismatch {
                expected: hex::encode(recomputed_accounts_root),
                computed: hex::encode(frame.accounts_root),
            });
        }

        let my_signature = my_key.sign(&frame.state_hash).to_bytes().to_vec();
        self.pending_proposal = Some(frame.clone());
        self.precommits.insert(self.signer_id, my_signature.clone());
        Ok((
            vec![ReplicaMessage::Precommit {
                height: frame.height,
                state_hash: frame.state_hash,
                signer: self.signer_id,
                signature: my_signature,
            }],
            outputs,
        ))
    }

    fn handle_precommit(
        &mut self,
        height: u64,
        state_hash: Hash,
        signer: SignerId,
        signature: &[u8],
    ) -> Result<(Vec<ReplicaMessage>, Vec<EntityOutput>), CoreError> {
        let Some(proposal) = &self.pending_proposal else {
            return Ok((Vec::new(), Vec::new()));
        };
        if proposal.height != height || proposal.state_hash != state_hash {
            return Err(CoreError::StateHashMismatch {
                expected: hex::encode(proposal.state_hash),
                computed: hex::encode(state_hash),
            });
        }
        let signer_key = &self
            .state
            .quorum
            .signers
            .get(&signer)
            .ok_or_else(|| CoreError::Unauthorized {
                signer: signer.to_string(),
            })?
            .key;
        verify_signature(signer_key, &state_hash, signature)?;
        self.precommits.insert(signer, signature.to_vec());

        let power = self.state.quorum.power_of_set(self.precommits.keys().copied());
        if power >= self.state.quorum.threshold {
            let frame = proposal.clone();
            self.commit(&frame);
            return Ok((vec![ReplicaMessage::Commit { height, state_hash }], Vec::new()));
        }
        Ok((Vec::new(), Vec::new()))
    }

    fn handle_commit(
        &mut self,
        height: u64,
        state_hash: Hash,
    ) -> Result<(Vec<ReplicaMessage>, Vec<EntityOutput>), CoreError> {
        let Some(proposal) = &self.pending_proposal else {
            // Already committed locally (we were the proposer, or we
            // short-circuited); nothing further to do.
            if self.state.height == height {
                return Ok((Vec::new(), Vec::new()));
            }
            return Err(CoreError::StateHashMismatch {
                expected: format!("height {}", self.state.height),
                computed: format!("height {height}"),
            });
        };
        if proposal.height != height || proposal.state_hash != state_hash {
            return Err(CoreError::StateHashMismatch {
                expected: hex::encode(proposal.state_hash),
                computed: hex::encode(state_hash),
            });
        }
        let frame = proposal.clone();
        self.commit(&frame);
        Ok((Vec::new(), Vec::new()))
    }
}

fn verify_signature(
    key: &ed25519_dalek::VerifyingKey,
    message: &Hash,
    signature: &[u8],
) -> Result<(), CoreError> {
    let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| CoreError::InvalidSignature)?;
    let sig = Signature::from_bytes(&sig_bytes);
    key.verify(message, &sig).map_err(|_| CoreError::InvalidSignature)
}
