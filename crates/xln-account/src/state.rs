//! The bilateral account state machine itself (spec §4.3).
//!
//! Each of the two entities sharing an [`AccountKey`] keeps its own
//! `AccountState` for that counterparty; the two copies are brought into
//! agreement purely by exchanging signed [`AccountInput`]s. There is no
//! shared mutable state between them.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use num_bigint::BigInt;
use tracing::{debug, warn};
use xln_merkle::Hash;
use xln_rcpan::{update_delta, Change};
use xln_types::{AccountKey, CoreError, Delta, EntityId, TokenId};

use crate::fees::{FeeSchedule, FixedFeeSchedule};
use crate::frame::AccountFrame;
use crate::tx::AccountTx;

/// A newly proposed or committed frame, signed by its proposer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignedFrame {
    pub frame: AccountFrame,
    pub signature: Vec<u8>,
}

/// Acknowledgement of a counterparty's frame: our signature over the state
/// hash we independently recomputed for it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccountAck {
    pub height: u64,
    pub state_hash: Hash,
    pub signature: Vec<u8>,
}

/// The message exchanged between the two sides of an account (spec §4.3,
/// "Inputs"). May carry a proposal, an ack, or both; `counter` enforces
/// strict per-direction ordering.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccountInput {
    pub from: EntityId,
    pub to: EntityId,
    pub counter: u64,
    pub new_frame: Option<SignedFrame>,
    pub ack: Option<AccountAck>,
}

/// Left on an account by a committed `direct_payment` whose route extends
/// beyond this entity (spec §4.3, "Multi-hop forwarding"). The E-machine
/// drains this field and enqueues the continuation on the next-hop account.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PendingForward {
    pub token: TokenId,
    pub amount: BigInt,
    pub remaining_route: Vec<EntityId>,
    pub description: String,
}

/// One replica's view of a bilateral account.
pub struct AccountState {
    pub key: AccountKey,
    pub my_entity: EntityId,
    pub deltas: BTreeMap<TokenId, Delta>,
    pub mempool: Vec<AccountTx>,
    /// Height of the last committed frame; 0 before any frame exists.
    pub height: u64,
    pub prev_frame_hash: Hash,
    pub history: Vec<AccountFrame>,
    /// A frame this replica proposed and is waiting to see acked.
    pub outgoing: Option<SignedFrame>,
    pub send_counter: u64,
    pub receive_counter: u64,
    pub rollback_count: u64,
    pub pending_forward: Option<PendingForward>,
    pub fee_schedule: Box<dyn FeeSchedule>,
}

impl AccountState {
    pub fn new(key: AccountKey, my_entity: EntityId) -> Self {
        Self {
            key,
            my_entity,
            deltas: BTreeMap::new(),
            mempool: Vec::new(),
            height: 0,
            prev_frame_hash: xln_merkle::keccak256(&[]),
            history: Vec::new(),
            outgoing: None,
            send_counter: 0,
            receive_counter: 0,
            rollback_count: 0,
            pending_forward: None,
            fee_schedule: Box::new(FixedFeeSchedule),
        }
    }

    pub fn is_left(&self) -> bool {
        self.key.is_left(self.my_entity)
    }

    pub fn peer(&self) -> EntityId {
        self.key
            .counterparty(self.my_entity)
            .expect("my_entity is always one side of its own key")
    }

    pub fn enqueue(&mut self, tx: AccountTx) {
        self.mempool.push(tx);
    }

    /// idle -> proposed (spec §4.3 state table, row 1). No-op if the
    /// mempool is empty or a proposal is already outstanding.
    pub fn propose(
        &mut self,
        signer: &SigningKey,
        now_ms: i64,
    ) -> Result<Option<AccountInput>, CoreError> {
        if self.mempool.is_empty() || self.outgoing.is_some() {
            return Ok(None);
        }
        let txs = std::mem::take(&mut self.mempool);
        let (deltas, forward) = match self.apply_txs(&txs) {
            Ok(result) => result,
            Err(err) => {
                // Abort the frame, not the channel: the txs are lost from
                // this attempt (spec says "invalid mutations abort the
                // frame"); the caller may re-submit a corrected tx.
                warn!(error = %err, "account frame aborted, mutation rejected");
                return Err(err);
            }
        };
        let token_ids: Vec<TokenId> = deltas.keys().copied().collect();
        let delta_values: Vec<Delta> = token_ids.iter().map(|t| deltas[t].clone()).collect();
        let frame = AccountFrame::build(
            self.height + 1,
            now_ms,
            txs,
            self.prev_frame_hash,
            token_ids,
            delta_values,
        );
        let signature = signer.sign(&frame.state_hash).to_bytes().to_vec();
        self.send_counter += 1;
        let input = AccountInput {
            from: self.my_entity,
            to: self.peer(),
            counter: self.send_counter,
            new_frame: Some(SignedFrame {
                frame: frame.clone(),
                signature,
            }),
            ack: None,
        };
        self.outgoing = Some(SignedFrame {
            frame,
            signature: input.new_frame.as_ref().unwrap().signature.clone(),
        });
        self.pending_forward = self.pending_forward.take().or(forward);
        debug!(height = self.height + 1, "proposed account frame");
        Ok(Some(input))
    }

    /// Apply an [`AccountInput`] received from the counterparty, returning
    /// an `AccountInput` to send back (an ack, or nothing if the input was
    /// purely an ack itself).
    pub fn receive(
        &mut self,
        input: AccountInput,
        my_signer: &SigningKey,
        peer_key: &VerifyingKey,
    ) -> Result<Option<AccountInput>, CoreError> {
        if input.counter != self.receive_counter + 1 {
            return Err(CoreError::CounterMismatch {
                expected: self.receive_counter + 1,
                actual: input.counter,
            });
        }

        let mut reply = None;
        if let Some(ack) = &input.ack {
            reply = self.handle_ack(ack, peer_key)?;
        }
        if let Some(signed) = input.new_frame {
            reply = self.handle_incoming_frame(signed, peer_key, my_signer)?;
        }
        self.receive_counter = input.counter;
        Ok(reply)
    }

    fn handle_ack(
        &mut self,
        ack: &AccountAck,
        peer_key: &VerifyingKey,
    ) -> Result<Option<AccountInput>, CoreError> {
        let outgoing = self.outgoing.as_ref().ok_or(CoreError::StateHashMismatch {
            expected: "no outstanding proposal".into(),
            computed: format!("ack for height {}", ack.height),
        })?;
        if ack.height != outgoing.frame.height || ack.state_hash != outgoing.frame.state_hash {
            return Err(CoreError::StateHashMismatch {
                expected: hex::encode(outgoing.frame.state_hash),
                computed: hex::encode(ack.state_hash),
            });
        }
        verify_signature(peer_key, &ack.state_hash, &ack.signature)?;

        let SignedFrame { frame, .. } = self.outgoing.take().unwrap();
        self.commit(frame);
        Ok(None)
    }

    fn handle_incoming_frame(
        &mut self,
        signed: SignedFrame,
        peer_key: &VerifyingKey,
        my_signer: &SigningKey,
    ) -> Result<Option<AccountInput>, CoreError> {
        if let Some(mine) = &self.outgoing {
            if mine.frame.height == signed.frame.height {
                // Concurrent-proposal tie-break (spec §4.3): left always
                // wins. The losing side discards its own proposal, counts a
                // rollback, and requeues its txs to resubmit next round.
                if self.is_left() {
                    debug!("ignoring conflicting frame from right; our proposal is canonical");
                    return Ok(None);
                }
                let discarded = self.outgoing.take().unwrap();
                self.rollback_count += 1;
                self.mempool.splice(0..0, discarded.frame.txs);
                warn!(
                    rollback_count = self.rollback_count,
                    "discarded our proposal in favor of left's canonical frame"
                );
            }
        }

        verify_signature(peer_key, &signed.frame.state_hash, &signed.signature)?;
        if signed.frame.height != self.height + 1 {
            return Err(CoreError::StateHashMismatch {
                expected: format!("height {}", self.height + 1),
                computed: format!("height {}", signed.frame.height),
            });
        }
        if signed.frame.prev_frame_hash != self.prev_frame_hash {
            return Err(CoreError::StateHashMismatch {
                expected: hex::encode(self.prev_frame_hash),
                computed: hex::encode(signed.frame.prev_frame_hash),
            });
        }
        let recomputed = signed.frame.recompute_hash();
        if recomputed != signed.frame.state_hash {
            return Err(CoreError::StateHashMismatch {
                expected: hex::encode(recomputed),
                computed: hex::encode(signed.frame.state_hash),
            });
        }
        // Re-derive the deltas ourselves rather than trusting the
        // counterparty's: replaying through RCPAN is what makes the frame
        // trustworthy, not the signature alone.
        let (deltas, forward) = self.apply_txs(&signed.frame.txs)?;
        for (token, expected) in signed.frame.token_ids.iter().zip(signed.frame.deltas.iter()) {
            if deltas.get(token) != Some(expected) {
                return Err(CoreError::StateHashMismatch {
                    expected: format!("{:?}", expected),
                    computed: format!("{:?}", deltas.get(token)),
                });
            }
        }

        let ack_signature = my_signer.sign(&signed.frame.state_hash).to_bytes().to_vec();
        self.pending_forward = self.pending_forward.take().or(forward);
        self.commit(signed.frame.clone());

        self.send_counter += 1;
        Ok(Some(AccountInput {
            from: self.my_entity,
            to: self.peer(),
            counter: self.send_counter,
            new_frame: None,
            ack: Some(AccountAck {
                height: signed.frame.height,
                state_hash: signed.frame.state_hash,
                signature: ack_signature,
            }),
        }))
    }

    fn commit(&mut self, frame: AccountFrame) {
        self.height = frame.height;
        self.prev_frame_hash = frame.state_hash;
        for (token, delta) in frame.token_ids.iter().zip(frame.deltas.iter()) {
            self.deltas.insert(*token, delta.clone());
        }
        self.history.push(frame);
    }

    /// Replay `txs` against a copy of the current deltas, returning the
    /// resulting per-token map and any multi-hop continuation discovered.
    /// Does not mutate `self` — the caller commits only once a frame is
    /// fully agreed.
    fn apply_txs(
        &self,
        txs: &[AccountTx],
    ) -> Result<(BTreeMap<TokenId, Delta>, Option<PendingForward>), CoreError> {
        let mut deltas = self.deltas.clone();
        let mut forward = None;
        for tx in txs {
            forward = self.apply_tx(&mut deltas, tx)?.or(forward);
        }
        Ok((deltas, forward))
    }

    fn apply_tx(
        &self,
        deltas: &mut BTreeMap<TokenId, Delta>,
        tx: &AccountTx,
    ) -> Result<Option<PendingForward>, CoreError> {
        match tx {
            AccountTx::AddDelta { token } => {
                deltas.entry(*token).or_insert_with(Delta::empty);
                Ok(None)
            }
            AccountTx::SetCreditLimit { token, side, amount } => {
                let current = deltas.entry(*token).or_insert_with(Delta::empty);
                let updated = update_delta(
                    current,
                    &Change::SetCreditLimit {
                        side: *side,
                        amount: amount.clone(),
                    },
                )?;
                *current = updated;
                Ok(None)
            }
            AccountTx::SetAllowance {
                token,
                left_allowance,
                right_allowance,
            } => {
                let current = deltas.entry(*token).or_insert_with(Delta::empty);
                current.allowance = Some(xln_types::Allowance {
                    left_allowance: left_allowance.clone(),
                    right_allowance: right_allowance.clone(),
                });
                Ok(None)
            }
            AccountTx::SettlementAck { token, .. } => {
                deltas.entry(*token).or_insert_with(Delta::empty);
                Ok(None)
            }
            AccountTx::DirectPayment {
                token,
                amount,
                route,
                from,
                to: _,
                description,
            } => {
                let current = deltas.entry(*token).or_insert_with(Delta::empty);
                // The sender on *this* hop is always route's first entry:
                // a forwarded payment's route has already been trimmed down
                // to start at the forwarding entity (spec §4.3, "Multi-hop
                // forwarding"). This must not depend on which replica
                // (self) is doing the computing, or the two sides would
                // disagree about the resulting state hash.
                let sender_is_left = self.key.is_left(*route.first().unwrap_or(from));
                let signed_amount = if sender_is_left { -amount.clone() } else { amount.clone() };
                let updated = update_delta(current, &Change::AdjustOffDelta(signed_amount))?;
                *current = updated;

                // Only a strictly-intermediary entity (not the originator at
                // pos 0) with a hop still ahead of it forwards; the
                // remaining route starts at *this* entity, not the next one,
                // so the next hop's `apply_tx` can still read its own
                // position as route's first entry (spec §4.3).
                let forward = route
                    .iter()
                    .position(|e| *e == self.my_entity)
                    .filter(|&pos| pos > 0 && pos + 1 < route.len())
                    .map(|pos| PendingForward {
                        token: *token,
                        amount: amount - self.fee_schedule.fee(amount),
                        remaining_route: route[pos..].to_vec(),
                        description: description.clone(),
                    });
                Ok(forward)
            }
        }
    }

    /// Drain the multi-hop continuation, if any, for the E-machine to
    /// forward onto the next account.
    pub fn take_pending_forward(&mut self) -> Option<PendingForward> {
        self.pending_forward.take()
    }
}

fn verify_signature(key: &VerifyingKey, message: &Hash, signature: &[u8]) -> Result<(), CoreError> {
    let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| CoreError::InvalidSignature)?;
    let sig = Signature::from_bytes(&sig_bytes);
    key.verify(message, &sig).map_err(|_| CoreError::InvalidSignature)
}
