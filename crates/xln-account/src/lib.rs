//! Bilateral account state machine (spec §4.3): the two-of-two frame
//! protocol that keeps a pair of entities' `Delta`s in sync.

mod fees;
mod frame;
mod state;
mod tx;

pub use fees::{FeeSchedule, FixedFeeSchedule};
pub use frame::AccountFrame;
pub use state::{AccountAck, AccountInput, AccountState, PendingForward, SignedFrame};
pub use tx::AccountTx;

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use num_bigint::BigInt;
    use rand::rngs::OsRng;
    use xln_rcpan::Side;
    use xln_types::{AccountKey, EntityId, TokenId};

    fn pair() -> (EntityId, EntityId, AccountKey) {
        let a = EntityId::from_slice(&[1]);
        let b = EntityId::from_slice(&[2]);
        (a, b, AccountKey::new(a, b))
    }

    struct Rig {
        left: AccountState,
        right: AccountState,
        left_key: SigningKey,
        right_key: SigningKey,
    }

    impl Rig {
        fn new() -> Self {
            let (a, b, key) = pair();
            let left_entity = if key.is_left(a) { a } else { b };
            let right_entity = key.counterparty(left_entity).unwrap();
            Rig {
                left: AccountState::new(key, left_entity),
                right: AccountState::new(key, right_entity),
                left_key: SigningKey::generate(&mut OsRng),
                right_key: SigningKey::generate(&mut OsRng),
            }
        }

        fn open_credit(&mut self, token: TokenId, limit: i64) {
            self.left.enqueue(AccountTx::AddDelta { token });
            self.left.enqueue(AccountTx::SetCreditLimit {
                token,
                side: Side::Left,
                amount: BigInt::from(limit),
            });
            self.left.enqueue(AccountTx::SetCreditLimit {
                token,
                side: Side::Right,
                amount: BigInt::from(limit),
            });
            self.drive_round().unwrap();
        }

        /// Drive exactly one propose/ack round to completion, wherever the
        /// mempool-bearing side currently is. Returns an error if the
        /// underlying exchange rejects something.
        fn drive_round(&mut self) -> Result<(), xln_types::CoreError> {
            let proposer_is_left = !self.left.mempool.is_empty();
            let (proposal, from_left) = if proposer_is_left {
                (self.left.propose(&self.left_key, 1_000)?, true)
            } else {
                (self.right.propose(&self.right_key, 1_000)?, false)
            };
            let Some(input) = proposal else { return Ok(()) };

            if from_left {
                let ack = self
                    .right
                    .receive(input, &self.right_key, &self.left_key.verifying_key())?;
                if let Some(ack) = ack {
                    self.left
                        .receive(ack, &self.left_key, &self.right_key.verifying_key())?;
                }
            } else {
                let ack = self
                    .left
                    .receive(input, &self.left_key, &self.right_key.verifying_key())?;
                if let Some(ack) = ack {
                    self.right
                        .receive(ack, &self.right_key, &self.left_key.verifying_key())?;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn bilateral_open_converges_on_matching_state_hash() {
        let mut rig = Rig::new();
        rig.open_credit(TokenId(1), 1_000_000);
        assert_eq!(rig.left.height, 1);
        assert_eq!(rig.right.height, 1);
        assert_eq!(rig.left.prev_frame_hash, rig.right.prev_frame_hash);
        assert_eq!(rig.left.deltas[&TokenId(1)], rig.right.deltas[&TokenId(1)]);
    }

    #[test]
    fn direct_payment_under_rcpan_moves_the_delta_on_both_sides() {
        let mut rig = Rig::new();
        rig.open_credit(TokenId(1), 1_000_000);

        let (from, to) = (rig.left.my_entity, rig.right.my_entity);
        rig.left.enqueue(AccountTx::DirectPayment {
            token: TokenId(1),
            amount: BigInt::from(500_000),
            route: vec![from, to],
            from,
            to,
            description: "payment".into(),
        });
        rig.drive_round().unwrap();

        assert_eq!(rig.left.deltas[&TokenId(1)].net(), BigInt::from(-500_000));
        assert_eq!(rig.right.deltas[&TokenId(1)].net(), BigInt::from(-500_000));
    }

    #[test]
    fn payment_exceeding_rcpan_capacity_is_rejected_without_mutating_state() {
        let mut rig = Rig::new();
        rig.open_credit(TokenId(1), 1_000_000);

        let (from, to) = (rig.left.my_entity, rig.right.my_entity);
        rig.left.enqueue(AccountTx::DirectPayment {
            token: TokenId(1),
            amount: BigInt::from(2_000_000),
            route: vec![from, to],
            from,
            to,
            description: "too big".into(),
        });
        let before = rig.left.deltas.clone();
        let err = rig.drive_round().unwrap_err();
        assert!(matches!(err, xln_types::CoreError::RcpanViolation { .. }));
        assert_eq!(rig.left.deltas, before);
        assert!(rig.left.mempool.is_empty(), "the aborted frame's txs are not silently retried");
    }

    #[test]
    fn intermediary_forwards_with_remaining_route_starting_at_itself() {
        let mut rig = Rig::new();
        rig.open_credit(TokenId(1), 1_000_000);

        let (originator, intermediary) = (rig.left.my_entity, rig.right.my_entity);
        let destination = EntityId::from_slice(&[3]);
        rig.left.enqueue(AccountTx::DirectPayment {
            token: TokenId(1),
            amount: BigInt::from(100_000),
            route: vec![originator, intermediary, destination],
            from: originator,
            to: destination,
            description: "multi-hop".into(),
        });
        rig.drive_round().unwrap();

        // The originator (route position 0) never forwards.
        assert!(rig.left.pending_forward.is_none());
        // The intermediary does, and the remaining route starts at itself
        // so the next hop's own apply_tx can still read route.first() as
        // the party sending on that hop.
        let forward = rig.right.pending_forward.as_ref().expect("intermediary forwards");
        assert_eq!(forward.remaining_route, vec![intermediary, destination]);
        assert_eq!(forward.amount, BigInt::from(100_000) - BigInt::from(100));
    }

    #[test]
    fn concurrent_proposals_resolve_with_lefts_frame_canonical() {
        let mut rig = Rig::new();
        rig.open_credit(TokenId(1), 1_000_000);

        let (from, to) = (rig.left.my_entity, rig.right.my_entity);
        rig.left.enqueue(AccountTx::DirectPayment {
            token: TokenId(1),
            amount: BigInt::from(1_000),
            route: vec![from, to],
            from,
            to,
            description: "left's pay".into(),
        });
        rig.right.enqueue(AccountTx::SetAllowance {
            token: TokenId(1),
            left_allowance: BigInt::from(0),
            right_allowance: BigInt::from(0),
        });

        let left_proposal = rig.left.propose(&rig.left_key, 2_000).unwrap().unwrap();
        let right_proposal = rig.right.propose(&rig.right_key, 2_000).unwrap().unwrap();

        // Right receives left's frame while holding its own conflicting
        // proposal at the same height: it must discard its own.
        let ack_for_left = rig
            .right
            .receive(left_proposal, &rig.right_key, &rig.left_key.verifying_key())
            .unwrap();
        assert_eq!(rig.right.rollback_count, 1);
        assert_eq!(rig.right.height, 2, "right adopted left's canonical frame");

        // Left receives right's now-stale proposal; since left's own frame
        // is canonical, it simply ignores it.
        let reply = rig
            .left
            .receive(right_proposal, &rig.left_key, &rig.right_key.verifying_key())
            .unwrap();
        assert!(reply.is_none());
        assert_eq!(rig.left.height, 1, "left hasn't seen its own ack yet");

        let ack_for_left = ack_for_left.expect("right acks left's canonical frame");
        rig.left
            .receive(ack_for_left, &rig.left_key, &rig.right_key.verifying_key())
            .unwrap();
        assert_eq!(rig.left.height, 2);
        assert_eq!(rig.left.prev_frame_hash, rig.right.prev_frame_hash);

        // Right's discarded SetAllowance tx was requeued; it goes out next.
        assert!(!rig.right.mempool.is_empty());
    }
}
