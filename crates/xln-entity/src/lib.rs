//! Entity replica: per-replica mempool, block proposal, quorum consensus,
//! and the tx-apply contract for an XLN entity (spec §3, §4.2).

mod frame;
mod proposal;
mod quorum;
mod replica;
mod state;
mod tx;

pub use frame::EntityFrame;
pub use proposal::{Proposal, ProposalStatus};
pub use quorum::{QuorumConfig, SignerInfo};
pub use replica::{EntityReplica, ReplicaMessage};
pub use state::{EntityOutput, EntityState};
pub use tx::{EntityTx, JEvent, ProposalAction};

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use num_bigint::BigInt;
    use rand::rngs::OsRng;
    use xln_account::AccountTx;
    use xln_types::{EntityId, SignerId, TokenId};

    fn signer(b: u8) -> (SignerId, SigningKey) {
        let key = SigningKey::generate(&mut OsRng);
        (SignerId::from_slice(&[b]), key)
    }

    fn entity(b: u8) -> EntityId {
        EntityId::from_slice(&[b])
    }

    struct SoloRig {
        replica: EntityReplica,
        key: SigningKey,
    }

    impl SoloRig {
        fn new() -> Self {
            let (signer_id, key) = signer(1);
            let quorum = QuorumConfig::single_signer(signer_id, key.verifying_key());
            let entity_id = entity(1);
            let state = EntityState::new(entity_id, quorum);
            let replica = EntityReplica::new(entity_id, signer_id, state);
            Self { replica, key }
        }

        fn submit(&mut self, tx: EntityTx) -> Vec<EntityOutput> {
            self.replica.enqueue(tx);
            let (_, outputs) = self.replica.tick(0, &self.key).expect("tick succeeds");
            outputs
        }
    }

    #[test]
    fn single_signer_chat_commits_immediately() {
        let mut rig = SoloRig::new();
        let (signer_id, _) = signer(1);
        rig.submit(EntityTx::Chat {
            signer: signer_id,
            nonce: 1,
            message: "hello".to_string(),
        });
        assert_eq!(rig.replica.state.height, 1);
        assert_eq!(rig.replica.state.message_log, vec!["hello".to_string()]);
    }

    #[test]
    fn chat_message_too_long_is_rejected_as_an_error_output_not_a_tick_failure() {
        let mut rig = SoloRig::new();
        let (signer_id, _) = signer(1);
        let outputs = rig.submit(EntityTx::Chat {
            signer: signer_id,
            nonce: 1,
            message: "x".repeat(5_000),
        });
        assert!(matches!(outputs.as_slice(), [EntityOutput::Error { .. }]));
        assert_eq!(rig.replica.state.height, 0);
    }

    #[test]
    fn propose_and_vote_updates_quorum_once_threshold_clears() {
        let (s1, k1) = signer(1);
        let (s2, k2) = signer(2);
        let mut signers = std::collections::BTreeMap::new();
        signers.insert(s1, SignerInfo { power: 1, key: k1.verifying_key() });
        signers.insert(s2, SignerInfo { power: 1, key: k2.verifying_key() });
        let quorum = QuorumConfig { signers, threshold: 2 };
        let entity_id = entity(1);
        let state = EntityState::new(entity_id, quorum.clone());
        let mut replica = EntityReplica::new(entity_id, s1, state);

        let new_quorum = QuorumConfig::single_signer(s1, k1.verifying_key());
        replica.enqueue(EntityTx::Propose {
            signer: s1,
            nonce: 1,
            proposal_id: 1,
            action: ProposalAction::UpdateQuorum(new_quorum.clone()),
        });
        let (messages, _) = replica.tick(0, &k1).expect("tick succeeds");
        assert!(matches!(messages.as_slice(), [ReplicaMessage::Propose { .. }]));
        assert_eq!(replica.state.quorum.total_power(), 2);

        replica
            .state
            .apply(&EntityTx::Vote {
                signer: s2,
                nonce: 1,
                proposal_id: 1,
                approve: true,
            })
            .expect("vote applies");
        assert_eq!(replica.state.quorum.total_power(), new_quorum.total_power());
        assert_eq!(replica.state.proposals[&1].status, ProposalStatus::Executed);
    }

    #[test]
    fn open_account_then_direct_payment_dispatches_an_account_message() {
        let mut rig = SoloRig::new();
        let (signer_id, _) = signer(1);
        let counterparty = entity(2);
        rig.replica.state.register_peer_key(counterparty, rig.key.verifying_key());

        rig.submit(EntityTx::OpenAccount {
            signer: signer_id,
            nonce: 1,
            counterparty,
        });
        assert!(rig.replica.state.accounts.contains_key(&counterparty));

        let outputs = rig.submit(EntityTx::DirectPayment {
            signer: signer_id,
            nonce: 2,
            token: TokenId(0),
            amount: BigInt::from(10),
            to: counterparty,
            description: "coffee".to_string(),
        });
        assert!(outputs.is_empty());
        // Payment sits in the account mempool until the account itself ticks
        // (that cross-account propose/ack cycle is xln-account's concern);
        // here we only verify the entity enqueued it without erroring. The
        // account mempool also still holds open_account's placeholder txs.
        let mempool = &rig.replica.state.accounts[&counterparty].mempool;
        assert!(matches!(mempool.last(), Some(AccountTx::DirectPayment { .. })));
    }

    #[test]
    fn deposit_collateral_emits_a_settlement_batch_and_debits_the_reserve() {
        let mut rig = SoloRig::new();
        let (signer_id, _) = signer(1);
        let counterparty = entity(2);
        rig.replica
            .state
            .apply(&EntityTx::JEvent {
                event: JEvent::ReserveUpdated {
                    token: TokenId(0),
                    new_reserve: BigInt::from(1_000),
                },
            })
            .expect("reserve update applies");
        rig.submit(EntityTx::OpenAccount {
            signer: signer_id,
            nonce: 1,
            counterparty,
        });

        let outputs = rig.submit(EntityTx::DepositCollateral {
            signer: signer_id,
            nonce: 2,
            counterparty,
            token: TokenId(0),
            amount: BigInt::from(100),
        });
        assert!(matches!(outputs.as_slice(), [EntityOutput::SettlementBatch { .. }]));
        assert_eq!(rig.replica.state.reserves[&TokenId(0)], BigInt::from(900));
    }

    #[test]
    fn multi_signer_propose_precommit_commit_round_trips_through_messages() {
        let (s1, k1) = signer(1);
        let (s2, k2) = signer(2);
        let mut signers = std::collections::BTreeMap::new();
        signers.insert(s1, SignerInfo { power: 1, key: k1.verifying_key() });
        signers.insert(s2, SignerInfo { power: 1, key: k2.verifying_key() });
        let quorum = QuorumConfig { signers, threshold: 2 };
        let entity_id = entity(1);

        let mut proposer = EntityReplica::new(entity_id, s1, EntityState::new(entity_id, quorum.clone()));
        let mut follower = EntityReplica::new(entity_id, s2, EntityState::new(entity_id, quorum));

        proposer.enqueue(EntityTx::Chat {
            signer: s1,
            nonce: 1,
            message: "gm".to_string(),
        });
        let (messages, _) = proposer.tick(0, &k1).expect("tick succeeds");
        let propose = messages.into_iter().next().expect("a Propose message");

        let (precommits, _) = follower.receive(propose, &k2).expect("propose applies");
        let precommit = precommits.into_iter().next().expect("a Precommit message");

        let (commits, _) = proposer.receive(precommit, &k1).expect("precommit applies");
        let commit = commits.into_iter().next().expect("a Commit message");
        assert_eq!(proposer.state.height, 1);

        follower.receive(commit, &k2).expect("commit applies");
        assert_eq!(follower.state.height, 1);
        assert_eq!(follower.state.message_log, proposer.state.message_log);
    }
}
