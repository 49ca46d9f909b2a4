use std::collections::BTreeMap;

use ed25519_dalek::SigningKey;
use num_bigint::BigInt;
use rand::rngs::OsRng;
use xln_entity::{EntityState, EntityTx, QuorumConfig, SignerInfo};
use xln_persistence::Wal;
use xln_routing::GossipGraph;
use xln_runtime::{RoutedInput, TickScheduler};
use xln_types::{EntityId, SignerId, TokenId};

fn entity(b: u8) -> EntityId {
    EntityId::from_slice(&[b])
}

fn signer(b: u8) -> (SignerId, SigningKey) {
    (SignerId::from_slice(&[b]), SigningKey::generate(&mut OsRng))
}

fn single_signer_quorum(signer_id: SignerId, key: &SigningKey) -> QuorumConfig {
    QuorumConfig {
        signers: BTreeMap::from([(signer_id, SignerInfo { power: 1, key: key.verifying_key() })]),
        threshold: 1,
    }
}

/// A -> H -> B: A has no direct account with B, only with H, and H has one
/// with B. A's direct payment must resolve the gossip path, forward through
/// H, and land on B with the correct sign on both hops.
#[test]
fn payment_forwards_through_an_intermediary_with_the_right_sign_on_both_hops() {
    let dir = tempfile::tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.log")).unwrap();
    let mut scheduler = TickScheduler::new(wal, dir.path().join("snapshots"), 100);

    let a = entity(1);
    let h = entity(2);
    let b = entity(3);
    let (sa, ka) = signer(1);
    let (sh, kh) = signer(2);
    let (sb, kb) = signer(3);

    let mut graph = GossipGraph::new();
    graph.add_edge(a, h);
    graph.add_edge(h, b);

    let mut state_a = EntityState::new(a, single_signer_quorum(sa, &ka)).with_route_finder(Box::new(graph));
    state_a.register_peer_key(h, kh.verifying_key());
    scheduler.register_replica(a, sa, ka.clone(), state_a);

    let mut state_h = EntityState::new(h, single_signer_quorum(sh, &kh));
    state_h.register_peer_key(a, ka.verifying_key());
    state_h.register_peer_key(b, kb.verifying_key());
    scheduler.register_replica(h, sh, kh.clone(), state_h);

    let mut state_b = EntityState::new(b, single_signer_quorum(sb, &kb));
    state_b.register_peer_key(h, kh.verifying_key());
    scheduler.register_replica(b, sb, kb, state_b);

    scheduler.process(
        vec![RoutedInput {
            destination: a,
            tx: EntityTx::OpenAccount { signer: sa, nonce: 1, counterparty: h },
        }],
        0,
    );
    scheduler.process(
        vec![RoutedInput {
            destination: h,
            tx: EntityTx::OpenAccount { signer: sh, nonce: 1, counterparty: b },
        }],
        1,
    );

    scheduler.process(
        vec![RoutedInput {
            destination: a,
            tx: EntityTx::DirectPayment {
                signer: sa,
                nonce: 2,
                token: TokenId(1),
                amount: BigInt::from(100_000),
                to: b,
                description: "multi-hop".to_string(),
            },
        }],
        2,
    );
    // The A -> H hop settles within the payment's own tick; the H -> B
    // continuation is enqueued mid-tick but only proposed on H's next
    // account-propose sweep.
    for (i, ts) in (3..6).enumerate() {
        scheduler.process(vec![], ts + i as i64);
    }

    let ah_delta = scheduler.replica(h).unwrap().state.accounts[&a].deltas[&TokenId(1)].clone();
    assert_eq!(ah_delta.off_delta, BigInt::from(-100_000), "A gave away the full amount on the A-H hop");

    let hb_delta = scheduler.replica(b).unwrap().state.accounts[&h].deltas[&TokenId(1)].clone();
    // H forwards amount minus its fee (max(amount/1000, 1) = 100), and the
    // sign must still read "H paid B", not flipped to "B paid H" (the bug
    // this test guards against: the forwarded route used to start at the
    // next hop instead of the forwarder, which made `route.first()`
    // resolve to the wrong party on the second hop).
    assert_eq!(hb_delta.off_delta, BigInt::from(-99_900), "H forwarded the fee-adjusted amount to B with the correct sign");
}
