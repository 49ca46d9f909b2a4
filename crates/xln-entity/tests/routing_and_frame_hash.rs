use std::collections::BTreeMap;

use ed25519_dalek::SigningKey;
use num_bigint::BigInt;
use rand::rngs::OsRng;
use xln_entity::{EntityFrame, EntityState, EntityTx, QuorumConfig, SignerInfo};
use xln_routing::GossipGraph;
use xln_types::{CoreError, EntityId, SignerId, TokenId};

fn entity(b: u8) -> EntityId {
    EntityId::from_slice(&[b])
}

fn signer(b: u8) -> (SignerId, SigningKey) {
    (SignerId::from_slice(&[b]), SigningKey::generate(&mut OsRng))
}

fn single_signer(signer_id: SignerId, key: &SigningKey) -> QuorumConfig {
    QuorumConfig {
        signers: BTreeMap::from([(signer_id, SignerInfo { power: 1, key: key.verifying_key() })]),
        threshold: 1,
    }
}

#[test]
fn direct_payment_with_no_account_and_no_gossip_route_is_rejected() {
    let (signer_id, key) = signer(1);
    let a = entity(1);
    let b = entity(2);
    let mut state = EntityState::new(a, single_signer(signer_id, &key));

    let result = state.apply(&EntityTx::DirectPayment {
        signer: signer_id,
        nonce: 1,
        token: TokenId(1),
        amount: BigInt::from(10),
        to: b,
        description: "nowhere to go".to_string(),
    });

    assert!(matches!(result, Err(CoreError::NoRouteFound { .. })));
}

#[test]
fn direct_payment_resolves_a_gossip_path_to_a_non_neighbor() {
    let (signer_id, key) = signer(1);
    let a = entity(1);
    let h = entity(2);
    let b = entity(3);

    let mut graph = GossipGraph::new();
    graph.add_edge(a, h);
    graph.add_edge(h, b);

    let mut state = EntityState::new(a, single_signer(signer_id, &key)).with_route_finder(Box::new(graph));

    let outputs = state
        .apply(&EntityTx::DirectPayment {
            signer: signer_id,
            nonce: 1,
            token: TokenId(1),
            amount: BigInt::from(10),
            to: b,
            description: "via gossip".to_string(),
        })
        .expect("a route through h exists");
    assert!(outputs.is_empty());

    // The enqueued continuation lands on the account toward the first hop
    // (h), not toward the ultimate destination (b) — a's account_mut(b)
    // should not even exist yet.
    assert!(state.accounts.contains_key(&h));
    assert!(!state.accounts.contains_key(&b));
}

#[test]
fn entity_frame_hash_commits_to_resulting_account_state_not_just_its_inputs() {
    let prev = [0u8; 32];
    let mut root_before = [0u8; 32];
    root_before[0] = 1;
    let mut root_after = [0u8; 32];
    root_after[0] = 2;

    // Same height, timestamp, txs, and prev_frame_hash; only the post-apply
    // accounts_root differs (as it would between an honest frame and one
    // whose accounts silently diverged from the sender's). A state_hash
    // that ignored accounts_root would let these collide.
    let frame_a = EntityFrame::build(1, 0, vec![], prev, root_before);
    let frame_b = EntityFrame::build(1, 0, vec![], prev, root_after);

    assert_ne!(frame_a.state_hash, frame_b.state_hash);
    assert_eq!(frame_a.recompute_hash(), frame_a.state_hash);
}
