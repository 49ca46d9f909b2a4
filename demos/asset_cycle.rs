//! End-to-end walkthrough of a bilateral account's life cycle: open, pay
//! within the RCPAN bound, get rejected outside it, and settle.
//!
//! Run with:
//!   cargo run -p xln-node --example asset_cycle

use std::collections::BTreeMap;

use ed25519_dalek::SigningKey;
use num_bigint::BigInt;
use rand::rngs::OsRng;
use xln_entity::{EntityState, EntityTx, QuorumConfig, SignerInfo};
use xln_persistence::Wal;
use xln_runtime::{RoutedInput, TickScheduler};
use xln_types::{EntityId, SignerId, TokenId};

fn main() {
    tracing_subscriber::fmt::init();

    let dir = tempfile::tempdir().expect("tempdir");
    let wal = Wal::open(dir.path().join("wal.log")).expect("open wal");
    let mut scheduler = TickScheduler::new(wal, dir.path().join("snapshots"), 100);

    let a = EntityId::from_slice(&[0xA1]);
    let b = EntityId::from_slice(&[0xB2]);
    let signer_a = SignerId::from_slice(&[0xA1]);
    let signer_b = SignerId::from_slice(&[0xB2]);
    let key_a = SigningKey::generate(&mut OsRng);
    let key_b = SigningKey::generate(&mut OsRng);

    let verifying_a = key_a.verifying_key();
    let verifying_b = key_b.verifying_key();

    let mut state_a = EntityState::new(a, QuorumConfig {
        signers: BTreeMap::from([(signer_a, SignerInfo { power: 1, key: verifying_a })]),
        threshold: 1,
    });
    state_a.register_peer_key(b, verifying_b);
    scheduler.register_replica(a, signer_a, key_a, state_a);

    let mut state_b = EntityState::new(b, QuorumConfig {
        signers: BTreeMap::from([(signer_b, SignerInfo { power: 1, key: verifying_b })]),
        threshold: 1,
    });
    state_b.register_peer_key(a, verifying_a);
    scheduler.register_replica(b, signer_b, key_b, state_b);

    println!("== opening account A -> B ==");
    scheduler.process(
        vec![RoutedInput {
            destination: a,
            tx: EntityTx::OpenAccount {
                signer: signer_a,
                nonce: 1,
                counterparty: b,
            },
        }],
        0,
    );
    println!("A has account with B: {}", scheduler.replica(a).unwrap().state.accounts.contains_key(&b));

    println!("\n== direct payment within RCPAN bounds (500_000 of a 1_000_000 credit line) ==");
    let outputs = scheduler.process(
        vec![RoutedInput {
            destination: a,
            tx: EntityTx::DirectPayment {
                signer: signer_a,
                nonce: 2,
                token: TokenId(1),
                amount: BigInt::from(500_000),
                to: b,
                description: "invoice #1".to_string(),
            },
        }],
        100,
    );
    println!("outputs: {} (empty means the frame committed cleanly)", outputs.len());

    println!("\n== direct payment past the credit line (rejected with RCPANViolation) ==");
    let outputs = scheduler.process(
        vec![RoutedInput {
            destination: a,
            tx: EntityTx::DirectPayment {
                signer: signer_a,
                nonce: 3,
                token: TokenId(1),
                amount: BigInt::from(10_000_000),
                to: b,
                description: "too much".to_string(),
            },
        }],
        200,
    );
    for routed in &outputs {
        println!("rejected as expected: {:?}", routed.output);
    }

    println!("\nfinal height: {}", scheduler.height());
}
