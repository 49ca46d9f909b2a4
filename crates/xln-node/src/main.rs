//! xln-node — the tick-scheduler daemon binary.
//!
//! Wires a [`xln_runtime::TickScheduler`] to durable storage and runs it
//! forward in real time. There is no network/API surface here (spec §6 scopes
//! the CLI/environment surface to scheduler configuration only); this binary
//! provisions a couple of local entities and drives them through the
//! bilateral-open-then-payment scenario so the WAL and snapshot pipeline has
//! something to exercise end to end.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use ed25519_dalek::SigningKey;
use num_bigint::BigInt;
use rand::rngs::OsRng;
use tracing::info;
use xln_entity::{EntityState, EntityTx, QuorumConfig, SignerInfo};
use xln_persistence::Wal;
use xln_runtime::{RoutedInput, TickScheduler};
use xln_types::{EntityId, SignerId, TokenId};

/// Scheduler configuration, read from the environment with CLI overrides
/// (spec §6's "CLI/environment surface").
#[derive(Debug, Clone)]
struct Config {
    tick_ms: u64,
    snapshot_interval: u64,
    storage_path: PathBuf,
    log_level: String,
    enable_metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_ms: std::env::var("XLN_TICK_MS").ok().and_then(|s| s.parse().ok()).unwrap_or(100),
            snapshot_interval: std::env::var("XLN_SNAPSHOT_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            storage_path: std::env::var("XLN_STORAGE_PATH").unwrap_or_else(|_| "./xln-data".to_string()).into(),
            log_level: std::env::var("XLN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            enable_metrics: std::env::var("XLN_ENABLE_METRICS").ok().and_then(|s| s.parse().ok()).unwrap_or(false),
        }
    }
}

impl Config {
    fn from_env() -> Self {
        Self::default()
    }
}

/// xln — runs the tick scheduler for a local set of entity replicas.
#[derive(Parser, Debug)]
#[command(name = "xln")]
#[command(author = "XLN Contributors")]
#[command(version)]
#[command(about = "XLN consensus core tick scheduler", long_about = None)]
struct Args {
    /// Number of ticks to run before exiting. 0 runs until Ctrl-C.
    #[arg(long, default_value = "10")]
    ticks: u64,

    /// Override XLN_STORAGE_PATH.
    #[arg(long)]
    storage_path: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(path) = args.storage_path {
        config.storage_path = path;
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    info!(?config, "starting xln tick scheduler");
    if config.enable_metrics {
        info!("metrics collection requested but no exporter is wired up in this build");
    }

    std::fs::create_dir_all(&config.storage_path)?;
    let wal = Wal::open(config.storage_path.join("wal.log"))?;
    let snapshot_dir = config.storage_path.join("snapshots");
    let mut scheduler = TickScheduler::new(wal, snapshot_dir, config.snapshot_interval);

    let (a, b) = bootstrap_demo_entities(&mut scheduler);

    let mut tick = 0u64;
    let mut timestamp_ms: i64 = 0;
    loop {
        let inputs = demo_inputs_for_tick(tick, a, b);
        let outputs = scheduler.process(inputs, timestamp_ms);
        for routed in &outputs {
            info!(origin = %routed.origin, output = ?routed.output, height = scheduler.height(), "tick output");
        }
        tick += 1;
        timestamp_ms += config.tick_ms as i64;
        if args.ticks != 0 && tick >= args.ticks {
            break;
        }
    }

    info!(height = scheduler.height(), "xln tick scheduler stopped");
    Ok(())
}

/// Provision two single-signer entities so the demo loop below has somewhere
/// to send `registerEntity`/`openAccount`/`directPayment` (spec §8 scenarios
/// 1 and 2).
fn bootstrap_demo_entities(scheduler: &mut TickScheduler) -> (EntityId, EntityId) {
    let a = EntityId::from_slice(&[0x01]);
    let b = EntityId::from_slice(&[0x02]);
    let signer_a = SignerId::from_slice(&[0x01]);
    let signer_b = SignerId::from_slice(&[0x02]);
    let key_a = SigningKey::generate(&mut OsRng);
    let key_b = SigningKey::generate(&mut OsRng);

    let quorum_a = QuorumConfig {
        signers: BTreeMap::from([(signer_a, SignerInfo { power: 1, key: key_a.verifying_key() })]),
        threshold: 1,
    };
    let mut state_a = EntityState::new(a, quorum_a);
    state_a.register_peer_key(b, key_b.verifying_key());
    scheduler.register_replica(a, signer_a, key_a.clone(), state_a);

    let quorum_b = QuorumConfig {
        signers: BTreeMap::from([(signer_b, SignerInfo { power: 1, key: key_b.verifying_key() })]),
        threshold: 1,
    };
    let mut state_b = EntityState::new(b, quorum_b);
    state_b.register_peer_key(a, key_a.verifying_key());
    scheduler.register_replica(b, signer_b, key_b, state_b);

    (a, b)
}

/// Tick 0 opens the account; tick 1 sends a payment over it. Every later
/// tick is idle, just advancing height and letting the auto-propose/account
/// sweeps settle any in-flight frames.
fn demo_inputs_for_tick(tick: u64, a: EntityId, b: EntityId) -> Vec<RoutedInput> {
    let signer_a = SignerId::from_slice(&[0x01]);
    match tick {
        0 => vec![RoutedInput {
            destination: a,
            tx: EntityTx::OpenAccount {
                signer: signer_a,
                nonce: 1,
                counterparty: b,
            },
        }],
        1 => vec![RoutedInput {
            destination: a,
            tx: EntityTx::DirectPayment {
                signer: signer_a,
                nonce: 2,
                token: TokenId(1),
                amount: BigInt::from(500_000),
                to: b,
                description: "demo payment".to_string(),
            },
        }],
        _ => vec![],
    }
}
