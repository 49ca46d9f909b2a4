//! Tick scheduler (spec §4.1): drains inputs, appends them to the WAL,
//! dispatches to entity replicas, and advances the global height.
//!
//! A [`TickScheduler`] models one node's view of the replicas it locally
//! holds a signing key for. Propagating consensus messages between a
//! different node's replica of the same entity, and shipping this node's
//! outputs to its counterparties, is the transport layer's job — out of
//! scope here, same as gossip transport is out of scope for `xln-routing`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use xln_entity::{EntityOutput, EntityReplica, EntityState, EntityTx, JEvent, QuorumConfig};
use xln_persistence::{latest_snapshot_at_or_below, write_snapshot, ReplicaSnapshot, Snapshot, Wal};
use xln_types::{CoreError, EntityId, SignerId};

pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 100;

/// One external or internally-looped input, addressed to an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedInput {
    pub destination: EntityId,
    pub tx: EntityTx,
}

/// An effect the scheduler could not consume itself: ships to the
/// transport layer (counterparty node, settlement adapter, caller).
#[derive(Debug, Clone)]
pub struct RoutedOutput {
    pub origin: EntityId,
    pub output: EntityOutput,
}

pub struct TickScheduler {
    replicas: BTreeMap<EntityId, EntityReplica>,
    signing_keys: BTreeMap<EntityId, SigningKey>,
    /// Signer identity this node will use the moment an entity with this
    /// id registers, if it hasn't already been provisioned directly via
    /// [`TickScheduler::register_replica`].
    provisioned_signers: BTreeMap<EntityId, (SignerId, SigningKey)>,
    wal: Wal,
    snapshot_dir: PathBuf,
    snapshot_interval: u64,
    height: u64,
}

impl TickScheduler {
    pub fn new(wal: Wal, snapshot_dir: impl Into<PathBuf>, snapshot_interval: u64) -> Self {
        Self {
            replicas: BTreeMap::new(),
            signing_keys: BTreeMap::new(),
            provisioned_signers: BTreeMap::new(),
            wal,
            snapshot_dir: snapshot_dir.into(),
            snapshot_interval: snapshot_interval.max(1),
            height: 0,
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn replica(&self, entity_id: EntityId) -> Option<&EntityReplica> {
        self.replicas.get(&entity_id)
    }

    /// Install a ready replica directly (bootstrapping, tests). The same
    /// key signs both entity consensus messages and this entity's account
    /// frames (`EntityState::with_signing_key`).
    pub fn register_replica(&mut self, entity_id: EntityId, signer_id: SignerId, signing_key: SigningKey, state: EntityState) {
        let state = state.with_signing_key(signing_key.clone());
        self.replicas.insert(entity_id, EntityReplica::new(entity_id, signer_id, state));
        self.signing_keys.insert(entity_id, signing_key);
    }

    /// Stash a signer identity for an entity that hasn't registered yet;
    /// the replica is created automatically when its `registerEntity`
    /// `j_event` is dispatched.
    pub fn provision_signer(&mut self, entity_id: EntityId, signer_id: SignerId, signing_key: SigningKey) {
        self.provisioned_signers.insert(entity_id, (signer_id, signing_key));
    }

    /// Drain one tick's worth of inputs: stable-sort, WAL-append, dispatch,
    /// auto-propose sweep, height advance, periodic snapshot (spec §4.1).
    pub fn process(&mut self, mut inputs: Vec<RoutedInput>, timestamp_ms: i64) -> Vec<RoutedOutput> {
        inputs.sort_by_key(|routed| (routed.destination, routed.tx.signer(), routed.tx.nonce()));

        let mut outputs = Vec::new();
        for routed in inputs {
            if let Err(error) = self.wal.append(timestamp_ms, &routed) {
                error!(%error, "WAL append failed, aborting tick without state mutation");
                return outputs;
            }
            self.dispatch(routed, &mut outputs);
        }

        self.auto_propose_sweep(timestamp_ms, &mut outputs);
        self.account_propose_sweep(timestamp_ms, &mut outputs);

        self.height += 1;
        if self.height.is_multiple_of(self.snapshot_interval) {
            if let Err(error) = self.emit_snapshot(timestamp_ms) {
                error!(%error, "snapshot emission failed");
            }
        }
        outputs
    }

    fn dispatch(&mut self, routed: RoutedInput, outputs: &mut Vec<RoutedOutput>) {
        if !self.replicas.contains_key(&routed.destination) {
            if let EntityTx::JEvent {
                event: JEvent::RegisterEntity { quorum },
            } = &routed.tx
            {
                self.register_from_j_event(routed.destination, quorum.clone());
                return;
            }
            warn!(entity = %routed.destination, "input addressed to an unknown replica, dropped");
            outputs.push(RoutedOutput {
                origin: routed.destination,
                output: EntityOutput::Error {
                    signer: routed.tx.signer().unwrap_or_else(|| SignerId::from_slice(&[])),
                    error: CoreError::EntityNotFound {
                        entity: routed.destination.to_string(),
                    },
                },
            });
            return;
        }
        let replica = self.replicas.get_mut(&routed.destination).expect("just checked");
        replica.enqueue(routed.tx);
    }

    fn register_from_j_event(&mut self, entity_id: EntityId, quorum: QuorumConfig) {
        let Some((signer_id, signing_key)) = self.provisioned_signers.remove(&entity_id) else {
            warn!(entity = %entity_id, "registerEntity observed but this node holds no signer for it, ignored");
            return;
        };
        let state = EntityState::new(entity_id, quorum);
        self.register_replica(entity_id, signer_id, signing_key, state);
    }

    fn auto_propose_sweep(&mut self, timestamp_ms: i64, outputs: &mut Vec<RoutedOutput>) {
        let entity_ids: Vec<EntityId> = self.replicas.keys().copied().collect();
        for entity_id in entity_ids {
            let Some(signing_key) = self.signing_keys.get(&entity_id).cloned() else { continue };
            let replica = self.replicas.get_mut(&entity_id).expect("key came from the map");
            match replica.tick(timestamp_ms, &signing_key) {
                Ok((_messages, tick_outputs)) => {
                    for output in tick_outputs {
                        self.forward(entity_id, output, outputs);
                    }
                }
                Err(error) => {
                    let signer_id = self.replicas[&entity_id].signer_id;
                    warn!(entity = %entity_id, %error, "auto-propose tick rejected");
                    outputs.push(RoutedOutput {
                        origin: entity_id,
                        output: EntityOutput::Error { signer: signer_id, error },
                    });
                }
            }
        }
    }

    /// Drive each locally-held account with a non-empty mempool through one
    /// propose round, same as an entity's auto-propose but one layer down
    /// (spec's data flow: "entity commits may create account-layer inputs
    /// to counterparties").
    fn account_propose_sweep(&mut self, timestamp_ms: i64, outputs: &mut Vec<RoutedOutput>) {
        let entity_ids: Vec<EntityId> = self.replicas.keys().copied().collect();
        for entity_id in entity_ids {
            let Some(signing_key) = self.signing_keys.get(&entity_id).cloned() else { continue };
            let counterparties: Vec<EntityId> = self.replicas[&entity_id].state.accounts.keys().copied().collect();
            for counterparty in counterparties {
                let account = self
                    .replicas
                    .get_mut(&entity_id)
                    .expect("key came from the map")
                    .state
                    .account_mut(counterparty);
                if account.mempool.is_empty() {
                    continue;
                }
                match account.propose(&signing_key, timestamp_ms) {
                    Ok(Some(input)) => self.forward(entity_id, EntityOutput::AccountMessage { to: counterparty, input }, outputs),
                    Ok(None) => {}
                    Err(error) => {
                        warn!(entity = %entity_id, %counterparty, %error, "account propose rejected");
                        outputs.push(RoutedOutput {
                            origin: entity_id,
                            output: EntityOutput::Error {
                                signer: self.replicas[&entity_id].signer_id,
                                error,
                            },
                        });
                    }
                }
            }
        }
    }

    /// An `AccountMessage` addressed to a locally-held replica is delivered
    /// immediately (no transport hop needed); everything else is handed to
    /// the caller. Delivery can itself produce further outputs (an ack frame
    /// back to the sender, a forwarded hop) which are forwarded in turn, so
    /// a fully local exchange (both legs of a bilateral account held by this
    /// node) settles within one tick without ever surfacing to the caller.
    fn forward(&mut self, origin: EntityId, output: EntityOutput, outputs: &mut Vec<RoutedOutput>) {
        if let EntityOutput::AccountMessage { to, input } = &output {
            if let Some(replica) = self.replicas.get_mut(to) {
                match replica.state.apply(&EntityTx::AccountInput { input: input.clone() }) {
                    Ok(further) => {
                        for next in further {
                            self.forward(*to, next, outputs);
                        }
                    }
                    Err(error) => {
                        warn!(%error, origin = %origin, destination = %to, "locally-delivered account message rejected");
                    }
                }
                return;
            }
        }
        outputs.push(RoutedOutput { origin, output });
    }

    fn emit_snapshot(&self, timestamp_ms: i64) -> Result<(), CoreError> {
        let replicas: Vec<ReplicaSnapshot> = self.replicas.values().map(ReplicaSnapshot::capture).collect();
        let snapshot = Snapshot::build(self.height, timestamp_ms, self.wal.next_sequence(), replicas);
        write_snapshot(&self.snapshot_dir, &snapshot, true)
    }

    /// Recovery (spec §4.6): load the newest snapshot at or below
    /// `target_height`, verify its WAL window, and return the replay plan.
    /// Halts on any failed step — never returns a partially-recovered plan.
    pub fn recover(wal_path: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>, target_height: u64) -> Result<RecoveryPlan, CoreError> {
        let snapshot_dir = snapshot_dir.into();
        let snapshot = latest_snapshot_at_or_below(&snapshot_dir, target_height)?;
        let wal = Wal::open(wal_path.into())?;
        wal.verify_integrity()?;
        let replay_from = snapshot.as_ref().map(|s| s.wal_sequence).unwrap_or(0);
        let replay_entries = wal.read_from(replay_from)?;
        Ok(RecoveryPlan { snapshot, wal, replay_entries })
    }
}

/// What a recovering node needs: the newest applicable snapshot (if any)
/// to install, and the WAL entries to replay on top of it, each re-entered
/// through [`TickScheduler::process`] in original sequence order.
pub struct RecoveryPlan {
    pub snapshot: Option<Snapshot>,
    pub wal: Wal,
    pub replay_entries: Vec<xln_persistence::WalEntry>,
}
