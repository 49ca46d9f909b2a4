//! RLP-encoded environment snapshots (spec §4.5 "State root derivation";
//! spec §4.6 "Snapshot").

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use xln_entity::{EntityReplica, QuorumConfig};
use xln_merkle::{keccak256, merkle_root, Hash};
use xln_rlp::Value as RlpValue;
use xln_types::{CoreError, EntityId, SignerId};

/// Everything persisted about one replica (spec §4.5: "entity_id, height,
/// timestamp, sorted nonces, message log, config with sorted shares").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaSnapshot {
    pub entity_id: EntityId,
    pub signer_id: SignerId,
    pub height: u64,
    pub nonces: BTreeMap<SignerId, u64>,
    pub message_log: Vec<String>,
    pub quorum: QuorumConfig,
}

impl ReplicaSnapshot {
    pub fn capture(replica: &EntityReplica) -> Self {
        Self {
            entity_id: replica.entity_id,
            signer_id: replica.signer_id,
            height: replica.state.height,
            nonces: replica.state.nonces.clone(),
            message_log: replica.state.message_log.clone(),
            quorum: replica.state.quorum.clone(),
        }
    }

    /// `hash(rlp(serialize(replica)))`, every map in sorted-key order.
    pub fn digest(&self) -> Hash {
        let nonces = RlpValue::list(
            self.nonces
                .iter()
                .map(|(s, n)| RlpValue::list(vec![RlpValue::bytes(s.as_bytes().to_vec()), RlpValue::uint(*n)]))
                .collect::<Vec<_>>(),
        );
        let messages = RlpValue::list(
            self.message_log
                .iter()
                .map(|m| RlpValue::bytes(m.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        );
        let signers = RlpValue::list(
            self.quorum
                .signers
                .iter()
                .map(|(s, info)| RlpValue::list(vec![RlpValue::bytes(s.as_bytes().to_vec()), RlpValue::uint(info.power)]))
                .collect::<Vec<_>>(),
        );
        let value = RlpValue::list(vec![
            RlpValue::bytes(self.entity_id.as_bytes().to_vec()),
            RlpValue::bytes(self.signer_id.as_bytes().to_vec()),
            RlpValue::uint(self.height),
            nonces,
            messages,
            signers,
            RlpValue::uint(self.quorum.threshold),
        ]);
        keccak256(&xln_rlp::encode(&value))
    }
}

/// Merkle root over every replica's digest, sorted by `(entity_id,
/// signer_id)` byte representation (determinism-critical, spec §4.5).
pub fn state_root(replicas: &[ReplicaSnapshot]) -> Hash {
    let mut sorted: Vec<&ReplicaSnapshot> = replicas.iter().collect();
    sorted.sort_by_key(|r| (r.entity_id.as_bytes().to_vec(), r.signer_id.as_bytes().to_vec()));
    let leaves: Vec<Hash> = sorted.iter().map(|r| r.digest()).collect();
    merkle_root(&leaves)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub height: u64,
    pub timestamp_ms: i64,
    pub state_root: Hash,
    /// WAL sequence id at the moment this snapshot was taken; recovery
    /// replays entries with `sequence_id >= wal_sequence`.
    pub wal_sequence: u64,
    pub replicas: Vec<ReplicaSnapshot>,
}

impl Snapshot {
    pub fn build(height: u64, timestamp_ms: i64, wal_sequence: u64, replicas: Vec<ReplicaSnapshot>) -> Self {
        let state_root = state_root(&replicas);
        Self {
            height,
            timestamp_ms,
            state_root,
            wal_sequence,
            replicas,
        }
    }

    fn to_rlp(&self) -> RlpValue {
        let replicas = RlpValue::list(
            self.replicas
                .iter()
                .map(|r| RlpValue::bytes(serde_json::to_vec(r).expect("ReplicaSnapshot always serializes")))
                .collect::<Vec<_>>(),
        );
        RlpValue::list(vec![
            RlpValue::uint(self.height),
            RlpValue::uint(self.timestamp_ms as u64),
            RlpValue::bytes(self.state_root.to_vec()),
            RlpValue::uint(self.wal_sequence),
            replicas,
        ])
    }

    fn from_rlp(value: &RlpValue) -> Result<Self, CoreError> {
        let malformed = || CoreError::RecoveryFailure {
            message: "malformed snapshot RLP".to_string(),
        };
        let items = value.as_list().ok_or_else(malformed)?;
        let [height, timestamp_ms, state_root, wal_sequence, replicas] = items else {
            return Err(malformed());
        };
        let state_root_bytes = state_root.as_bytes().ok_or_else(malformed)?;
        let state_root: Hash = state_root_bytes.try_into().map_err(|_| malformed())?;
        let replica_list = replicas.as_list().ok_or_else(malformed)?;
        let replicas = replica_list
            .iter()
            .map(|item| {
                let bytes = item.as_bytes().ok_or_else(malformed)?;
                serde_json::from_slice(bytes).map_err(|_| malformed())
            })
            .collect::<Result<Vec<ReplicaSnapshot>, CoreError>>()?;
        Ok(Self {
            height: height.to_uint().ok_or_else(malformed)?,
            timestamp_ms: timestamp_ms.to_uint().ok_or_else(malformed)? as i64,
            state_root,
            wal_sequence: wal_sequence.to_uint().ok_or_else(malformed)?,
            replicas,
        })
    }
}

fn snapshot_path(dir: &Path, height: u64) -> PathBuf {
    dir.join(format!("snapshot-{height}.rlp"))
}

/// Write the RLP-authoritative snapshot plus an optional human-readable
/// JSON sibling for debugging (spec §6's `.debug` companion).
pub fn write_snapshot(dir: &Path, snapshot: &Snapshot, write_debug_sibling: bool) -> Result<(), CoreError> {
    fs::create_dir_all(dir).map_err(|e| CoreError::WalFailure { message: e.to_string() })?;
    let encoded = xln_rlp::encode(&snapshot.to_rlp());
    fs::write(snapshot_path(dir, snapshot.height), encoded).map_err(|e| CoreError::WalFailure { message: e.to_string() })?;
    if write_debug_sibling {
        let debug_path = dir.join(format!("snapshot-{}.rlp.debug", snapshot.height));
        let json = serde_json::to_string_pretty(snapshot).map_err(|e| CoreError::WalFailure { message: e.to_string() })?;
        fs::write(debug_path, json).map_err(|e| CoreError::WalFailure { message: e.to_string() })?;
    }
    Ok(())
}

pub fn read_snapshot(dir: &Path, height: u64) -> Result<Snapshot, CoreError> {
    let bytes = fs::read(snapshot_path(dir, height)).map_err(|e| CoreError::RecoveryFailure { message: e.to_string() })?;
    let value = xln_rlp::decode(&bytes).map_err(|e| CoreError::RecoveryFailure { message: e.to_string() })?;
    Snapshot::from_rlp(&value)
}

/// The newest snapshot at or below `target_height`, scanning the snapshot
/// directory's filenames.
pub fn latest_snapshot_at_or_below(dir: &Path, target_height: u64) -> Result<Option<Snapshot>, CoreError> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut best: Option<u64> = None;
    for entry in fs::read_dir(dir).map_err(|e| CoreError::RecoveryFailure { message: e.to_string() })? {
        let entry = entry.map_err(|e| CoreError::RecoveryFailure { message: e.to_string() })?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(rest) = name.strip_prefix("snapshot-").and_then(|s| s.strip_suffix(".rlp")) else {
            continue;
        };
        let Ok(height) = rest.parse::<u64>() else { continue };
        if height <= target_height && best.map(|b| height > b).unwrap_or(true) {
            best = Some(height);
        }
    }
    best.map(|height| read_snapshot(dir, height)).transpose()
}

/// Recompute the root from a loaded snapshot's own replicas and compare
/// against `expected_root` (spec's `snapshot_verify_integrity`).
pub fn verify_integrity(snapshot: &Snapshot, expected_root: Hash) -> Result<(), CoreError> {
    let recomputed = state_root(&snapshot.replicas);
    if recomputed != expected_root {
        return Err(CoreError::RecoveryFailure {
            message: format!(
                "state root mismatch: expected {}, recomputed {}",
                hex::encode(expected_root),
                hex::encode(recomputed)
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use xln_entity::EntityState;

    fn replica(entity_b: u8, signer_b: u8) -> EntityReplica {
        let key = SigningKey::generate(&mut OsRng);
        let entity_id = EntityId::from_slice(&[entity_b]);
        let signer_id = SignerId::from_slice(&[signer_b]);
        let quorum = QuorumConfig::single_signer(signer_id, key.verifying_key());
        EntityReplica::new(entity_id, signer_id, EntityState::new(entity_id, quorum))
    }

    #[test]
    fn state_root_is_order_independent_across_capture_order() {
        let r1 = ReplicaSnapshot::capture(&replica(1, 1));
        let r2 = ReplicaSnapshot::capture(&replica(2, 1));
        let root_a = state_root(&[r1.clone(), r2.clone()]);
        let root_b = state_root(&[r2, r1]);
        assert_eq!(root_a, root_b);
    }

    #[test]
    fn snapshot_round_trips_through_rlp() {
        let replicas = vec![ReplicaSnapshot::capture(&replica(1, 1))];
        let snapshot = Snapshot::build(10, 1000, 5, replicas);
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), &snapshot, true).unwrap();
        let loaded = read_snapshot(dir.path(), 10).unwrap();
        assert_eq!(loaded.state_root, snapshot.state_root);
        assert_eq!(loaded.wal_sequence, 5);
        assert!(dir.path().join("snapshot-10.rlp.debug").exists());
    }

    #[test]
    fn verify_integrity_detects_a_tampered_root() {
        let replicas = vec![ReplicaSnapshot::capture(&replica(1, 1))];
        let snapshot = Snapshot::build(1, 0, 0, replicas);
        assert!(verify_integrity(&snapshot, snapshot.state_root).is_ok());
        assert!(verify_integrity(&snapshot, keccak256(b"wrong")).is_err());
    }

    #[test]
    fn latest_snapshot_at_or_below_picks_the_highest_eligible_height() {
        let dir = tempfile::tempdir().unwrap();
        for height in [10, 20, 30] {
            let snapshot = Snapshot::build(height, 0, 0, vec![]);
            write_snapshot(dir.path(), &snapshot, false).unwrap();
        }
        let found = latest_snapshot_at_or_below(dir.path(), 25).unwrap().unwrap();
        assert_eq!(found.height, 20);
        assert!(latest_snapshot_at_or_below(dir.path(), 5).unwrap().is_none());
    }
}
