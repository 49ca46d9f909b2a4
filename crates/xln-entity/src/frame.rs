//! Entity frame (block) contents and state-hash derivation (spec §3,
//! "Entity frame"; spec §4.5, hashing rules).

use serde::{Deserialize, Serialize};
use xln_merkle::{keccak256, Hash};
use xln_rlp::Value;

use crate::tx::EntityTx;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityFrame {
    pub height: u64,
    pub timestamp_ms: i64,
    pub txs: Vec<EntityTx>,
    pub prev_frame_hash: Hash,
    /// Root over this frame's post-apply account digests (spec §4.5),
    /// carried alongside so a recipient can recompute `state_hash` without
    /// re-deriving it from the live replica.
    pub accounts_root: Hash,
    pub state_hash: Hash,
}

impl EntityFrame {
    /// `accounts_root` must be [`crate::EntityState::accounts_root`] taken
    /// *after* `txs` have been applied, so `state_hash` commits to the
    /// resulting state and not merely the frame's inputs (spec §4.2,
    /// "re-applying the frame yields the same state hash").
    pub fn build(height: u64, timestamp_ms: i64, txs: Vec<EntityTx>, prev_frame_hash: Hash, accounts_root: Hash) -> Self {
        let state_hash = compute_state_hash(height, timestamp_ms, &txs, &prev_frame_hash, &accounts_root);
        Self {
            height,
            timestamp_ms,
            txs,
            prev_frame_hash,
            accounts_root,
            state_hash,
        }
    }

    pub fn recompute_hash(&self) -> Hash {
        compute_state_hash(self.height, self.timestamp_ms, &self.txs, &self.prev_frame_hash, &self.accounts_root)
    }
}

fn compute_state_hash(height: u64, timestamp_ms: i64, txs: &[EntityTx], prev_frame_hash: &Hash, accounts_root: &Hash) -> Hash {
    let encoded_txs: Vec<Value> = txs
        .iter()
        .map(|tx| Value::bytes(serde_json::to_vec(tx).expect("EntityTx always serializes")))
        .collect();
    let value = Value::list(vec![
        Value::uint(height),
        Value::uint(timestamp_ms as u64),
        Value::list(encoded_txs),
        Value::bytes(prev_frame_hash.to_vec()),
        Value::bytes(accounts_root.to_vec()),
    ]);
    keccak256(&xln_rlp::encode(&value))
}
