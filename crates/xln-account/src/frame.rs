//! Account frame contents and state-hash derivation (spec §4.3, "Frame
//! contents"; hashing per spec §4.5).

use serde::{Deserialize, Serialize};
use xln_merkle::{keccak256, Hash};
use xln_rlp::Value;
use xln_types::{Delta, TokenId};

use crate::tx::AccountTx;

/// A proposed or committed account frame. `state_hash` is computed once from
/// the other fields and carried alongside for cheap comparison; it is never
/// trusted on its own — every recipient recomputes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFrame {
    pub height: u64,
    pub timestamp_ms: i64,
    pub txs: Vec<AccountTx>,
    pub prev_frame_hash: Hash,
    pub token_ids: Vec<TokenId>,
    pub deltas: Vec<Delta>,
    pub state_hash: Hash,
}

impl AccountFrame {
    /// Build a frame from its content fields and stamp it with the computed
    /// state hash; callers never set `state_hash` directly.
    pub fn build(
        height: u64,
        timestamp_ms: i64,
        txs: Vec<AccountTx>,
        prev_frame_hash: Hash,
        token_ids: Vec<TokenId>,
        deltas: Vec<Delta>,
    ) -> Self {
        let state_hash = compute_state_hash(height, timestamp_ms, &txs, &prev_frame_hash, &token_ids, &deltas);
        Self {
            height,
            timestamp_ms,
            txs,
            prev_frame_hash,
            token_ids,
            deltas,
            state_hash,
        }
    }

    /// Recompute the state hash from this frame's own fields, ignoring the
    /// stored one. Used to verify a frame received from the counterparty.
    pub fn recompute_hash(&self) -> Hash {
        compute_state_hash(
            self.height,
            self.timestamp_ms,
            &self.txs,
            &self.prev_frame_hash,
            &self.token_ids,
            &self.deltas,
        )
    }
}

fn encode_tx(tx: &AccountTx) -> Value {
    // A stable but simple encoding: JSON payload wrapped as an RLP byte
    // string. The binary RLP grammar itself doesn't need to know about every
    // tx variant; it only needs a canonical, order-preserving byte
    // representation to hash.
    let json = serde_json::to_vec(tx).expect("AccountTx always serializes");
    Value::bytes(json)
}

fn encode_delta(delta: &Delta) -> Value {
    let json = serde_json::to_vec(delta).expect("Delta always serializes");
    Value::bytes(json)
}

fn compute_state_hash(
    height: u64,
    timestamp_ms: i64,
    txs: &[AccountTx],
    prev_frame_hash: &Hash,
    token_ids: &[TokenId],
    deltas: &[Delta],
) -> Hash {
    let value = Value::list(vec![
        Value::uint(height),
        Value::uint(timestamp_ms as u64),
        Value::list(txs.iter().map(encode_tx).collect::<Vec<_>>()),
        Value::bytes(prev_frame_hash.to_vec()),
        Value::list(token_ids.iter().map(|t| Value::uint(t.0)).collect::<Vec<_>>()),
        Value::list(deltas.iter().map(encode_delta).collect::<Vec<_>>()),
    ]);
    keccak256(&xln_rlp::encode(&value))
}
