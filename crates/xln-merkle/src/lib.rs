//! Hashing and Merkle-root helpers (spec §4.5).
//!
//! State hashes for frames and replicas use Keccak-256 of the RLP encoding;
//! general-purpose content addressing may use SHA-256. Both are exposed
//! here; the Merkle construction itself is hash-agnostic but keyed by
//! Keccak-256 by default since that's what every spec scenario hashes with.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

pub type Hash = [u8; 32];

pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(left);
    buf.extend_from_slice(right);
    keccak256(&buf)
}

/// Merkle root over a list of leaf digests (spec §4.5, "Merkle root"):
///
/// 1. Empty input: root is the hash of the empty byte string.
/// 2. Single leaf: root is that leaf, unchanged.
/// 3. Otherwise: pad to the next power of two with zero-hashes, pair
///    adjacent leaves, hash each pair, and recurse.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => keccak256(&[]),
        1 => leaves[0],
        n => {
            let padded_len = n.next_power_of_two();
            let mut level: Vec<Hash> = leaves.to_vec();
            level.resize(padded_len, [0u8; 32]);
            while level.len() > 1 {
                let mut next = Vec::with_capacity(level.len() / 2);
                for pair in level.chunks(2) {
                    next.push(hash_pair(&pair[0], &pair[1]));
                }
                level = next;
            }
            level[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_root_is_hash_of_empty_string() {
        assert_eq!(merkle_root(&[]), keccak256(&[]));
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let leaf = keccak256(b"leaf");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn two_leaves_hash_as_a_pair() {
        let a = keccak256(b"a");
        let b = keccak256(b"b");
        assert_eq!(merkle_root(&[a, b]), hash_pair(&a, &b));
    }

    #[test]
    fn non_power_of_two_pads_with_zero_hashes() {
        let leaves: Vec<Hash> = (0u8..3).map(|i| keccak256(&[i])).collect();
        let mut padded = leaves.clone();
        padded.push([0u8; 32]);
        assert_eq!(merkle_root(&leaves), merkle_root(&padded));
    }

    #[test]
    fn root_is_order_sensitive() {
        let a = keccak256(b"a");
        let b = keccak256(b"b");
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn same_traversal_order_is_deterministic() {
        let leaves: Vec<Hash> = (0u8..7).map(|i| keccak256(&[i])).collect();
        assert_eq!(merkle_root(&leaves), merkle_root(&leaves));
    }
}
