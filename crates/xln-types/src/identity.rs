//! Identifier types for the XLN consensus core.
//!
//! Unlike the UUID-wrapped ids elsewhere in this workspace's surface crates,
//! every identifier here is a fixed-width byte array so that lexicographic
//! comparison — required for `AccountKey` canonicalization and for the
//! sorted-key Merkle root in `xln-merkle` — is meaningful and stable across
//! hosts.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Macro to generate a fixed-width, hex-displayed, lexicographically ordered
/// identifier type.
///
/// Serializes as its `0x`-prefixed hex string rather than a raw byte array:
/// these ids are used as `BTreeMap` keys (`QuorumConfig::signers`, entity
/// registries), and a JSON map requires string keys.
macro_rules! define_fixed_id {
    ($name:ident, $len:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }

        impl $name {
            /// All-zero identifier, used in tests and as a sentinel.
            pub const ZERO: Self = Self([0u8; $len]);

            /// Build from a big-endian byte slice, right-padded on the left
            /// with zeros if shorter than the native width.
            pub fn from_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $len];
                let start = ($len as usize).saturating_sub(bytes.len());
                let copy_len = bytes.len().min($len as usize);
                buf[start..].copy_from_slice(&bytes[bytes.len() - copy_len..]);
                Self(buf)
            }

            /// Raw bytes, in the order used for RLP/hash canonicalization.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{})", stringify!($name), hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                Ok(Self::from_slice(&bytes))
            }
        }
    };
}

define_fixed_id!(EntityId, 20, "Globally unique identifier for an entity");
define_fixed_id!(SignerId, 20, "Identifier of a validator within an entity's quorum");

/// Integer id assigned to a token by the settlement ledger.
pub use crate::token::TokenId;

/// Canonical pair of entity ids sharing a bilateral account, ordered so that
/// `left <= right` by byte representation. Whichever side has the smaller id
/// is the **left** party (spec §3, "Identifiers").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub left: EntityId,
    pub right: EntityId,
}

impl AccountKey {
    /// Build the canonical key for an unordered pair of entities.
    pub fn new(a: EntityId, b: EntityId) -> Self {
        match a.cmp(&b) {
            Ordering::Less | Ordering::Equal => Self { left: a, right: b },
            Ordering::Greater => Self { left: b, right: a },
        }
    }

    /// True if `id` is the left party of this account.
    pub fn is_left(&self, id: EntityId) -> bool {
        id == self.left
    }

    /// The counterparty of `id` within this account.
    pub fn counterparty(&self, id: EntityId) -> Option<EntityId> {
        if id == self.left {
            Some(self.right)
        } else if id == self.right {
            Some(self.left)
        } else {
            None
        }
    }

    /// `min(a,b) || max(a,b)`, the canonical byte identifier used both
    /// off-chain (account keying) and on-chain (`channel_key`, spec §6).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(40);
        buf.extend_from_slice(&self.left.0);
        buf.extend_from_slice(&self.right.0);
        buf
    }
}
