//! Shared error taxonomy for the XLN consensus core (spec §7).
//!
//! Every rejected input produces one of these variants; silent failure is
//! forbidden. Variants map 1:1 onto the table in spec §7 so a caller can
//! pattern-match to decide propagation (recoverable vs. fatal).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("invalid nonce: expected {expected}, got {actual}")]
    InvalidNonce { expected: u64, actual: u64 },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("state hash mismatch: expected {expected}, computed {computed}")]
    StateHashMismatch { expected: String, computed: String },

    #[error("counter out of order: expected {expected}, got {actual}")]
    CounterMismatch { expected: u64, actual: u64 },

    #[error("RCPAN violation: delta {delta} outside [{lower}, {upper}]")]
    RcpanViolation {
        delta: String,
        lower: String,
        upper: String,
    },

    #[error("settlement diffs for token {token} do not sum to zero: {sum}")]
    ZeroSumViolation { token: String, sum: String },

    #[error("insufficient reserve: have {available}, need {requested}")]
    InsufficientReserve { available: String, requested: String },

    #[error("no route found from {from} to {to}")]
    NoRouteFound { from: String, to: String },

    #[error("write-ahead log append failed: {message}")]
    WalFailure { message: String },

    #[error("recovery failed: {message}")]
    RecoveryFailure { message: String },

    #[error("event attributed to unauthorized signer {signer}")]
    Unauthorized { signer: String },

    #[error("malformed input: {message}")]
    MalformedInput { message: String },

    #[error("entity {entity} not found")]
    EntityNotFound { entity: String },

    #[error("account {account} not found")]
    AccountNotFound { account: String },

    #[error("RLP decode error: {message}")]
    RlpDecodeError { message: String },
}

impl CoreError {
    /// The nine recoverable kinds from spec §7's policy table: localized,
    /// surfaced as an error output, never abort the tick.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::WalFailure { .. } | CoreError::RecoveryFailure { .. })
    }
}
