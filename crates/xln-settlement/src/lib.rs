//! Settlement interface to the external ledger (spec §4.7).
//!
//! The core never assumes synchronous confirmation: `submit_batch` enqueues
//! a request and returns; the batch sits `Pending` until a `j_event`
//! confirms it (handled by `xln-entity`) or a caller explicitly abandons it.
//! No timeout is invented here — see DESIGN.md's settlement-revert note.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use xln_merkle::{keccak256, Hash};
use xln_rcpan::{check_zero_sum, SettlementDiff};
use xln_types::{AccountKey, CoreError, EntityId, TokenId};

pub type BatchId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Confirmed,
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct SettlementBatch {
    pub id: BatchId,
    pub left: EntityId,
    pub right: EntityId,
    pub diffs: Vec<(TokenId, SettlementDiff)>,
    pub status: BatchStatus,
    pub submitted_at: DateTime<Utc>,
}

/// The canonical on-chain/off-chain identifier for an account, shared by
/// both sides (spec §6, `channel_key(a,b) = keccak256(min(a,b)||max(a,b))`).
pub fn channel_key(a: EntityId, b: EntityId) -> Hash {
    keccak256(&AccountKey::new(a, b).canonical_bytes())
}

/// Reject a batch whose diffs don't sum to zero per token, before it ever
/// reaches the external ledger (spec §4.4, §4.7).
pub fn validate_batch(diffs: &[(TokenId, SettlementDiff)]) -> Result<(), CoreError> {
    for (token, diff) in diffs {
        check_zero_sum(diff).map_err(|_| CoreError::ZeroSumViolation {
            token: token.to_string(),
            sum: (&diff.left_diff + &diff.right_diff + &diff.collateral_diff).to_string(),
        })?;
    }
    Ok(())
}

/// The core's view of the external settlement ledger (spec §4.7): a narrow
/// RPC boundary. Implementations talk to whatever is on the other side
/// (an on-chain contract, a test double); the core only depends on this
/// trait.
#[async_trait::async_trait]
pub trait SettlementLedger: Send + Sync {
    async fn submit_batch(
        &self,
        left: EntityId,
        right: EntityId,
        diffs: Vec<(TokenId, SettlementDiff)>,
    ) -> Result<BatchId, CoreError>;

    async fn deposit_reserve(&self, entity: EntityId, token: TokenId, amount: i64) -> Result<(), CoreError>;

    async fn transfer_reserve(
        &self,
        from: EntityId,
        to: EntityId,
        token: TokenId,
        amount: i64,
    ) -> Result<(), CoreError>;

    async fn register_token(&self, external_ref: String) -> Result<TokenId, CoreError>;
}

/// In-memory test double: validates and tracks batches, never actually
/// settles anything externally. A batch stays `Pending` until `confirm` or
/// `abandon` is called on it (the equivalent of a `j_event` arriving).
#[derive(Default)]
pub struct NullSettlementLedger {
    next_id: AtomicU64,
    next_token: AtomicU64,
    batches: Mutex<HashMap<BatchId, SettlementBatch>>,
}

impl NullSettlementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_batch(&self, id: BatchId) -> Option<SettlementBatch> {
        self.batches.lock().expect("lock not poisoned").get(&id).cloned()
    }

    pub fn confirm(&self, id: BatchId) -> Result<(), CoreError> {
        self.set_status(id, BatchStatus::Confirmed)
    }

    pub fn mark_abandoned(&self, id: BatchId) -> Result<(), CoreError> {
        self.set_status(id, BatchStatus::Abandoned)
    }

    fn set_status(&self, id: BatchId, status: BatchStatus) -> Result<(), CoreError> {
        let mut batches = self.batches.lock().expect("lock not poisoned");
        let batch = batches.get_mut(&id).ok_or_else(|| CoreError::MalformedInput {
            message: format!("no settlement batch {id}"),
        })?;
        batch.status = status;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SettlementLedger for NullSettlementLedger {
    async fn submit_batch(
        &self,
        left: EntityId,
        right: EntityId,
        diffs: Vec<(TokenId, SettlementDiff)>,
    ) -> Result<BatchId, CoreError> {
        validate_batch(&diffs)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let batch = SettlementBatch {
            id,
            left,
            right,
            diffs,
            status: BatchStatus::Pending,
            submitted_at: Utc::now(),
        };
        self.batches.lock().expect("lock not poisoned").insert(id, batch);
        Ok(id)
    }

    async fn deposit_reserve(&self, _entity: EntityId, _token: TokenId, _amount: i64) -> Result<(), CoreError> {
        Ok(())
    }

    async fn transfer_reserve(
        &self,
        _from: EntityId,
        _to: EntityId,
        _token: TokenId,
        _amount: i64,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    async fn register_token(&self, _external_ref: String) -> Result<TokenId, CoreError> {
        Ok(TokenId(self.next_token.fetch_add(1, Ordering::SeqCst)))
    }
}

/// Tracing-based adapter for local/dev use: logs every call, then delegates
/// to an inner ledger (spec's "external collaborator" boundary; this crate
/// only owns the pure validation logic and the trait it's called through).
pub struct LoggingSettlementLedger<L> {
    inner: L,
}

impl<L: SettlementLedger> LoggingSettlementLedger<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl<L: SettlementLedger> SettlementLedger for LoggingSettlementLedger<L> {
    async fn submit_batch(
        &self,
        left: EntityId,
        right: EntityId,
        diffs: Vec<(TokenId, SettlementDiff)>,
    ) -> Result<BatchId, CoreError> {
        info!(%left, %right, entries = diffs.len(), "submitting settlement batch");
        match self.inner.submit_batch(left, right, diffs).await {
            Ok(id) => {
                info!(batch_id = id, "settlement batch submitted");
                Ok(id)
            }
            Err(error) => {
                warn!(%error, "settlement batch rejected");
                Err(error)
            }
        }
    }

    async fn deposit_reserve(&self, entity: EntityId, token: TokenId, amount: i64) -> Result<(), CoreError> {
        info!(%entity, %token, amount, "depositing reserve");
        self.inner.deposit_reserve(entity, token, amount).await
    }

    async fn transfer_reserve(
        &self,
        from: EntityId,
        to: EntityId,
        token: TokenId,
        amount: i64,
    ) -> Result<(), CoreError> {
        info!(%from, %to, %token, amount, "transferring reserve");
        self.inner.transfer_reserve(from, to, token, amount).await
    }

    async fn register_token(&self, external_ref: String) -> Result<TokenId, CoreError> {
        let token = self.inner.register_token(external_ref.clone()).await?;
        info!(%external_ref, %token, "token registered");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use num_traits::Zero;
    use xln_types::EntityId;

    fn entity(b: u8) -> EntityId {
        EntityId::from_slice(&[b])
    }

    fn zero_sum_diff(collateral: i64) -> SettlementDiff {
        SettlementDiff {
            left_diff: BigInt::from(-collateral),
            right_diff: BigInt::zero(),
            collateral_diff: BigInt::from(collateral),
            on_delta_diff: BigInt::zero(),
        }
    }

    #[tokio::test]
    async fn zero_sum_batch_is_accepted_and_stays_pending() {
        let ledger = NullSettlementLedger::new();
        let id = ledger
            .submit_batch(entity(1), entity(2), vec![(TokenId(0), zero_sum_diff(100))])
            .await
            .expect("batch accepted");
        let batch = ledger.get_batch(id).expect("batch recorded");
        assert_eq!(batch.status, BatchStatus::Pending);
    }

    #[tokio::test]
    async fn non_zero_sum_batch_is_rejected_before_recording() {
        let ledger = NullSettlementLedger::new();
        let bad = SettlementDiff {
            left_diff: BigInt::from(-50),
            right_diff: BigInt::zero(),
            collateral_diff: BigInt::from(100),
            on_delta_diff: BigInt::zero(),
        };
        let result = ledger.submit_batch(entity(1), entity(2), vec![(TokenId(0), bad)]).await;
        assert!(matches!(result, Err(CoreError::ZeroSumViolation { .. })));
    }

    #[tokio::test]
    async fn confirming_a_batch_moves_it_out_of_pending() {
        let ledger = NullSettlementLedger::new();
        let id = ledger
            .submit_batch(entity(1), entity(2), vec![(TokenId(0), zero_sum_diff(50))])
            .await
            .expect("batch accepted");
        ledger.confirm(id).expect("batch exists");
        assert_eq!(ledger.get_batch(id).unwrap().status, BatchStatus::Confirmed);
    }

    #[tokio::test]
    async fn logging_adapter_delegates_to_the_inner_ledger() {
        let ledger = LoggingSettlementLedger::new(NullSettlementLedger::new());
        let id = ledger
            .submit_batch(entity(1), entity(2), vec![(TokenId(0), zero_sum_diff(10))])
            .await
            .expect("batch accepted");
        assert_eq!(id, 0);
    }

    #[test]
    fn channel_key_is_order_independent() {
        let a = entity(1);
        let b = entity(2);
        assert_eq!(channel_key(a, b), channel_key(b, a));
    }
}
