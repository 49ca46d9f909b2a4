//! Entity replica state and the tx-apply contract (spec §3 "Entity
//! replica"; spec §4.2).

use std::collections::BTreeMap;

use ed25519_dalek::{SigningKey, VerifyingKey};
use num_bigint::BigInt;
use num_traits::Zero;
use tracing::warn;
use xln_account::{AccountInput, AccountState, AccountTx};
use xln_merkle::{keccak256, merkle_root, Hash};
use xln_rcpan::{Side, SettlementDiff};
use xln_rlp::Value as RlpValue;
use xln_routing::RouteFinder;
use xln_types::{AccountKey, CoreError, EntityId, SignerId, TokenId};

use crate::proposal::{Proposal, ProposalStatus};
use crate::quorum::QuorumConfig;
use crate::tx::{EntityTx, JEvent, ProposalAction};

const MAX_CHAT_MESSAGE_LEN: usize = 4_096;

/// Token and starting two-way credit line `openAccount` seeds a fresh
/// account with (spec §8 scenario 1's concrete values).
const DEFAULT_TOKEN: TokenId = TokenId(1);
const DEFAULT_CREDIT_LIMIT: i64 = 1_000_000;

/// An effect of applying a tx, destined outside this replica.
#[derive(Debug, Clone)]
pub enum EntityOutput {
    /// Send this `AccountInput` to the counterparty entity's replica.
    AccountMessage { to: EntityId, input: AccountInput },
    /// Submit a settlement batch to the external ledger (spec §4.7).
    SettlementBatch {
        left: EntityId,
        right: EntityId,
        diffs: Vec<(TokenId, SettlementDiff)>,
    },
    /// A tx was rejected; routed back to its originator as an error.
    Error { signer: SignerId, error: CoreError },
}

/// One entity replica's committed state, as held by a single signer.
pub struct EntityState {
    pub entity_id: EntityId,
    pub height: u64,
    pub quorum: QuorumConfig,
    pub nonces: BTreeMap<SignerId, u64>,
    pub message_log: Vec<String>,
    pub accounts: BTreeMap<EntityId, AccountState>,
    pub proposals: BTreeMap<u64, Proposal>,
    pub reserves: BTreeMap<TokenId, BigInt>,
    /// Verifying keys of counterparties' account-signing identities,
    /// learned when an account is opened or via ledger registration.
    pub peer_keys: BTreeMap<EntityId, VerifyingKey>,
    /// This replica's own account-signing key. `None` until the runtime
    /// wires one in; any `accountInput` tx fails closed until then.
    my_signing_key: Option<SigningKey>,
    /// Gossip path lookup for payments with no existing direct account
    /// (spec §4.8). `None` means only direct payments are possible; a
    /// `directPayment` to a non-neighbor then aborts with `NoRouteFound`.
    route_finder: Option<Box<dyn RouteFinder>>,
}

impl EntityState {
    pub fn new(entity_id: EntityId, quorum: QuorumConfig) -> Self {
        Self {
            entity_id,
            height: 0,
            quorum,
            nonces: BTreeMap::new(),
            message_log: Vec::new(),
            accounts: BTreeMap::new(),
            proposals: BTreeMap::new(),
            reserves: BTreeMap::new(),
            peer_keys: BTreeMap::new(),
            my_signing_key: None,
            route_finder: None,
        }
    }

    fn check_and_bump_nonce(&mut self, signer: SignerId, nonce: u64) -> Result<(), CoreError> {
        let expected = self.nonces.get(&signer).copied().unwrap_or(0) + 1;
        if nonce != expected {
            return Err(CoreError::InvalidNonce { expected, actual: nonce });
        }
        self.nonces.insert(signer, nonce);
        Ok(())
    }

    /// Get-or-create the account with `counterparty`, creating it on the
    /// canonical side's accounting convention if absent. Public so the
    /// runtime can drive each account's own propose/ack cycle after an
    /// entity tick (spec's data flow: entity commits may create
    /// account-layer inputs to counterparties).
    pub fn account_mut(&mut self, counterparty: EntityId) -> &mut AccountState {
        let key = AccountKey::new(self.entity_id, counterparty);
        self.accounts
            .entry(counterparty)
            .or_insert_with(|| AccountState::new(key, self.entity_id))
    }

    /// Merkle root over sorted account-key hashes and per-key state digests
    /// (spec §4.2 / §4.5), folded into the entity frame's `state_hash` so
    /// that re-applying a frame is checked against resulting state, not
    /// just the frame's inputs. Mirrors `xln_persistence::ReplicaSnapshot::digest`.
    pub fn accounts_root(&self) -> Hash {
        let leaves: Vec<Hash> = self.accounts.iter().map(|(peer, account)| account_digest(*peer, account)).collect();
        merkle_root(&leaves)
    }

    /// Apply a single tx, mutating `self` and returning any outputs. On
    /// error `self` is left exactly as it was (every mutating path below
    /// validates before it writes).
    pub fn apply(&mut self, tx: &EntityTx) -> Result<Vec<EntityOutput>, CoreError> {
        match tx {
            EntityTx::Chat { signer, nonce, message } => self.apply_chat(*signer, *nonce, message),
            EntityTx::Propose {
                signer,
                nonce,
                proposal_id,
                action,
            } => self.apply_propose(*signer, *nonce, *proposal_id, action),
            EntityTx::Vote {
                signer,
                nonce,
                proposal_id,
                approve,
            } => self.apply_vote(*signer, *nonce, *proposal_id, *approve),
            EntityTx::JEvent { event } => self.apply_j_event(event),
            EntityTx::OpenAccount {
                signer,
                nonce,
                counterparty,
            } => self.apply_open_account(*signer, *nonce, *counterparty),
            EntityTx::AccountInput { input } => self.apply_account_input(input),
            EntityTx::DirectPayment {
                signer,
                nonce,
                token,
                amount,
                to,
                description,
            } => self.apply_direct_payment(*signer, *nonce, *token, amount, *to, description),
            EntityTx::DepositCollateral {
                signer,
                nonce,
                counterparty,
                token,
                amount,
            } => self.apply_deposit_collateral(*signer, *nonce, *counterparty, *token, amount),
            EntityTx::RequestWithdrawal {
                signer,
                nonce,
                counterparty,
                token,
                amount,
            } => self.apply_request_withdrawal(*signer, *nonce, *counterparty, *token, amount),
            EntityTx::SettleDiffs {
                signer,
                nonce,
                counterparty,
                diffs,
            } => self.apply_settle_diffs(*signer, *nonce, *counterparty, diffs),
        }
    }

    fn apply_chat(&mut self, signer: SignerId, nonce: u64, message: &str) -> Result<Vec<EntityOutput>, CoreError> {
        if message.is_empty() || message.len() > MAX_CHAT_MESSAGE_LEN {
            return Err(CoreError::MalformedInput {
                message: format!("chat message length {} out of bounds", message.len()),
            });
        }
        self.check_and_bump_nonce(signer, nonce)?;
        self.message_log.push(message.to_string());
        Ok(Vec::new())
    }

    fn apply_propose(
        &mut self,
        signer: SignerId,
        nonce: u64,
        proposal_id: u64,
        action: &ProposalAction,
    ) -> Result<Vec<EntityOutput>, CoreError> {
        if self.proposals.contains_key(&proposal_id) {
            return Err(CoreError::MalformedInput {
                message: format!("proposal {proposal_id} already exists"),
            });
        }
        self.check_and_bump_nonce(signer, nonce)?;
        let mut proposal = Proposal::new(proposal_id, action.clone());
        proposal.votes.insert(signer, true);
        if self.quorum.is_sufficient_alone(signer) {
            self.execute_proposal(&mut proposal);
        }
        self.proposals.insert(proposal_id, proposal);
        Ok(Vec::new())
    }

    fn apply_vote(
        &mut self,
        signer: SignerId,
        nonce: u64,
        proposal_id: u64,
        approve: bool,
    ) -> Result<Vec<EntityOutput>, CoreError> {
        let proposal = self
            .proposals
            .get(&proposal_id)
            .ok_or_else(|| CoreError::MalformedInput {
                message: format!("proposal {proposal_id} does not exist"),
            })?;
        if proposal.status != ProposalStatus::Pending {
            return Err(CoreError::MalformedInput {
                message: format!("proposal {proposal_id} is not pending"),
            });
        }
        self.check_and_bump_nonce(signer, nonce)?;
        let proposal = self.proposals.get_mut(&proposal_id).unwrap();
        proposal.votes.insert(signer, approve);
        let yes_power = self
            .quorum
            .power_of_set(proposal.votes.iter().filter(|(_, v)| **v).map(|(s, _)| *s));
        if yes_power >= self.quorum.threshold {
            let mut proposal = self.proposals.remove(&proposal_id).unwrap();
            self.execute_proposal(&mut proposal);
            self.proposals.insert(proposal_id, proposal);
        }
        Ok(Vec::new())
    }

    fn execute_proposal(&mut self, proposal: &mut Proposal) {
        match &proposal.action {
            ProposalAction::UpdateQuorum(new_quorum) => {
                self.quorum = new_quorum.clone();
            }
            ProposalAction::Noop { .. } => {}
        }
        proposal.status = ProposalStatus::Executed;
    }

    fn apply_j_event(&mut self, event: &JEvent) -> Result<Vec<EntityOutput>, CoreError> {
        match event {
            JEvent::RegisterEntity { quorum } => {
                self.quorum = quorum.clone();
            }
            JEvent::ReserveUpdated { token, new_reserve } => {
                self.reserves.insert(*token, new_reserve.clone());
            }
            JEvent::SettlementConfirmed { counterparty, token } => {
                // The account's delta already reflects the settlement once
                // its settlement_ack account-tx lands; this j_event is the
                // ledger-side confirmation that unblocks a future one.
                if let Some(account) = self.accounts.get_mut(counterparty) {
                    account.enqueue(AccountTx::SettlementAck {
                        token: *token,
                        batch_id: format!("{counterparty}:{token}"),
                    });
                }
            }
            JEvent::TokenRegistered { token, .. } => {
                self.reserves.entry(*token).or_insert_with(BigInt::zero);
            }
        }
        Ok(Vec::new())
    }

    fn apply_open_account(
        &mut self,
        signer: SignerId,
        nonce: u64,
        counterparty: EntityId,
    ) -> Result<Vec<EntityOutput>, CoreError> {
        if counterparty == self.entity_id {
            return Err(CoreError::MalformedInput {
                message: "an account's counterparty must differ from the entity itself".into(),
            });
        }
        self.check_and_bump_nonce(signer, nonce)?;
        let key = AccountKey::new(self.entity_id, counterparty);
        let is_canonical = key.is_left(self.entity_id);
        let account = self
            .accounts
            .entry(counterparty)
            .or_insert_with(|| AccountState::new(key, self.entity_id));
        if is_canonical {
            // The canonical (left) side seeds the default delta slot with a
            // starting two-way credit line (spec §8 scenario 1's concrete
            // values: token 1, 1_000_000 on each side — see DESIGN.md).
            account.enqueue(AccountTx::AddDelta { token: DEFAULT_TOKEN });
            account.enqueue(AccountTx::SetCreditLimit {
                token: DEFAULT_TOKEN,
                side: Side::Left,
                amount: BigInt::from(DEFAULT_CREDIT_LIMIT),
            });
            account.enqueue(AccountTx::SetCreditLimit {
                token: DEFAULT_TOKEN,
                side: Side::Right,
                amount: BigInt::from(DEFAULT_CREDIT_LIMIT),
            });
        }
        Ok(Vec::new())
    }

    /// Register the ed25519 key a counterparty signs its account frames
    /// with. Not itself a spec tx kind; the runtime calls this once it
    /// learns the key out-of-band (bootstrap config or `j_event`).
    pub fn register_peer_key(&mut self, entity: EntityId, key: VerifyingKey) {
        self.peer_keys.insert(entity, key);
    }

    fn apply_account_input(&mut self, input: &AccountInput) -> Result<Vec<EntityOutput>, CoreError> {
        let peer_key = *self
            .peer_keys
            .get(&input.from)
            .ok_or_else(|| CoreError::Unauthorized {
                signer: input.from.to_string(),
            })?;
        let my_signing_key = self
            .my_signing_key
            .clone()
            .ok_or_else(|| CoreError::Unauthorized {
                signer: self.entity_id.to_string(),
            })?;
        let account = self.account_mut(input.from);
        let reply = account.receive(input.clone(), &my_signing_key, &peer_key)?;
        let mut outputs = Vec::new();
        if let Some(forward) = account.take_pending_forward() {
            // `remaining_route` starts at this entity (the forwarding
            // sender); the next hop is the entry right after it.
            if let Some(&next_hop) = forward.remaining_route.get(1) {
                let my_entity_id = self.entity_id;
                let next_account = self.account_mut(next_hop);
                next_account.enqueue(AccountTx::DirectPayment {
                    token: forward.token,
                    amount: forward.amount,
                    route: forward.remaining_route,
                    from: my_entity_id,
                    to: next_hop,
                    description: forward.description,
                });
            } else {
                warn!("pending_forward with no next hop in its remaining route; dropping");
            }
        }
        if let Some(reply) = reply {
            outputs.push(EntityOutput::AccountMessage { to: input.from, input: reply });
        }
        Ok(outputs)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_direct_payment(
        &mut self,
        signer: SignerId,
        nonce: u64,
        token: TokenId,
        amount: &BigInt,
        to: EntityId,
        description: &str,
    ) -> Result<Vec<EntityOutput>, CoreError> {
        self.check_and_bump_nonce(signer, nonce)?;
        let my_entity_id = self.entity_id;
        // A direct account skips the gossip lookup; otherwise resolve a
        // path (spec §4.2 "resolve route (direct or via gossip path)") and
        // abort if none exists (spec §4.8).
        let route = if self.accounts.contains_key(&to) {
            vec![my_entity_id, to]
        } else {
            self.route_finder
                .as_ref()
                .map(|finder| finder.find_paths(my_entity_id, to))
                .unwrap_or_default()
                .into_iter()
                .next()
                .ok_or_else(|| CoreError::NoRouteFound {
                    from: my_entity_id.to_string(),
                    to: to.to_string(),
                })?
        };
        let next_hop = *route.get(1).ok_or_else(|| CoreError::NoRouteFound {
            from: my_entity_id.to_string(),
            to: to.to_string(),
        })?;
        let account = self.account_mut(next_hop);
        account.enqueue(AccountTx::DirectPayment {
            token,
            amount: amount.clone(),
            route,
            from: my_entity_id,
            to,
            description: description.to_string(),
        });
        Ok(Vec::new())
    }

    fn apply_deposit_collateral(
        &mut self,
        signer: SignerId,
        nonce: u64,
        counterparty: EntityId,
        token: TokenId,
        amount: &BigInt,
    ) -> Result<Vec<EntityOutput>, CoreError> {
        let reserve = self.reserves.get(&token).cloned().unwrap_or_default();
        if reserve < *amount {
            return Err(CoreError::InsufficientReserve {
                available: reserve.to_string(),
                requested: amount.to_string(),
            });
        }
        if !self.accounts.contains_key(&counterparty) {
            return Err(CoreError::AccountNotFound {
                account: counterparty.to_string(),
            });
        }
        self.check_and_bump_nonce(signer, nonce)?;
        self.reserves.insert(token, reserve - amount);
        let diffs = vec![(
            token,
            SettlementDiff {
                left_diff: BigInt::zero(),
                right_diff: BigInt::zero(),
                collateral_diff: amount.clone(),
                on_delta_diff: BigInt::zero(),
            },
        )];
        let key = AccountKey::new(self.entity_id, counterparty);
        Ok(vec![EntityOutput::SettlementBatch {
            left: key.left,
            right: key.right,
            diffs,
        }])
    }

    fn apply_request_withdrawal(
        &mut self,
        signer: SignerId,
        nonce: u64,
        counterparty: EntityId,
        token: TokenId,
        amount: &BigInt,
    ) -> Result<Vec<EntityOutput>, CoreError> {
        if !self.accounts.contains_key(&counterparty) {
            return Err(CoreError::AccountNotFound {
                account: counterparty.to_string(),
            });
        }
        self.check_and_bump_nonce(signer, nonce)?;
        let diffs = vec![(
            token,
            SettlementDiff {
                left_diff: BigInt::zero(),
                right_diff: BigInt::zero(),
                collateral_diff: -amount.clone(),
                on_delta_diff: BigInt::zero(),
            },
        )];
        let key = AccountKey::new(self.entity_id, counterparty);
        Ok(vec![EntityOutput::SettlementBatch {
            left: key.left,
            right: key.right,
            diffs,
        }])
    }

    fn apply_settle_diffs(
        &mut self,
        signer: SignerId,
        nonce: u64,
        counterparty: EntityId,
        diffs: &[(TokenId, SettlementDiff)],
    ) -> Result<Vec<EntityOutput>, CoreError> {
        if !self.accounts.contains_key(&counterparty) {
            return Err(CoreError::AccountNotFound {
                account: counterparty.to_string(),
            });
        }
        for (token, diff) in diffs {
            xln_rcpan::check_zero_sum(diff).map_err(|_| CoreError::ZeroSumViolation {
                token: token.to_string(),
                sum: (&diff.left_diff + &diff.right_diff + &diff.collateral_diff).to_string(),
            })?;
        }
        self.check_and_bump_nonce(signer, nonce)?;
        let key = AccountKey::new(self.entity_id, counterparty);
        Ok(vec![EntityOutput::SettlementBatch {
            left: key.left,
            right: key.right,
            diffs: diffs.to_vec(),
        }])
    }
}

// Kept out of the constructor: a replica only needs its own signing key to
// act on accountInput, and tests/the runtime set it once after construction.
impl EntityState {
    pub fn with_signing_key(mut self, key: SigningKey) -> Self {
        self.my_signing_key = Some(key);
        self
    }

    pub fn with_route_finder(mut self, route_finder: Box<dyn RouteFinder>) -> Self {
        self.route_finder = Some(route_finder);
        self
    }
}

/// `hash(rlp(peer, height, sorted deltas))` for one account, the leaf
/// digest folded into [`EntityState::accounts_root`].
fn account_digest(peer: EntityId, account: &AccountState) -> Hash {
    let deltas = RlpValue::list(
        account
            .deltas
            .iter()
            .map(|(token, delta)| {
                RlpValue::list(vec![
                    RlpValue::uint(token.0),
                    RlpValue::bytes(serde_json::to_vec(delta).expect("Delta always serializes")),
                ])
            })
            .collect::<Vec<_>>(),
    );
    let value = RlpValue::list(vec![
        RlpValue::bytes(peer.as_bytes().to_vec()),
        RlpValue::uint(account.height),
        deltas,
    ]);
    keccak256(&xln_rlp::encode(&value))
}
