//! Validator-voting core
//!
//! A core tracks one open kernel at a time. Validators vote on metablock
//! proposals for it; once a proposal collects a quorum the core precommits,
//! keeps accepting late votes for the precommit for a short window, and then
//! waits for the orchestrator to open the next kernel.

use crate::kernel::{domain_separator, Kernel, Metablock};
use crate::validator_set::{ValidatorRecord, ValidatorSet};
use crate::vote::{VoteBook, VoteCount};
use mosaic_core::{
    Address, BlockHeight, CallContext, CoreConfig, CoreGenesis, Dynasty, Gas, Hash, MosaicError,
    MosaicResult, Reputation, VoteSignature,
};
use mosaic_crypto::signing::recover_vote_signer;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle of a core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreStatus {
    /// Collecting the initial validators
    Created,
    /// Accepting proposals and votes for the open kernel
    Open,
    /// A proposal reached quorum
    Precommitted,
    /// Terminal
    Halted,
}

/// Events emitted by the core
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// Minimum validator count reached
    Opened { height: BlockHeight, quorum: u64 },
    /// Join or logout queued for the next kernel
    ValidatorQueued {
        validator: Address,
        height: BlockHeight,
        joining: bool,
    },
    MetablockProposed { proposal: Hash, dynasty: Dynasty },
    VoteRegistered {
        proposal: Hash,
        validator: Address,
        count: u64,
    },
    VoteRemoved { proposal: Hash, validator: Address },
    Precommitted {
        proposal: Hash,
        closure_block_height: BlockHeight,
    },
    MetablockOpened {
        height: BlockHeight,
        kernel_hash: Hash,
    },
    Halted,
}

/// Validator updates queued for one future kernel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelUpdates {
    pub validators: Vec<Address>,
    /// 1 for a join, 0 for a logout
    pub reputations: Vec<u64>,
}

impl KernelUpdates {
    pub fn contains(&self, validator: &Address) -> bool {
        self.validators.contains(validator)
    }

    pub fn joins(&self) -> u64 {
        self.reputations.iter().filter(|&&r| r > 0).count() as u64
    }

    pub fn logouts(&self) -> u64 {
        self.reputations.iter().filter(|&&r| r == 0).count() as u64
    }

    fn push(&mut self, validator: Address, reputation: u64) {
        self.validators.push(validator);
        self.reputations.push(reputation);
    }
}

/// Fields of the last committed metablock that new proposals must exceed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedMetablock {
    pub dynasty: Dynasty,
    pub accumulated_gas: Gas,
    pub source: Hash,
    pub source_block_height: BlockHeight,
}

/// Outcome of an accepted vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub validator: Address,
    pub count: u64,
    /// This vote moved the core to precommitted
    pub precommitted: bool,
}

/// Serializable state of a core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreState {
    pub(crate) config: CoreConfig,
    pub(crate) status: CoreStatus,
    pub(crate) domain_separator: Hash,
    pub(crate) validators: ValidatorSet,
    pub(crate) open_kernel: Kernel,
    pub(crate) open_kernel_hash: Hash,
    pub(crate) kernel_hashes: BTreeMap<BlockHeight, Hash>,
    pub(crate) votes: VoteBook,
    pub(crate) precommit: Option<Hash>,
    pub(crate) precommit_closure_block_height: BlockHeight,
    pub(crate) pending: BTreeMap<BlockHeight, KernelUpdates>,
    pub(crate) quorum: u64,
    pub(crate) committed: CommittedMetablock,
}

impl CoreState {
    pub fn status(&self) -> CoreStatus {
        self.status
    }

    pub fn open_kernel_height(&self) -> BlockHeight {
        self.open_kernel.height
    }

    pub fn core_id(&self) -> Address {
        self.config.core_id
    }

    /// Latest range of every validator
    pub fn validator_records(&self) -> Vec<ValidatorRecord> {
        let mut seen = HashSet::new();
        self.validators
            .iter()
            .filter(|record| seen.insert(record.address))
            .copied()
            .collect()
    }

    pub fn kernel_hashes(&self) -> &BTreeMap<BlockHeight, Hash> {
        &self.kernel_hashes
    }

    pub fn vote_counts(&self) -> impl Iterator<Item = (&Hash, &VoteCount)> {
        self.votes.iter()
    }

    /// Check the consistency a live core maintains
    pub fn validate(&self) -> MosaicResult<()> {
        self.config.validate()?;
        let corrupt = |what: &str| {
            Err(MosaicError::DeserializationError(format!(
                "Core {} snapshot is corrupt: {}",
                self.config.core_id, what
            )))
        };

        if self.domain_separator != domain_separator(&self.config.metachain_id, &self.config.core_id)
        {
            return corrupt("domain separator does not match the config");
        }
        if self.open_kernel_hash != self.open_kernel.hash(&self.domain_separator) {
            return corrupt("open kernel hash does not match the kernel");
        }
        if self.kernel_hashes.get(&self.open_kernel.height) != Some(&self.open_kernel_hash) {
            return corrupt("open kernel is not recorded");
        }
        let precommit_consistent = match self.status {
            CoreStatus::Precommitted => self.precommit.is_some(),
            CoreStatus::Created | CoreStatus::Open => self.precommit.is_none(),
            CoreStatus::Halted => true,
        };
        if !precommit_consistent {
            return corrupt("status and precommit disagree");
        }
        Ok(())
    }
}

/// Validator-voting state machine of one metachain core
pub struct Core {
    state: CoreState,
    reputation: Arc<dyn Reputation>,
    event_tx: Option<mpsc::Sender<CoreEvent>>,
}

pub type SharedCore = Arc<Mutex<Core>>;

pub fn create_shared_core(core: Core) -> SharedCore {
    Arc::new(Mutex::new(core))
}

impl Core {
    /// Create a core in the `Created` state with its genesis kernel open
    pub fn new(
        config: CoreConfig,
        genesis: CoreGenesis,
        reputation: Arc<dyn Reputation>,
    ) -> MosaicResult<Self> {
        config.validate()?;
        if genesis.height > 0 && genesis.parent.is_zero() {
            return Err(MosaicError::InvariantViolation(
                "Parent of a non-genesis kernel must not be null".into(),
            ));
        }
        if genesis.source_block_height % config.epoch_length != 0 {
            return Err(MosaicError::InvariantViolation(
                "Committed source block height must be a checkpoint".into(),
            ));
        }

        let domain_separator = domain_separator(&config.metachain_id, &config.core_id);
        let open_kernel = Kernel {
            height: genesis.height,
            parent: genesis.parent,
            updated_validators: Vec::new(),
            updated_reputations: Vec::new(),
            gas_target: genesis.gas_target,
        };
        let open_kernel_hash = open_kernel.hash(&domain_separator);
        let mut kernel_hashes = BTreeMap::new();
        kernel_hashes.insert(open_kernel.height, open_kernel_hash);

        info!(
            "Core {} created at kernel height {}",
            config.core_id, open_kernel.height
        );

        Ok(Self {
            state: CoreState {
                committed: CommittedMetablock {
                    dynasty: genesis.dynasty,
                    accumulated_gas: genesis.accumulated_gas,
                    source: genesis.source,
                    source_block_height: genesis.source_block_height,
                },
                config,
                status: CoreStatus::Created,
                domain_separator,
                validators: ValidatorSet::new(),
                open_kernel,
                open_kernel_hash,
                kernel_hashes,
                votes: VoteBook::new(),
                precommit: None,
                precommit_closure_block_height: 0,
                pending: BTreeMap::new(),
                quorum: 0,
            },
            reputation,
            event_tx: None,
        })
    }

    /// Rebuild a core from a snapshot
    pub fn restore(state: CoreState, reputation: Arc<dyn Reputation>) -> MosaicResult<Self> {
        state.validate()?;
        Ok(Self {
            state,
            reputation,
            event_tx: None,
        })
    }

    /// Return to a snapshot taken from this core, keeping its event channel
    pub fn rewind(&mut self, state: CoreState) {
        self.state = state;
    }

    /// Copy of the full state
    pub fn snapshot(&self) -> CoreState {
        self.state.clone()
    }

    /// Set event channel
    pub fn set_event_channel(&mut self, tx: mpsc::Sender<CoreEvent>) {
        self.event_tx = Some(tx);
    }

    // ---- Orchestrator operations ----

    /// Add a validator while the core is still being assembled
    ///
    /// The core opens as soon as the minimum validator count is reached.
    pub fn join_before_open(&mut self, ctx: &CallContext, validator: Address) -> MosaicResult<()> {
        self.require_orchestrator(ctx)?;
        self.require_status(CoreStatus::Created, "join before open")?;

        let height = self.open_kernel_height();
        if self.state.validators.count_active(height) >= self.state.config.join_limit {
            return Err(MosaicError::InvariantViolation(
                "Join limit is reached for this core".into(),
            ));
        }
        self.state.validators.insert(validator, height)?;
        debug!("Validator {} joined core before open", validator);

        let count = self.state.validators.count_active(height);
        if count >= self.state.config.minimum_validator_count {
            self.state.quorum = self.state.config.quorum(count);
            self.state.status = CoreStatus::Open;
            info!(
                "Core opened at height {} with {} validators, quorum {}",
                height, count, self.state.quorum
            );
            self.emit_event(CoreEvent::Opened {
                height,
                quorum: self.state.quorum,
            });
        }
        Ok(())
    }

    /// Queue a validator to join at the next kernel
    pub fn join(&mut self, ctx: &CallContext, validator: Address) -> MosaicResult<()> {
        self.require_orchestrator(ctx)?;
        self.require_status(CoreStatus::Open, "join")?;

        let next = self.next_kernel_height()?;
        if validator.is_reserved() {
            return Err(MosaicError::InvariantViolation(
                "Validator address must not be null or the sentinel".into(),
            ));
        }
        if self.queued(next).contains(&validator) {
            return Err(MosaicError::Idempotency(format!(
                "Validator {} is already queued for height {}",
                validator, next
            )));
        }
        if let Some(record) = self.state.validators.record(&validator) {
            if !record.is_retired() {
                return Err(MosaicError::Idempotency(format!(
                    "Validator {} is already active",
                    validator
                )));
            }
        }
        if self.projected_count(next) + 1 > self.state.config.join_limit {
            return Err(MosaicError::InvariantViolation(
                "Join limit is reached for this core".into(),
            ));
        }
        self.state.validators.check_insert(&validator, next)?;

        self.state.pending.entry(next).or_default().push(validator, 1);
        info!("Validator {} queued to join at height {}", validator, next);
        self.emit_event(CoreEvent::ValidatorQueued {
            validator,
            height: next,
            joining: true,
        });
        Ok(())
    }

    /// Queue an active validator to leave at the next kernel
    pub fn logout(&mut self, ctx: &CallContext, validator: Address) -> MosaicResult<()> {
        self.require_orchestrator(ctx)?;
        self.require_status(CoreStatus::Open, "logout")?;

        let next = self.next_kernel_height()?;
        if validator.is_reserved() {
            return Err(MosaicError::InvariantViolation(
                "Validator address must not be null or the sentinel".into(),
            ));
        }
        if self.queued(next).contains(&validator) {
            return Err(MosaicError::Idempotency(format!(
                "Validator {} is already queued for height {}",
                validator, next
            )));
        }
        let is_current = self
            .state
            .validators
            .record(&validator)
            .map(|r| !r.is_retired() && r.is_active_at(self.open_kernel_height()))
            .unwrap_or(false);
        if !is_current {
            return Err(MosaicError::InvariantViolation(format!(
                "Validator {} must be active to log out",
                validator
            )));
        }
        if self.projected_count(next) < self.state.config.minimum_validator_count + 1 {
            return Err(MosaicError::InvariantViolation(
                "Logout would drop the core below the minimum validator count".into(),
            ));
        }
        self.state.validators.check_remove(&validator, next)?;

        self.state.pending.entry(next).or_default().push(validator, 0);
        info!("Validator {} queued to log out at height {}", validator, next);
        self.emit_event(CoreEvent::ValidatorQueued {
            validator,
            height: next,
            joining: false,
        });
        Ok(())
    }

    /// Withdraw the vote of a validator
    ///
    /// No-op for reserved addresses, inactive validators and validators
    /// without a vote.
    pub fn remove_vote(
        &mut self,
        ctx: &CallContext,
        validator: Address,
    ) -> MosaicResult<Option<Hash>> {
        self.require_orchestrator(ctx)?;
        self.require_running("remove vote")?;

        let height = self.open_kernel_height();
        if validator.is_reserved() || !self.state.validators.is_active(&validator, height) {
            return Ok(None);
        }
        let removed = self.state.votes.withdraw(&validator, height);
        if let Some(proposal) = removed {
            debug!("Removed vote of {} for {}", validator, proposal);
            self.emit_event(CoreEvent::VoteRemoved {
                proposal,
                validator,
            });
        }
        Ok(removed)
    }

    /// Apply queued updates, recompute the quorum and open the next kernel
    ///
    /// Returns the hash of the newly opened kernel.
    pub fn open_metablock(
        &mut self,
        ctx: &CallContext,
        dynasty: Dynasty,
        accumulated_gas: Gas,
        source: Hash,
        source_block_height: BlockHeight,
        delta_gas_target: Gas,
    ) -> MosaicResult<Hash> {
        self.require_orchestrator(ctx)?;
        self.require_status(CoreStatus::Precommitted, "open metablock")?;

        let parent = self
            .state
            .precommit
            .ok_or_else(|| MosaicError::Internal("precommitted core without precommit".into()))?;
        let next = self.next_kernel_height()?;
        let gas_target = accumulated_gas.checked_add(delta_gas_target).ok_or_else(|| {
            MosaicError::InvariantViolation("Gas target overflows".into())
        })?;

        let updates = self.queued(next);
        let mut validators = self.state.validators.clone();
        for (validator, reputation) in updates.validators.iter().zip(&updates.reputations) {
            if *reputation > 0 {
                validators.insert(*validator, next)?;
            } else {
                validators.remove(*validator, next)?;
            }
        }

        let kernel = Kernel {
            height: next,
            parent,
            updated_validators: updates.validators,
            updated_reputations: updates.reputations,
            gas_target,
        };
        let kernel_hash = kernel.hash(&self.state.domain_separator);
        let quorum = self.state.config.quorum(validators.count_active(next));

        self.state.validators = validators;
        self.state.pending.remove(&next);
        self.state.kernel_hashes.insert(next, kernel_hash);
        self.state.open_kernel = kernel;
        self.state.open_kernel_hash = kernel_hash;
        self.state.quorum = quorum;
        self.state.committed = CommittedMetablock {
            dynasty,
            accumulated_gas,
            source,
            source_block_height,
        };
        self.state.precommit = None;
        self.state.precommit_closure_block_height = 0;
        self.state.status = CoreStatus::Open;

        info!(
            "Opened kernel {} at height {} with quorum {}",
            kernel_hash, next, quorum
        );
        self.emit_event(CoreEvent::MetablockOpened {
            height: next,
            kernel_hash,
        });
        Ok(kernel_hash)
    }

    /// Stop the core permanently
    pub fn halt(&mut self, ctx: &CallContext) -> MosaicResult<()> {
        self.require_orchestrator(ctx)?;
        self.require_running("halt")?;
        self.state.status = CoreStatus::Halted;
        warn!("Core {} halted", self.state.config.core_id);
        self.emit_event(CoreEvent::Halted);
        Ok(())
    }

    // ---- Public operations ----

    /// Register a metablock proposal for the open kernel
    pub fn propose_metablock(&mut self, metablock: &Metablock) -> MosaicResult<Hash> {
        self.require_running("propose metablock")?;
        if self.state.status == CoreStatus::Created {
            return Err(MosaicError::StateTransition(
                "Core must be open to accept proposals".into(),
            ));
        }

        let epoch = self.state.config.epoch_length;
        if metablock.source_block_height % epoch != 0 {
            return Err(MosaicError::InvariantViolation(
                "Source block height must be a checkpoint".into(),
            ));
        }
        if metablock.target_block_height != metablock.source_block_height.saturating_add(epoch) {
            return Err(MosaicError::InvariantViolation(
                "Target block height must be one epoch after the source".into(),
            ));
        }
        if metablock.origin_observation.is_zero() {
            return Err(MosaicError::InvariantViolation(
                "Origin observation must not be null".into(),
            ));
        }
        if metablock.committee_lock.is_zero() {
            return Err(MosaicError::InvariantViolation(
                "Committee lock must not be null".into(),
            ));
        }
        if metablock.source.is_zero() || metablock.target.is_zero() {
            return Err(MosaicError::InvariantViolation(
                "Source and target must not be null".into(),
            ));
        }
        if metablock.dynasty <= self.state.committed.dynasty {
            return Err(MosaicError::InvariantViolation(format!(
                "Dynasty must be greater than the committed dynasty {}",
                self.state.committed.dynasty
            )));
        }
        if metablock.accumulated_gas <= self.state.committed.accumulated_gas {
            return Err(MosaicError::InvariantViolation(format!(
                "Accumulated gas must be greater than the committed {}",
                self.state.committed.accumulated_gas
            )));
        }

        let proposal = metablock.hash(&self.state.domain_separator);
        self.state
            .votes
            .register(proposal, self.open_kernel_height(), metablock.dynasty)?;

        debug!(
            "Registered proposal {} with dynasty {}",
            proposal, metablock.dynasty
        );
        self.emit_event(CoreEvent::MetablockProposed {
            proposal,
            dynasty: metablock.dynasty,
        });
        Ok(proposal)
    }

    /// Count a signed vote for a registered proposal
    pub fn register_vote(
        &mut self,
        ctx: &CallContext,
        proposal: Hash,
        signature: &VoteSignature,
    ) -> MosaicResult<VoteReceipt> {
        match self.state.status {
            CoreStatus::Open => {}
            CoreStatus::Precommitted => {
                if self.state.precommit != Some(proposal) {
                    return Err(MosaicError::StateTransition(
                        "Core has precommitted, only votes for the precommit are counted".into(),
                    ));
                }
                if ctx.block_height > self.state.precommit_closure_block_height {
                    return Err(MosaicError::StateTransition(format!(
                        "Votes for the precommit closed at block height {}",
                        self.state.precommit_closure_block_height
                    )));
                }
            }
            status => {
                return Err(MosaicError::StateTransition(format!(
                    "Cannot register votes while {:?}",
                    status
                )));
            }
        }

        if proposal.is_zero() {
            return Err(MosaicError::InvariantViolation(
                "Proposal must not be null".into(),
            ));
        }
        let height = self.open_kernel_height();
        let registered = self.state.votes.get(&proposal).ok_or_else(|| {
            MosaicError::InvariantViolation(format!("Proposal {} is not registered", proposal))
        })?;
        if registered.height != height {
            return Err(MosaicError::InvariantViolation(format!(
                "Proposal {} is not registered at the open kernel height",
                proposal
            )));
        }

        let validator = recover_vote_signer(&proposal, signature)?;
        if !self.state.validators.is_active(&validator, height) {
            return Err(MosaicError::AccessControl(format!(
                "Validator {} is not active in this core",
                validator
            )));
        }
        if !self.reputation.is_active_and_honest(&validator) {
            return Err(MosaicError::AccessControl(format!(
                "Validator {} is not active and honest",
                validator
            )));
        }

        let count = self.state.votes.cast(validator, proposal, height)?;
        debug!("Vote from {} for {}: {}", validator, proposal, count);
        self.emit_event(CoreEvent::VoteRegistered {
            proposal,
            validator,
            count,
        });

        let precommitted =
            self.state.status == CoreStatus::Open && count >= self.state.quorum;
        if precommitted {
            let closure = ctx
                .block_height
                .saturating_add(self.state.config.last_votes_window);
            self.state.status = CoreStatus::Precommitted;
            self.state.precommit = Some(proposal);
            self.state.precommit_closure_block_height = closure;
            info!(
                "Precommitted {} at height {} with {} votes",
                proposal, height, count
            );
            self.emit_event(CoreEvent::Precommitted {
                proposal,
                closure_block_height: closure,
            });
        }

        Ok(VoteReceipt {
            validator,
            count,
            precommitted,
        })
    }

    // ---- Queries ----

    /// Check that `metablock` is the precommitted proposal, returning its hash
    pub fn assert_precommit(&self, metablock: &Metablock) -> MosaicResult<Hash> {
        let precommit = self
            .state
            .precommit
            .ok_or_else(|| MosaicError::Mismatch("Core has not precommitted".into()))?;
        let proposal = metablock.hash(&self.state.domain_separator);
        if proposal != precommit {
            return Err(MosaicError::Mismatch(format!(
                "Metablock {} is not the precommit {}",
                proposal, precommit
            )));
        }
        Ok(proposal)
    }

    /// Hash a metablock under this core's domain
    pub fn hash_metablock(&self, metablock: &Metablock) -> Hash {
        metablock.hash(&self.state.domain_separator)
    }

    pub fn status(&self) -> CoreStatus {
        self.state.status
    }

    pub fn config(&self) -> &CoreConfig {
        &self.state.config
    }

    pub fn domain_separator(&self) -> Hash {
        self.state.domain_separator
    }

    pub fn open_kernel(&self) -> &Kernel {
        &self.state.open_kernel
    }

    pub fn open_kernel_height(&self) -> BlockHeight {
        self.state.open_kernel.height
    }

    pub fn open_kernel_hash(&self) -> Hash {
        self.state.open_kernel_hash
    }

    /// Kernel hash opened at `height`
    pub fn kernel_hash(&self, height: BlockHeight) -> Option<Hash> {
        self.state.kernel_hashes.get(&height).copied()
    }

    pub fn kernel_hashes(&self) -> impl Iterator<Item = (&BlockHeight, &Hash)> {
        self.state.kernel_hashes.iter()
    }

    pub fn quorum(&self) -> u64 {
        self.state.quorum
    }

    pub fn precommit(&self) -> Option<Hash> {
        self.state.precommit
    }

    pub fn precommit_closure_block_height(&self) -> BlockHeight {
        self.state.precommit_closure_block_height
    }

    pub fn committed(&self) -> &CommittedMetablock {
        &self.state.committed
    }

    pub fn vote_count(&self, proposal: &Hash) -> Option<VoteCount> {
        self.state.votes.get(proposal).copied()
    }

    pub fn vote_counts(&self) -> impl Iterator<Item = (&Hash, &VoteCount)> {
        self.state.votes.iter()
    }

    pub fn vote_of(&self, validator: &Address) -> Option<Hash> {
        self.state.votes.vote_of(validator)
    }

    pub fn validators(&self) -> impl Iterator<Item = &ValidatorRecord> {
        self.state.validators.iter()
    }

    pub fn is_validator(&self, validator: &Address) -> bool {
        self.state
            .validators
            .is_active(validator, self.open_kernel_height())
    }

    /// Validators active at the open kernel height
    pub fn count_validators(&self) -> u64 {
        self.state
            .validators
            .count_active(self.open_kernel_height())
    }

    /// Validators active at an arbitrary height
    pub fn count_active_at(&self, height: BlockHeight) -> u64 {
        self.state.validators.count_active(height)
    }

    /// Updates queued for the next kernel
    pub fn pending_updates(&self) -> KernelUpdates {
        match self.next_kernel_height() {
            Ok(next) => self.queued(next),
            Err(_) => KernelUpdates::default(),
        }
    }

    // ---- Helpers ----

    fn require_orchestrator(&self, ctx: &CallContext) -> MosaicResult<()> {
        if ctx.caller != self.state.config.orchestrator {
            return Err(MosaicError::AccessControl(
                "Only the orchestrator can call this operation".into(),
            ));
        }
        Ok(())
    }

    fn require_status(&self, expected: CoreStatus, operation: &str) -> MosaicResult<()> {
        if self.state.status != expected {
            return Err(MosaicError::StateTransition(format!(
                "Cannot {} while {:?}, core must be {:?}",
                operation, self.state.status, expected
            )));
        }
        Ok(())
    }

    fn require_running(&self, operation: &str) -> MosaicResult<()> {
        if self.state.status == CoreStatus::Halted {
            return Err(MosaicError::StateTransition(format!(
                "Cannot {} on a halted core",
                operation
            )));
        }
        Ok(())
    }

    fn next_kernel_height(&self) -> MosaicResult<BlockHeight> {
        self.open_kernel_height()
            .checked_add(1)
            .ok_or_else(|| MosaicError::InvariantViolation("Kernel height overflows".into()))
    }

    fn queued(&self, height: BlockHeight) -> KernelUpdates {
        self.state.pending.get(&height).cloned().unwrap_or_default()
    }

    /// Validator count at `height` once the queued updates are applied
    fn projected_count(&self, height: BlockHeight) -> u64 {
        let updates = self.queued(height);
        let active = self.state.validators.count_active(self.open_kernel_height());
        (active + updates.joins()).saturating_sub(updates.logouts())
    }

    fn emit_event(&self, event: CoreEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.try_send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::MemoryReputation;
    use mosaic_crypto::keys::KeyPair;
    use mosaic_crypto::signing::sign_vote;

    const ORCHESTRATOR: Address = Address([0xaa; 32]);

    struct Fixture {
        core: Core,
        keys: Vec<KeyPair>,
        reputation: Arc<MemoryReputation>,
    }

    fn orchestrator(height: BlockHeight) -> CallContext {
        CallContext::new(ORCHESTRATOR, height)
    }

    fn config() -> CoreConfig {
        CoreConfig {
            orchestrator: ORCHESTRATOR,
            metachain_id: Hash([1u8; 32]),
            core_id: Address([2u8; 32]),
            epoch_length: 100,
            ..Default::default()
        }
    }

    /// Core with `count` initial validators, all with reputation
    fn open_core(count: u8) -> Fixture {
        open_core_with(config(), count)
    }

    fn open_core_with(config: CoreConfig, count: u8) -> Fixture {
        let reputation = Arc::new(MemoryReputation::new());
        let mut core = Core::new(config, CoreGenesis::default(), reputation.clone()).unwrap();
        let keys: Vec<KeyPair> = (1..=count).map(|n| KeyPair::from_seed(&[n; 32])).collect();
        for key in &keys {
            reputation.set(key.address(), 1);
            core.join_before_open(&orchestrator(0), key.address()).unwrap();
        }
        Fixture {
            core,
            keys,
            reputation,
        }
    }

    fn metablock(core: &Core, dynasty: Dynasty) -> Metablock {
        Metablock {
            kernel_hash: core.open_kernel_hash(),
            origin_observation: Hash([3u8; 32]),
            dynasty,
            accumulated_gas: dynasty * 10,
            committee_lock: Hash([4u8; 32]),
            source: Hash([5u8; 32]),
            target: Hash([6u8; 32]),
            source_block_height: 100 * dynasty,
            target_block_height: 100 * dynasty + 100,
        }
    }

    fn vote(
        f: &mut Fixture,
        index: usize,
        proposal: Hash,
        height: BlockHeight,
    ) -> MosaicResult<VoteReceipt> {
        let signature = sign_vote(&f.keys[index], &proposal);
        let relayer = CallContext::new(Address([0xee; 32]), height);
        f.core.register_vote(&relayer, proposal, &signature)
    }

    #[test]
    fn test_opens_at_minimum_validator_count() {
        let mut f = open_core(4);
        assert_eq!(f.core.status(), CoreStatus::Created);

        let fifth = KeyPair::from_seed(&[5u8; 32]);
        f.core.join_before_open(&orchestrator(0), fifth.address()).unwrap();
        assert_eq!(f.core.status(), CoreStatus::Open);
        assert_eq!(f.core.quorum(), 3);
        assert_eq!(f.core.count_validators(), 5);
    }

    #[test]
    fn test_orchestrator_only() {
        let mut f = open_core(5);
        let stranger = CallContext::new(Address([0x01; 32]), 0);
        assert!(matches!(
            f.core.join(&stranger, Address([9u8; 32])),
            Err(MosaicError::AccessControl(_))
        ));
        assert!(matches!(f.core.halt(&stranger), Err(MosaicError::AccessControl(_))));
    }

    #[test]
    fn test_quorum_precommit() {
        let mut f = open_core(5);
        let proposal = f.core.propose_metablock(&metablock(&f.core, 1)).unwrap();

        vote(&mut f, 0, proposal, 10).unwrap();
        vote(&mut f, 1, proposal, 10).unwrap();
        assert_eq!(f.core.status(), CoreStatus::Open);

        let receipt = vote(&mut f, 2, proposal, 10).unwrap();
        assert!(receipt.precommitted);
        assert_eq!(receipt.count, 3);
        assert_eq!(f.core.status(), CoreStatus::Precommitted);
        assert_eq!(f.core.precommit(), Some(proposal));
        assert_eq!(f.core.precommit_closure_block_height(), 13);
        assert_eq!(
            f.core.assert_precommit(&metablock(&f.core, 1)).unwrap(),
            proposal
        );
    }

    #[test]
    fn test_late_votes_window() {
        let mut f = open_core(5);
        let proposal = f.core.propose_metablock(&metablock(&f.core, 1)).unwrap();
        let other = f.core.propose_metablock(&metablock(&f.core, 2)).unwrap();
        for i in 0..3 {
            vote(&mut f, i, proposal, 10).unwrap();
        }

        // Late vote for the precommit within the window
        let receipt = vote(&mut f, 3, proposal, 13).unwrap();
        assert_eq!(receipt.count, 4);
        assert!(!receipt.precommitted);

        // After the window
        assert!(matches!(
            vote(&mut f, 4, proposal, 14),
            Err(MosaicError::StateTransition(_))
        ));
        // Other proposals are rejected once precommitted
        assert!(matches!(
            vote(&mut f, 4, other, 11),
            Err(MosaicError::StateTransition(_))
        ));
    }

    #[test]
    fn test_duplicate_and_replayed_votes() {
        let mut f = open_core(5);
        let proposal = f.core.propose_metablock(&metablock(&f.core, 2)).unwrap();
        let lower = f.core.propose_metablock(&metablock(&f.core, 1)).unwrap();

        vote(&mut f, 0, proposal, 1).unwrap();
        assert!(matches!(
            vote(&mut f, 0, proposal, 1),
            Err(MosaicError::Idempotency(_))
        ));
        assert!(vote(&mut f, 0, lower, 1).is_err());
        assert_eq!(f.core.vote_count(&proposal).unwrap().count, 1);
        assert_eq!(f.core.vote_count(&lower).unwrap().count, 0);
    }

    #[test]
    fn test_recast_moves_vote() {
        let mut f = open_core(5);
        let first = f.core.propose_metablock(&metablock(&f.core, 1)).unwrap();
        let second = f.core.propose_metablock(&metablock(&f.core, 2)).unwrap();

        vote(&mut f, 0, first, 1).unwrap();
        vote(&mut f, 1, first, 1).unwrap();
        vote(&mut f, 0, second, 1).unwrap();

        assert_eq!(f.core.vote_count(&first).unwrap().count, 1);
        assert_eq!(f.core.vote_count(&second).unwrap().count, 1);
        assert_eq!(f.core.vote_of(&f.keys[0].address()), Some(second));
    }

    #[test]
    fn test_vote_rejections() {
        let mut f = open_core(5);
        let proposal = f.core.propose_metablock(&metablock(&f.core, 1)).unwrap();

        // Not a validator
        let outsider = KeyPair::from_seed(&[99u8; 32]);
        f.reputation.set(outsider.address(), 1);
        let signature = sign_vote(&outsider, &proposal);
        assert!(matches!(
            f.core.register_vote(&orchestrator(1), proposal, &signature),
            Err(MosaicError::AccessControl(_))
        ));

        // Slashed validator
        f.reputation.slash(&f.keys[0].address());
        assert!(matches!(
            vote(&mut f, 0, proposal, 1),
            Err(MosaicError::AccessControl(_))
        ));

        // Signature over another proposal
        let forged = sign_vote(&f.keys[1], &Hash([0x42; 32]));
        assert!(matches!(
            f.core.register_vote(&orchestrator(1), proposal, &forged),
            Err(MosaicError::InvalidSignature)
        ));

        // Unregistered and null proposals
        assert!(matches!(
            vote(&mut f, 1, Hash([0x42; 32]), 1),
            Err(MosaicError::InvariantViolation(_))
        ));
        assert!(matches!(
            vote(&mut f, 1, Hash::ZERO, 1),
            Err(MosaicError::InvariantViolation(_))
        ));
        assert_eq!(f.core.vote_count(&proposal).unwrap().count, 0);
    }

    #[test]
    fn test_propose_validation() {
        let mut f = open_core(5);

        let mut bad = metablock(&f.core, 1);
        bad.source_block_height = 150;
        bad.target_block_height = 250;
        assert!(matches!(
            f.core.propose_metablock(&bad),
            Err(MosaicError::InvariantViolation(_))
        ));

        let mut bad = metablock(&f.core, 1);
        bad.target_block_height += 1;
        assert!(f.core.propose_metablock(&bad).is_err());

        let mut bad = metablock(&f.core, 1);
        bad.committee_lock = Hash::ZERO;
        assert!(f.core.propose_metablock(&bad).is_err());

        // Dynasty must exceed the committed one
        assert!(f.core.propose_metablock(&metablock(&f.core, 0)).is_err());

        let good = metablock(&f.core, 1);
        f.core.propose_metablock(&good).unwrap();
        assert!(matches!(
            f.core.propose_metablock(&good),
            Err(MosaicError::Idempotency(_))
        ));
    }

    #[test]
    fn test_propose_requires_open_core() {
        let mut f = open_core(3);
        let metablock = metablock(&f.core, 1);
        assert!(matches!(
            f.core.propose_metablock(&metablock),
            Err(MosaicError::StateTransition(_))
        ));
    }

    #[test]
    fn test_join_and_logout_limits() {
        let mut f = open_core(5);
        let ctx = orchestrator(1);

        // Logging out would drop below the minimum of five
        assert!(matches!(
            f.core.logout(&ctx, f.keys[0].address()),
            Err(MosaicError::InvariantViolation(_))
        ));

        let newcomer = Address([50u8; 32]);
        f.core.join(&ctx, newcomer).unwrap();
        assert!(matches!(
            f.core.join(&ctx, newcomer),
            Err(MosaicError::Idempotency(_))
        ));
        assert!(matches!(
            f.core.join(&ctx, f.keys[0].address()),
            Err(MosaicError::Idempotency(_))
        ));

        // Counts the queued join
        f.core.logout(&ctx, f.keys[0].address()).unwrap();
        assert!(f.core.logout(&ctx, f.keys[1].address()).is_err());

        let pending = f.core.pending_updates();
        assert_eq!(pending.validators, vec![newcomer, f.keys[0].address()]);
        assert_eq!(pending.reputations, vec![1, 0]);

        // Not applied until the next kernel opens
        assert_eq!(f.core.count_validators(), 5);
        assert!(!f.core.is_validator(&newcomer));
    }

    #[test]
    fn test_join_limit() {
        let limited = CoreConfig {
            join_limit: 5,
            ..config()
        };
        let mut f = open_core_with(limited, 5);
        assert!(matches!(
            f.core.join(&orchestrator(1), Address([60u8; 32])),
            Err(MosaicError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_open_metablock_applies_updates() {
        let mut f = open_core(5);
        let ctx = orchestrator(1);
        let newcomer = KeyPair::from_seed(&[50u8; 32]);
        f.reputation.set(newcomer.address(), 1);
        f.core.join(&ctx, newcomer.address()).unwrap();
        f.core.join(&ctx, Address([51u8; 32])).unwrap();

        // Needs a precommit first
        assert!(matches!(
            f.core.open_metablock(&ctx, 1, 10, Hash([5u8; 32]), 100, 1000),
            Err(MosaicError::StateTransition(_))
        ));

        let proposal = f.core.propose_metablock(&metablock(&f.core, 1)).unwrap();
        for i in 0..3 {
            vote(&mut f, i, proposal, 2).unwrap();
        }
        let kernel_hash = f
            .core
            .open_metablock(&orchestrator(5), 1, 10, Hash([5u8; 32]), 100, 1000)
            .unwrap();

        assert_eq!(f.core.status(), CoreStatus::Open);
        assert_eq!(f.core.open_kernel_height(), 1);
        assert_eq!(f.core.open_kernel_hash(), kernel_hash);
        assert_eq!(f.core.kernel_hash(1), Some(kernel_hash));
        assert_eq!(f.core.open_kernel().parent, proposal);
        assert_eq!(f.core.open_kernel().gas_target, 1010);
        assert_eq!(f.core.count_validators(), 7);
        assert_eq!(f.core.count_active_at(0), 5);
        assert_eq!(f.core.quorum(), 4);
        assert!(f.core.precommit().is_none());
        assert!(f.core.pending_updates().validators.is_empty());
        assert_eq!(f.core.committed().dynasty, 1);

        // The newcomer can vote at the new height
        let next = f.core.propose_metablock(&metablock(&f.core, 2)).unwrap();
        let signature = sign_vote(&newcomer, &next);
        f.core.register_vote(&orchestrator(6), next, &signature).unwrap();

        // Proposals from the previous height no longer take votes
        assert!(vote(&mut f, 3, proposal, 6).is_err());
    }

    #[test]
    fn test_remove_vote() {
        let mut f = open_core(5);
        let proposal = f.core.propose_metablock(&metablock(&f.core, 1)).unwrap();
        vote(&mut f, 0, proposal, 1).unwrap();

        let removed = f.core.remove_vote(&orchestrator(1), f.keys[0].address()).unwrap();
        assert_eq!(removed, Some(proposal));
        assert_eq!(f.core.vote_count(&proposal).unwrap().count, 0);

        // No-ops
        assert_eq!(f.core.remove_vote(&orchestrator(1), Address::ZERO).unwrap(), None);
        assert_eq!(
            f.core.remove_vote(&orchestrator(1), Address([77u8; 32])).unwrap(),
            None
        );
        assert_eq!(
            f.core.remove_vote(&orchestrator(1), f.keys[0].address()).unwrap(),
            None
        );
    }

    #[test]
    fn test_assert_precommit_mismatch() {
        let mut f = open_core(5);
        let candidate = metablock(&f.core, 1);
        assert!(matches!(
            f.core.assert_precommit(&candidate),
            Err(MosaicError::Mismatch(_))
        ));

        let proposal = f.core.propose_metablock(&candidate).unwrap();
        for i in 0..3 {
            vote(&mut f, i, proposal, 1).unwrap();
        }
        assert!(matches!(
            f.core.assert_precommit(&metablock(&f.core, 2)),
            Err(MosaicError::Mismatch(_))
        ));
    }

    #[test]
    fn test_halt_is_terminal() {
        let mut f = open_core(5);
        let proposal = f.core.propose_metablock(&metablock(&f.core, 1)).unwrap();
        f.core.halt(&orchestrator(1)).unwrap();

        assert_eq!(f.core.status(), CoreStatus::Halted);
        assert!(matches!(
            vote(&mut f, 0, proposal, 1),
            Err(MosaicError::StateTransition(_))
        ));
        assert!(f.core.propose_metablock(&metablock(&f.core, 2)).is_err());
        assert!(f.core.halt(&orchestrator(1)).is_err());
        assert!(f.core.join(&orchestrator(1), Address([50u8; 32])).is_err());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut f = open_core(5);
        let proposal = f.core.propose_metablock(&metablock(&f.core, 1)).unwrap();
        vote(&mut f, 0, proposal, 1).unwrap();

        let bytes = bincode::serialize(&f.core.snapshot()).unwrap();
        let state: CoreState = bincode::deserialize(&bytes).unwrap();
        let mut restored = Core::restore(state, f.reputation.clone()).unwrap();

        assert_eq!(restored.status(), CoreStatus::Open);
        assert_eq!(restored.vote_count(&proposal).unwrap().count, 1);
        let signature = sign_vote(&f.keys[1], &proposal);
        let receipt = restored
            .register_vote(&orchestrator(1), proposal, &signature)
            .unwrap();
        assert_eq!(receipt.count, 2);
    }

    #[test]
    fn test_restore_rejects_corrupt_snapshot() {
        let f = open_core(5);

        let mut state = f.core.snapshot();
        state.status = CoreStatus::Precommitted;
        assert!(matches!(
            Core::restore(state, f.reputation.clone()),
            Err(MosaicError::DeserializationError(_))
        ));

        let mut state = f.core.snapshot();
        state.open_kernel_hash = Hash([0xee; 32]);
        assert!(Core::restore(state, f.reputation.clone()).is_err());

        let mut state = f.core.snapshot();
        state.config.super_majority_denominator = 0;
        assert!(Core::restore(state, f.reputation.clone()).is_err());
    }

    #[test]
    fn test_rewind() {
        let mut f = open_core(5);
        let before = f.core.snapshot();
        f.core.propose_metablock(&metablock(&f.core, 1)).unwrap();
        f.core.halt(&orchestrator(1)).unwrap();

        f.core.rewind(before);
        assert_eq!(f.core.status(), CoreStatus::Open);
        assert_eq!(f.core.vote_counts().count(), 0);
    }

    #[tokio::test]
    async fn test_events() {
        let reputation = Arc::new(MemoryReputation::new());
        let mut core = Core::new(config(), CoreGenesis::default(), reputation.clone()).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        core.set_event_channel(tx);

        for n in 1..=5u8 {
            core.join_before_open(&orchestrator(0), Address([n; 32])).unwrap();
        }
        match rx.recv().await {
            Some(CoreEvent::Opened { height, quorum }) => {
                assert_eq!(height, 0);
                assert_eq!(quorum, 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
