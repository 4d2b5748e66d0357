//! Node runtime: the orchestrator host of one core and its committees
//!
//! The runtime is the single writer of every state machine it hosts. Each
//! instance sits behind its own mutex; a call locks it, runs to completion,
//! and the resulting snapshot is written to the store before the caller sees
//! the result. A call that fails, or whose snapshot cannot be stored, leaves
//! the instance as it was before the call.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mosaic_committee::{create_shared_committee, Committee, CommitteeStatus, SharedCommittee};
use mosaic_consensus::{
    create_shared_core, CommittedMetablock, Core, CoreStatus, KernelUpdates, MemoryReputation,
    Metablock, SharedCore, ValidatorRecord, VoteCount, VoteReceipt,
};
use mosaic_core::{
    Address, BlockHeight, CallContext, Dynasty, Gas, Hash, MosaicError, MosaicResult, NodeConfig,
    Position, VoteSignature,
};
use mosaic_crypto::keys::KeyPair;
use mosaic_crypto::signing::{recover_member, reveal_payload, MemberAction};
use mosaic_state::SnapshotStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_SIZE: usize = 1024;

/// Fields of the metablock that closes the precommitted kernel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetablockCommit {
    pub dynasty: Dynasty,
    pub accumulated_gas: Gas,
    pub source: Hash,
    pub source_block_height: BlockHeight,
    pub delta_gas_target: Gas,
}

/// Summary of the hosted core
#[derive(Debug, Clone, Serialize)]
pub struct CoreView {
    pub core_id: Address,
    pub status: CoreStatus,
    pub open_kernel_height: BlockHeight,
    pub open_kernel_hash: Hash,
    pub quorum: u64,
    pub validator_count: u64,
    pub precommit: Option<Hash>,
    pub precommit_closure_block_height: BlockHeight,
    pub committed: CommittedMetablock,
    pub pending: KernelUpdates,
}

/// Summary of a hosted committee
#[derive(Debug, Clone, Serialize)]
pub struct CommitteeView {
    pub proposal: Hash,
    pub dislocation: Hash,
    pub status: CommitteeStatus,
    pub quorum: u64,
    pub members: Vec<Address>,
    pub cooldown_initiator: Option<Address>,
    pub activation_block_height: BlockHeight,
    pub commit_timeout_block_height: BlockHeight,
    pub reveal_timeout_block_height: BlockHeight,
    pub sealed_commits: usize,
    pub revealed_positions: u64,
    /// Set once a position reached quorum
    pub decision: Option<Position>,
}

impl CommitteeView {
    fn of(committee: &Committee) -> Self {
        let members = committee.members();
        let sealed_commits = members
            .iter()
            .filter(|member| committee.sealed_commit_of(member).is_some())
            .count();
        Self {
            proposal: committee.proposal(),
            dislocation: committee.config().dislocation,
            status: committee.status(),
            quorum: committee.quorum(),
            cooldown_initiator: committee.cooldown_initiator(),
            activation_block_height: committee.activation_block_height(),
            commit_timeout_block_height: committee.commit_timeout_block_height(),
            reveal_timeout_block_height: committee.reveal_timeout_block_height(),
            sealed_commits,
            revealed_positions: committee.total_positions_count(),
            decision: committee
                .is_decided()
                .then(|| committee.committee_decision()),
            members,
        }
    }
}

/// Node runtime managing the core, its committees and their persistence
pub struct NodeRuntime {
    config: NodeConfig,
    keypair: KeyPair,
    core: SharedCore,
    committees: DashMap<Hash, SharedCommittee>,
    reputation: Arc<MemoryReputation>,
    store: Arc<dyn SnapshotStore>,
    block_height: RwLock<BlockHeight>,
    /// Held from a mutation until its snapshot is stored
    writer: tokio::sync::Mutex<()>,
}

impl NodeRuntime {
    /// Open the runtime, restoring the core and committees found in `store`
    ///
    /// The node key is the orchestrator of everything the node hosts.
    pub async fn open(
        mut config: NodeConfig,
        keypair: KeyPair,
        store: Arc<dyn SnapshotStore>,
    ) -> MosaicResult<Self> {
        let orchestrator = keypair.address();
        bind_orchestrator(&mut config.core.orchestrator, orchestrator)?;
        bind_orchestrator(&mut config.committee.orchestrator, orchestrator)?;

        let reputation = Arc::new(MemoryReputation::new());
        let mut core = match store.load_core(&config.core.core_id).await? {
            Some(state) => {
                info!("Restored core {} from snapshot", config.core.core_id);
                Core::restore(state, reputation.clone())?
            }
            None => {
                let core = Core::new(
                    config.core.clone(),
                    config.genesis.clone(),
                    reputation.clone(),
                )?;
                store.save_core(&core.snapshot()).await?;
                core
            }
        };
        core.set_event_channel(spawn_event_log(format!("core {}", config.core.core_id)));

        let committees = DashMap::new();
        for proposal in store.committees().await? {
            if let Some(state) = store.load_committee(&proposal).await? {
                let mut committee = Committee::restore(state)?;
                committee.set_event_channel(spawn_event_log(format!("committee {}", proposal)));
                committees.insert(proposal, create_shared_committee(committee));
            }
        }
        if !committees.is_empty() {
            info!("Restored {} committees", committees.len());
        }

        Ok(Self {
            config,
            keypair,
            core: create_shared_core(core),
            committees,
            reputation,
            store,
            block_height: RwLock::new(0),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Get config reference
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Get keypair reference
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn orchestrator(&self) -> Address {
        self.keypair.address()
    }

    pub fn core_id(&self) -> Address {
        self.config.core.core_id
    }

    pub fn block_height(&self) -> BlockHeight {
        *self.block_height.read()
    }

    /// Record the latest height of the ordering environment
    pub fn observe_block_height(&self, height: BlockHeight) -> MosaicResult<BlockHeight> {
        let mut current = self.block_height.write();
        if height < *current {
            return Err(MosaicError::InvariantViolation(format!(
                "Block height {} is behind the observed height {}",
                height, *current
            )));
        }
        *current = height;
        Ok(height)
    }

    fn orchestrator_context(&self) -> CallContext {
        CallContext::new(self.orchestrator(), self.block_height())
    }

    // ---- Reputation ----

    /// Set the reputation weight the core consults for `validator`
    pub fn set_reputation(&self, validator: Address, weight: u64) {
        self.reputation.set(validator, weight);
    }

    pub fn slash(&self, validator: &Address) {
        warn!("Slashing validator {}", validator);
        self.reputation.slash(validator);
    }

    pub fn reputation_of(&self, validator: &Address) -> u64 {
        self.reputation.weight(validator)
    }

    // ---- Core ----

    /// Run `op` on the core and persist the resulting state
    ///
    /// The core is rewound when `op` fails or its state cannot be stored.
    async fn with_core<T, F>(&self, ctx: CallContext, op: F) -> MosaicResult<T>
    where
        F: FnOnce(&mut Core, &CallContext) -> MosaicResult<T>,
    {
        let _writer = self.writer.lock().await;
        let (result, before, after) = {
            let mut core = self.core.lock();
            let before = core.snapshot();
            match op(&mut core, &ctx) {
                Ok(result) => (result, before, core.snapshot()),
                Err(e) => {
                    core.rewind(before);
                    return Err(e);
                }
            }
        };
        if let Err(e) = self.store.save_core(&after).await {
            warn!("Failed to store core {}, rewinding: {}", self.core_id(), e);
            self.core.lock().rewind(before);
            return Err(e);
        }
        Ok(result)
    }

    /// Add a validator, before or after the core opened
    pub async fn join(&self, validator: Address) -> MosaicResult<CoreStatus> {
        self.with_core(self.orchestrator_context(), |core, ctx| {
            if core.status() == CoreStatus::Created {
                core.join_before_open(ctx, validator)?;
            } else {
                core.join(ctx, validator)?;
            }
            Ok(core.status())
        })
        .await
    }

    pub async fn logout(&self, validator: Address) -> MosaicResult<()> {
        self.with_core(self.orchestrator_context(), |core, ctx| {
            core.logout(ctx, validator)
        })
        .await
    }

    pub async fn remove_vote(&self, validator: Address) -> MosaicResult<Option<Hash>> {
        self.with_core(self.orchestrator_context(), |core, ctx| {
            core.remove_vote(ctx, validator)
        })
        .await
    }

    pub async fn propose_metablock(&self, metablock: &Metablock) -> MosaicResult<Hash> {
        self.with_core(self.orchestrator_context(), |core, _| {
            core.propose_metablock(metablock)
        })
        .await
    }

    pub async fn register_vote(
        &self,
        proposal: Hash,
        signature: &VoteSignature,
    ) -> MosaicResult<VoteReceipt> {
        self.with_core(self.orchestrator_context(), |core, ctx| {
            core.register_vote(ctx, proposal, signature)
        })
        .await
    }

    pub async fn open_metablock(&self, commit: &MetablockCommit) -> MosaicResult<Hash> {
        self.with_core(self.orchestrator_context(), |core, ctx| {
            core.open_metablock(
                ctx,
                commit.dynasty,
                commit.accumulated_gas,
                commit.source,
                commit.source_block_height,
                commit.delta_gas_target,
            )
        })
        .await
    }

    pub async fn halt(&self) -> MosaicResult<()> {
        self.with_core(self.orchestrator_context(), |core, ctx| core.halt(ctx))
            .await
    }

    pub fn assert_precommit(&self, metablock: &Metablock) -> MosaicResult<Hash> {
        self.core.lock().assert_precommit(metablock)
    }

    pub fn core_view(&self) -> CoreView {
        let core = self.core.lock();
        CoreView {
            core_id: core.config().core_id,
            status: core.status(),
            open_kernel_height: core.open_kernel_height(),
            open_kernel_hash: core.open_kernel_hash(),
            quorum: core.quorum(),
            validator_count: core.count_validators(),
            precommit: core.precommit(),
            precommit_closure_block_height: core.precommit_closure_block_height(),
            committed: core.committed().clone(),
            pending: core.pending_updates(),
        }
    }

    /// All validator records, newest first
    pub fn validators(&self) -> Vec<ValidatorRecord> {
        self.core.lock().validators().copied().collect()
    }

    pub fn is_validator(&self, validator: &Address) -> bool {
        self.core.lock().is_validator(validator)
    }

    pub fn vote_of(&self, validator: &Address) -> Option<Hash> {
        self.core.lock().vote_of(validator)
    }

    pub async fn validator_record(&self, validator: &Address) -> MosaicResult<Option<ValidatorRecord>> {
        self.store.validator_range(&self.core_id(), validator).await
    }

    pub async fn kernel_hash(&self, height: BlockHeight) -> MosaicResult<Option<Hash>> {
        self.store.kernel_hash(&self.core_id(), height).await
    }

    pub async fn vote_count(&self, proposal: &Hash) -> MosaicResult<Option<VoteCount>> {
        self.store.vote_count(&self.core_id(), proposal).await
    }

    // ---- Committees ----

    fn committee(&self, proposal: &Hash) -> MosaicResult<SharedCommittee> {
        self.committees
            .get(proposal)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                MosaicError::InvariantViolation(format!("No committee for proposal {}", proposal))
            })
    }

    /// Run `op` on a committee and persist the resulting state
    async fn with_committee<T, F>(&self, proposal: &Hash, ctx: CallContext, op: F) -> MosaicResult<T>
    where
        F: FnOnce(&mut Committee, &CallContext) -> MosaicResult<T>,
    {
        let committee = self.committee(proposal)?;
        let _writer = self.writer.lock().await;
        let (result, before, after) = {
            let mut committee = committee.lock();
            let before = committee.snapshot();
            match op(&mut committee, &ctx) {
                Ok(result) => (result, before, committee.snapshot()),
                Err(e) => {
                    committee.rewind(before);
                    return Err(e);
                }
            }
        };
        if let Err(e) = self.store.save_committee(&after).await {
            warn!("Failed to store committee {}, rewinding: {}", proposal, e);
            committee.lock().rewind(before);
            return Err(e);
        }
        Ok(result)
    }

    /// Context of a member call authorized by the member's signature
    fn member_context(
        &self,
        proposal: &Hash,
        action: MemberAction,
        payload: &[u8],
        signature: &VoteSignature,
    ) -> MosaicResult<CallContext> {
        let member = recover_member(proposal, action, payload, signature)?;
        debug!("{} authorized {} on {}", member, action.as_str(), proposal);
        Ok(CallContext::new(member, self.block_height()))
    }

    /// Form a committee for `proposal` from the configured template
    pub async fn create_committee(
        &self,
        dislocation: Hash,
        proposal: Hash,
    ) -> MosaicResult<CommitteeView> {
        let mut committee =
            Committee::new(self.config.committee.for_proposal(dislocation, proposal))?;
        committee.set_event_channel(spawn_event_log(format!("committee {}", proposal)));
        let view = CommitteeView::of(&committee);
        let snapshot = committee.snapshot();

        let _writer = self.writer.lock().await;
        match self.committees.entry(proposal) {
            Entry::Occupied(_) => {
                return Err(MosaicError::Idempotency(format!(
                    "Committee for proposal {} already exists",
                    proposal
                )))
            }
            Entry::Vacant(entry) => {
                entry.insert(create_shared_committee(committee));
            }
        }
        if let Err(e) = self.store.save_committee(&snapshot).await {
            self.committees.remove(&proposal);
            return Err(e);
        }

        info!("Formed committee for proposal {}", proposal);
        Ok(view)
    }

    pub fn committee_proposals(&self) -> Vec<Hash> {
        let mut proposals: Vec<Hash> = self.committees.iter().map(|entry| *entry.key()).collect();
        proposals.sort();
        proposals
    }

    pub fn committee_view(&self, proposal: &Hash) -> MosaicResult<CommitteeView> {
        let committee = self.committee(proposal)?;
        let committee = committee.lock();
        Ok(CommitteeView::of(&committee))
    }

    /// Member a new entrant must be seated in front of
    pub fn committee_hint(&self, proposal: &Hash, validator: &Address) -> MosaicResult<Option<Address>> {
        let committee = self.committee(proposal)?;
        let committee = committee.lock();
        Ok(committee.hint_for(validator))
    }

    /// Seat a validator; without an explicit hint the runtime computes it
    pub async fn enter_committee(
        &self,
        proposal: &Hash,
        validator: Address,
        further: Option<Address>,
    ) -> MosaicResult<Option<Address>> {
        self.with_committee(proposal, self.orchestrator_context(), |committee, ctx| {
            let further = further.or_else(|| committee.hint_for(&validator));
            committee.enter_committee(ctx, validator, further)
        })
        .await
    }

    pub async fn challenge_committee(&self, proposal: &Hash, candidate: Address) -> MosaicResult<()> {
        self.with_committee(proposal, self.orchestrator_context(), |committee, ctx| {
            committee.challenge_committee(ctx, candidate)
        })
        .await
    }

    pub async fn cooldown_committee(
        &self,
        proposal: &Hash,
        signature: &VoteSignature,
    ) -> MosaicResult<BlockHeight> {
        let ctx = self.member_context(proposal, MemberAction::Cooldown, &[], signature)?;
        self.with_committee(proposal, ctx, |committee, ctx| {
            committee.cooldown_committee(ctx)
        })
        .await
    }

    pub async fn activate_committee(
        &self,
        proposal: &Hash,
        signature: &VoteSignature,
    ) -> MosaicResult<BlockHeight> {
        let ctx = self.member_context(proposal, MemberAction::Activate, &[], signature)?;
        self.with_committee(proposal, ctx, |committee, ctx| {
            committee.activate_committee(ctx)
        })
        .await
    }

    pub async fn submit_sealed_commit(
        &self,
        proposal: &Hash,
        sealed: Hash,
        signature: &VoteSignature,
    ) -> MosaicResult<()> {
        let ctx =
            self.member_context(proposal, MemberAction::Commit, sealed.as_bytes(), signature)?;
        self.with_committee(proposal, ctx, |committee, ctx| {
            committee.submit_sealed_commit(ctx, sealed)
        })
        .await
    }

    /// Close an expired commit phase; anyone may do so
    pub async fn close_commit_phase(&self, proposal: &Hash) -> MosaicResult<BlockHeight> {
        self.with_committee(proposal, self.orchestrator_context(), |committee, ctx| {
            committee.close_commit_phase(ctx)
        })
        .await
    }

    pub async fn reveal_commit(
        &self,
        proposal: &Hash,
        position: Position,
        salt: Hash,
        signature: &VoteSignature,
    ) -> MosaicResult<u64> {
        let payload = reveal_payload(&position, &salt);
        let ctx = self.member_context(proposal, MemberAction::Reveal, &payload, signature)?;
        self.with_committee(proposal, ctx, |committee, ctx| {
            committee.reveal_commit(ctx, position, salt)
        })
        .await
    }

    pub async fn committee_position(
        &self,
        proposal: &Hash,
        member: &Address,
    ) -> MosaicResult<Option<Position>> {
        self.store.committee_position(proposal, member).await
    }
}

fn bind_orchestrator(configured: &mut Address, node: Address) -> MosaicResult<()> {
    if configured.is_zero() {
        *configured = node;
        return Ok(());
    }
    if *configured != node {
        return Err(MosaicError::ConfigError(format!(
            "Configured orchestrator {} does not match the node key {}",
            configured, node
        )));
    }
    Ok(())
}

/// Log every event sent on the returned channel
fn spawn_event_log<E: Debug + Send + 'static>(label: String) -> mpsc::Sender<E> {
    let (tx, mut rx) = mpsc::channel::<E>(EVENT_CHANNEL_SIZE);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            info!("[{}] {:?}", label, event);
        }
    });
    tx
}
