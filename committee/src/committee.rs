//! Committee state machine
//!
//! Formation runs while `Open`: the orchestrator enters validators with an
//! insertion hint and the committee keeps the `committee_size` closest ones.
//! A member then starts the cooldown, during which a closer validator that
//! was left out can invalidate the round. After activation members submit
//! sealed commits and reveal them; the first position to reach quorum becomes
//! the committee decision.

use crate::members::MemberList;
use crate::tally::PositionTally;
use mosaic_core::{
    Address, BlockHeight, CallContext, Commitment, CommitteeConfig, Distance, Hash, MosaicError,
    MosaicResult, Position, Sortition,
};
use mosaic_crypto::commitment::{Blake3Commitment, Blake3Sortition};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Phase of a committee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitteeStatus {
    Open,
    CoolingDown,
    Commit,
    Reveal,
    /// Terminal; a closer validator was excluded from the committee
    Invalid,
}

/// Events emitted by a committee
#[derive(Debug, Clone)]
pub enum CommitteeEvent {
    MemberEntered {
        member: Address,
        evicted: Option<Address>,
    },
    CooldownStarted {
        initiator: Address,
        activation_block_height: BlockHeight,
    },
    Invalidated { candidate: Address },
    CommitPhaseStarted { timeout_block_height: BlockHeight },
    SealedCommitSubmitted { member: Address },
    RevealPhaseStarted { timeout_block_height: BlockHeight },
    PositionRevealed {
        member: Address,
        position: Position,
        count: u64,
    },
    Decided { position: Position },
}

/// Serializable state of a committee
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitteeState {
    pub(crate) config: CommitteeConfig,
    pub(crate) status: CommitteeStatus,
    pub(crate) quorum: u64,
    pub(crate) members: MemberList,
    /// Every validator ever entered, including evicted ones
    pub(crate) entered: HashSet<Address>,
    pub(crate) cooldown_initiator: Option<Address>,
    pub(crate) activation_block_height: BlockHeight,
    pub(crate) commit_timeout_block_height: BlockHeight,
    pub(crate) reveal_timeout_block_height: BlockHeight,
    pub(crate) sealed_commits: HashMap<Address, Hash>,
    pub(crate) positions: HashMap<Address, Position>,
    pub(crate) tally: PositionTally,
}

impl CommitteeState {
    pub fn status(&self) -> CommitteeStatus {
        self.status
    }

    pub fn proposal(&self) -> Hash {
        self.config.proposal
    }

    /// Revealed positions by member
    pub fn positions(&self) -> &HashMap<Address, Position> {
        &self.positions
    }

    /// Check the consistency a live committee maintains under `sortition`
    pub fn validate(&self, sortition: &dyn Sortition) -> MosaicResult<()> {
        self.config.validate()?;
        let corrupt = |what: &str| {
            Err(MosaicError::DeserializationError(format!(
                "Committee {} snapshot is corrupt: {}",
                self.config.proposal, what
            )))
        };

        if self.quorum != self.config.quorum() {
            return corrupt("quorum does not match the config");
        }
        if self.members.capacity() as u64 != self.config.committee_size
            || self.members.len() > self.members.capacity()
        {
            return corrupt("member list does not fit the committee size");
        }
        for (distance, address) in self.members.iter() {
            let expected =
                sortition.distance(address, &self.config.dislocation, &self.config.proposal);
            if *distance != expected || self.members.distance_of(address) != Some(expected) {
                return corrupt("member distances do not match the sortition");
            }
        }
        let formation_closed = !matches!(
            self.status,
            CommitteeStatus::Open | CommitteeStatus::Invalid
        );
        if formation_closed && (self.cooldown_initiator.is_none() || !self.members.is_full()) {
            return corrupt("formation closed without a full committee");
        }
        if self
            .sealed_commits
            .keys()
            .chain(self.positions.keys())
            .any(|member| !self.members.contains(member))
            || self
                .positions
                .keys()
                .any(|member| !self.sealed_commits.contains_key(member))
        {
            return corrupt("commits exist for non-members");
        }
        Ok(())
    }
}

/// Sortition committee deciding on one proposal
pub struct Committee {
    state: CommitteeState,
    commitment: Arc<dyn Commitment>,
    sortition: Arc<dyn Sortition>,
    event_tx: Option<mpsc::Sender<CommitteeEvent>>,
}

pub type SharedCommittee = Arc<Mutex<Committee>>;

pub fn create_shared_committee(committee: Committee) -> SharedCommittee {
    Arc::new(Mutex::new(committee))
}

impl Committee {
    /// Create an open committee with the BLAKE3 primitives
    pub fn new(config: CommitteeConfig) -> MosaicResult<Self> {
        Self::with_primitives(config, Arc::new(Blake3Commitment), Arc::new(Blake3Sortition))
    }

    pub fn with_primitives(
        config: CommitteeConfig,
        commitment: Arc<dyn Commitment>,
        sortition: Arc<dyn Sortition>,
    ) -> MosaicResult<Self> {
        config.validate()?;
        let quorum = config.quorum();
        let capacity = usize::try_from(config.committee_size).map_err(|_| {
            MosaicError::InvariantViolation("Committee size does not fit in memory".into())
        })?;

        info!(
            "Committee for proposal {} created with {} seats, quorum {}",
            config.proposal, config.committee_size, quorum
        );

        Ok(Self {
            state: CommitteeState {
                config,
                status: CommitteeStatus::Open,
                quorum,
                members: MemberList::new(capacity),
                entered: HashSet::new(),
                cooldown_initiator: None,
                activation_block_height: 0,
                commit_timeout_block_height: 0,
                reveal_timeout_block_height: 0,
                sealed_commits: HashMap::new(),
                positions: HashMap::new(),
                tally: PositionTally::new(),
            },
            commitment,
            sortition,
            event_tx: None,
        })
    }

    /// Rebuild a committee from a snapshot with the BLAKE3 primitives
    pub fn restore(state: CommitteeState) -> MosaicResult<Self> {
        state.validate(&Blake3Sortition)?;
        Ok(Self {
            state,
            commitment: Arc::new(Blake3Commitment),
            sortition: Arc::new(Blake3Sortition),
            event_tx: None,
        })
    }

    /// Return to a snapshot taken from this committee, keeping its event channel
    pub fn rewind(&mut self, state: CommitteeState) {
        self.state = state;
    }

    pub fn snapshot(&self) -> CommitteeState {
        self.state.clone()
    }

    /// Set event channel
    pub fn set_event_channel(&mut self, tx: mpsc::Sender<CommitteeEvent>) {
        self.event_tx = Some(tx);
    }

    // ---- Formation ----

    /// Seat `validator` immediately before `further` (`None` is the far end)
    pub fn enter_committee(
        &mut self,
        ctx: &CallContext,
        validator: Address,
        further: Option<Address>,
    ) -> MosaicResult<Option<Address>> {
        self.require_orchestrator(ctx)?;
        self.require_status(CommitteeStatus::Open, "enter committee")?;

        if validator.is_reserved() {
            return Err(MosaicError::InvariantViolation(
                "Validator address must not be null or the sentinel".into(),
            ));
        }
        if self.state.entered.contains(&validator) {
            return Err(MosaicError::Idempotency(format!(
                "Validator {} has already entered the committee",
                validator
            )));
        }

        let distance = self.distance(&validator);
        let further_key = match further {
            Some(hint) => {
                let hint_distance = self.state.members.distance_of(&hint).ok_or_else(|| {
                    MosaicError::InvariantViolation(format!(
                        "Further validator {} must be a committee member",
                        hint
                    ))
                })?;
                if (distance, validator) > (hint_distance, hint) {
                    return Err(MosaicError::InvariantViolation(
                        "Validator must be closer than the further validator".into(),
                    ));
                }
                Some((hint_distance, hint))
            }
            None => None,
        };

        if self.state.members.is_full() {
            let closer_than_farthest = self
                .state
                .members
                .farthest()
                .map(|farthest| (distance, validator) < farthest)
                .unwrap_or(true);
            if !closer_than_farthest {
                return Err(MosaicError::InvariantViolation(format!(
                    "Member {} has been excluded",
                    validator
                )));
            }
        }

        if let Some(closer) = self.state.members.closer_neighbour(further_key.as_ref()) {
            if closer >= (distance, validator) {
                return Err(MosaicError::InvariantViolation(
                    "Validator must be further than the closer neighbour of the hint".into(),
                ));
            }
        }

        self.state.entered.insert(validator);
        let evicted = self.state.members.insert(validator, distance);

        debug!(
            "Validator {} entered committee, {} of {} seats",
            validator,
            self.state.members.len(),
            self.state.config.committee_size
        );
        if let Some(evicted) = evicted {
            debug!("Validator {} evicted from committee", evicted);
        }
        self.emit_event(CommitteeEvent::MemberEntered {
            member: validator,
            evicted,
        });
        Ok(evicted)
    }

    /// Close formation; activation becomes possible after the cooldown
    pub fn cooldown_committee(&mut self, ctx: &CallContext) -> MosaicResult<BlockHeight> {
        self.require_member(ctx)?;
        self.require_status(CommitteeStatus::Open, "cool down committee")?;
        if !self.state.members.is_full() {
            return Err(MosaicError::StateTransition(format!(
                "Committee must have {} members to cool down",
                self.state.config.committee_size
            )));
        }

        let activation = ctx
            .block_height
            .saturating_add(self.state.config.formation_cooldown);
        self.state.activation_block_height = activation;
        self.state.cooldown_initiator = Some(ctx.caller);
        self.state.status = CommitteeStatus::CoolingDown;

        info!(
            "Committee cooling down, activation at block height {}",
            activation
        );
        self.emit_event(CommitteeEvent::CooldownStarted {
            initiator: ctx.caller,
            activation_block_height: activation,
        });
        Ok(activation)
    }

    /// Invalidate the committee with a closer validator it left out
    pub fn challenge_committee(&mut self, ctx: &CallContext, candidate: Address) -> MosaicResult<()> {
        self.require_orchestrator(ctx)?;
        self.require_status(CommitteeStatus::CoolingDown, "challenge committee")?;

        if candidate.is_reserved() {
            return Err(MosaicError::InvariantViolation(
                "Candidate address must not be null or the sentinel".into(),
            ));
        }
        if self.state.members.contains(&candidate) {
            return Err(MosaicError::InvariantViolation(format!(
                "Candidate {} is already a member",
                candidate
            )));
        }
        let distance = self.distance(&candidate);
        let excluded_closer = self
            .state
            .members
            .farthest()
            .map(|farthest| (distance, candidate) < farthest)
            .unwrap_or(false);
        if !excluded_closer {
            return Err(MosaicError::InvariantViolation(format!(
                "Candidate {} is not closer than the farthest member",
                candidate
            )));
        }

        self.state.status = CommitteeStatus::Invalid;
        warn!("Committee invalidated by closer candidate {}", candidate);
        self.emit_event(CommitteeEvent::Invalidated { candidate });
        Ok(())
    }

    /// Start the commit phase once the cooldown has passed
    pub fn activate_committee(&mut self, ctx: &CallContext) -> MosaicResult<BlockHeight> {
        self.require_member(ctx)?;
        self.require_status(CommitteeStatus::CoolingDown, "activate committee")?;
        if ctx.block_height < self.state.activation_block_height {
            return Err(MosaicError::StateTransition(format!(
                "Committee cannot be activated before block height {}",
                self.state.activation_block_height
            )));
        }

        let timeout = ctx
            .block_height
            .saturating_add(self.state.config.commit_phase_length);
        self.state.commit_timeout_block_height = timeout;
        self.state.status = CommitteeStatus::Commit;

        info!("Committee commit phase open until block height {}", timeout);
        self.emit_event(CommitteeEvent::CommitPhaseStarted {
            timeout_block_height: timeout,
        });
        Ok(timeout)
    }

    // ---- Commit-reveal ----

    pub fn submit_sealed_commit(&mut self, ctx: &CallContext, sealed: Hash) -> MosaicResult<()> {
        self.require_member(ctx)?;
        self.require_status(CommitteeStatus::Commit, "submit sealed commit")?;
        if ctx.block_height >= self.state.commit_timeout_block_height {
            return Err(MosaicError::StateTransition(format!(
                "Commit phase timed out at block height {}",
                self.state.commit_timeout_block_height
            )));
        }
        if sealed.is_zero() {
            return Err(MosaicError::InvariantViolation(
                "Sealed commit must not be null".into(),
            ));
        }
        if self.state.sealed_commits.contains_key(&ctx.caller) {
            return Err(MosaicError::Idempotency(format!(
                "Member {} has already submitted a sealed commit",
                ctx.caller
            )));
        }

        self.state.sealed_commits.insert(ctx.caller, sealed);
        debug!("Sealed commit from {}", ctx.caller);
        self.emit_event(CommitteeEvent::SealedCommitSubmitted { member: ctx.caller });

        if self.state.sealed_commits.len() == self.state.members.len() {
            self.start_reveal_phase(ctx.block_height);
        }
        Ok(())
    }

    /// Move to the reveal phase after the commit timeout; callable by anyone
    pub fn close_commit_phase(&mut self, ctx: &CallContext) -> MosaicResult<BlockHeight> {
        self.require_status(CommitteeStatus::Commit, "close commit phase")?;
        if ctx.block_height < self.state.commit_timeout_block_height {
            return Err(MosaicError::StateTransition(format!(
                "Commit phase is open until block height {}",
                self.state.commit_timeout_block_height
            )));
        }
        Ok(self.start_reveal_phase(ctx.block_height))
    }

    /// Open a sealed commit, returning the new count of `position`
    pub fn reveal_commit(
        &mut self,
        ctx: &CallContext,
        position: Position,
        salt: Hash,
    ) -> MosaicResult<u64> {
        self.require_member(ctx)?;
        self.require_status(CommitteeStatus::Reveal, "reveal commit")?;
        if ctx.block_height >= self.state.reveal_timeout_block_height {
            return Err(MosaicError::StateTransition(format!(
                "Reveal phase timed out at block height {}",
                self.state.reveal_timeout_block_height
            )));
        }

        let member = ctx.caller;
        let sealed = *self.state.sealed_commits.get(&member).ok_or_else(|| {
            MosaicError::StateTransition(format!(
                "Member {} has no sealed commit to reveal",
                member
            ))
        })?;
        if self.state.positions.contains_key(&member) {
            return Err(MosaicError::Idempotency(format!(
                "Member {} has already revealed",
                member
            )));
        }
        if position.is_zero() {
            return Err(MosaicError::InvariantViolation(
                "Position must not be null".into(),
            ));
        }
        if !self.commitment.reveal(&sealed, &position, &salt, &member) {
            return Err(MosaicError::Mismatch(format!(
                "Reveal of {} does not match its sealed commit",
                member
            )));
        }

        let was_decided = self.is_decided();
        self.state.positions.insert(member, position);
        let count = self.state.tally.record(position, self.state.quorum);

        debug!("Member {} revealed {} ({} votes)", member, position, count);
        self.emit_event(CommitteeEvent::PositionRevealed {
            member,
            position,
            count,
        });
        if !was_decided && self.is_decided() {
            info!("Committee decided on {}", position);
            self.emit_event(CommitteeEvent::Decided { position });
        }
        Ok(count)
    }

    // ---- Queries ----

    pub fn status(&self) -> CommitteeStatus {
        self.state.status
    }

    pub fn config(&self) -> &CommitteeConfig {
        &self.state.config
    }

    pub fn proposal(&self) -> Hash {
        self.state.config.proposal
    }

    pub fn quorum(&self) -> u64 {
        self.state.quorum
    }

    pub fn is_decided(&self) -> bool {
        self.state.tally.decision().is_some()
    }

    /// Decided position, or the zero hash while undecided
    pub fn committee_decision(&self) -> Hash {
        self.state.tally.decision_or_zero()
    }

    /// Members, closest first
    pub fn members(&self) -> Vec<Address> {
        self.state.members.addresses()
    }

    pub fn member_count(&self) -> usize {
        self.state.members.len()
    }

    pub fn is_member(&self, address: &Address) -> bool {
        self.state.members.contains(address)
    }

    /// Sortition distance of any account to this committee's proposal
    pub fn distance(&self, account: &Address) -> Distance {
        self.sortition.distance(
            account,
            &self.state.config.dislocation,
            &self.state.config.proposal,
        )
    }

    /// Distance of a seated member
    pub fn distance_of(&self, member: &Address) -> Option<Distance> {
        self.state.members.distance_of(member)
    }

    pub fn farthest_member(&self) -> Option<Address> {
        self.state.members.farthest().map(|(_, address)| address)
    }

    /// The `further` hint that seats `validator` at its ordered position
    pub fn hint_for(&self, validator: &Address) -> Option<Address> {
        let distance = self.distance(validator);
        self.state
            .members
            .first_farther(&distance, validator)
            .map(|(_, address)| address)
    }

    pub fn cooldown_initiator(&self) -> Option<Address> {
        self.state.cooldown_initiator
    }

    pub fn activation_block_height(&self) -> BlockHeight {
        self.state.activation_block_height
    }

    pub fn commit_timeout_block_height(&self) -> BlockHeight {
        self.state.commit_timeout_block_height
    }

    pub fn reveal_timeout_block_height(&self) -> BlockHeight {
        self.state.reveal_timeout_block_height
    }

    pub fn sealed_commit_of(&self, member: &Address) -> Option<Hash> {
        self.state.sealed_commits.get(member).copied()
    }

    pub fn position_of(&self, member: &Address) -> Option<Position> {
        self.state.positions.get(member).copied()
    }

    /// Revealed positions by member
    pub fn positions(&self) -> impl Iterator<Item = (&Address, &Position)> {
        self.state.positions.iter()
    }

    pub fn position_count(&self, position: &Position) -> u64 {
        self.state.tally.count(position)
    }

    pub fn positions_taken(&self) -> &[Position] {
        self.state.tally.positions_taken()
    }

    pub fn total_positions_count(&self) -> u64 {
        self.state.tally.total()
    }

    // ---- Helpers ----

    fn start_reveal_phase(&mut self, block_height: BlockHeight) -> BlockHeight {
        let timeout = block_height.saturating_add(self.state.config.reveal_phase_length);
        self.state.reveal_timeout_block_height = timeout;
        self.state.status = CommitteeStatus::Reveal;
        info!("Committee reveal phase open until block height {}", timeout);
        self.emit_event(CommitteeEvent::RevealPhaseStarted {
            timeout_block_height: timeout,
        });
        timeout
    }

    fn require_orchestrator(&self, ctx: &CallContext) -> MosaicResult<()> {
        if ctx.caller != self.state.config.orchestrator {
            return Err(MosaicError::AccessControl(
                "Only the orchestrator can call this operation".into(),
            ));
        }
        Ok(())
    }

    fn require_member(&self, ctx: &CallContext) -> MosaicResult<()> {
        if !self.state.members.contains(&ctx.caller) {
            return Err(MosaicError::AccessControl(format!(
                "{} is not a committee member",
                ctx.caller
            )));
        }
        Ok(())
    }

    fn require_status(&self, expected: CommitteeStatus, operation: &str) -> MosaicResult<()> {
        if self.state.status != expected {
            return Err(MosaicError::StateTransition(format!(
                "Cannot {} while {:?}, committee must be {:?}",
                operation, self.state.status, expected
            )));
        }
        Ok(())
    }

    fn emit_event(&self, event: CommitteeEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.try_send(event);
        }
    }
}
