//! Configuration types for Mosaic

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::MosaicError;
use crate::traits::MosaicResult;
use crate::types::{Address, BlockHeight, Dynasty, Gas, Hash};

pub const CORE_SUPER_MAJORITY_NUMERATOR: u64 = 2;
pub const CORE_SUPER_MAJORITY_DENOMINATOR: u64 = 3;
/// Blocks after a precommit during which votes for it are still counted
pub const CORE_LAST_VOTES_WINDOW: u64 = 3;
pub const CORE_MINIMUM_VALIDATOR_COUNT: u64 = 5;

pub const COMMITTEE_SUPER_MAJORITY_NUMERATOR: u64 = 2;
pub const COMMITTEE_SUPER_MAJORITY_DENOMINATOR: u64 = 3;
pub const COMMITTEE_MINIMUM_SIZE: u64 = 3;
pub const COMMITTEE_FORMATION_COOLDOWN: u64 = 10;
pub const COMMIT_PHASE_LENGTH: u64 = 20;
pub const REVEAL_PHASE_LENGTH: u64 = 20;

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Core parameters
    pub core: CoreConfig,

    /// Core genesis kernel
    pub genesis: CoreGenesis,

    /// Template for committees formed by this node
    pub committee: CommitteeConfig,

    /// API configuration
    pub api: ApiConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "mosaic-node".to_string(),
            data_dir: PathBuf::from("./data"),
            core: CoreConfig::default(),
            genesis: CoreGenesis::default(),
            committee: CommitteeConfig::default(),
            api: ApiConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn from_json(content: &str) -> MosaicResult<Self> {
        serde_json::from_str(content).map_err(|e| MosaicError::ConfigError(e.to_string()))
    }

    pub fn to_json(&self) -> MosaicResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Parameters of a core instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Sole caller of join, logout, remove_vote, open_metablock and halt
    pub orchestrator: Address,

    /// Identifier of the metachain the core serves
    pub metachain_id: Hash,

    /// Identifier of this core instance (part of the typed-hash domain)
    pub core_id: Address,

    /// Checkpoint distance on the origin chain
    pub epoch_length: u64,

    /// Validators required before the core opens, and the floor for logouts
    pub minimum_validator_count: u64,

    /// Upper bound on the number of validators
    pub join_limit: u64,

    pub super_majority_numerator: u64,
    pub super_majority_denominator: u64,

    /// Blocks after precommit during which late votes are accepted
    pub last_votes_window: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            orchestrator: Address::ZERO,
            metachain_id: Hash::ZERO,
            core_id: Address::ZERO,
            epoch_length: 100,
            minimum_validator_count: CORE_MINIMUM_VALIDATOR_COUNT,
            join_limit: 10,
            super_majority_numerator: CORE_SUPER_MAJORITY_NUMERATOR,
            super_majority_denominator: CORE_SUPER_MAJORITY_DENOMINATOR,
            last_votes_window: CORE_LAST_VOTES_WINDOW,
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> MosaicResult<()> {
        if self.orchestrator.is_reserved() {
            return Err(MosaicError::InvariantViolation(
                "Orchestrator address must not be null".into(),
            ));
        }
        if self.metachain_id.is_zero() {
            return Err(MosaicError::InvariantViolation(
                "Metachain id must not be null".into(),
            ));
        }
        if self.epoch_length == 0 {
            return Err(MosaicError::InvariantViolation(
                "Epoch length must be positive".into(),
            ));
        }
        if self.minimum_validator_count < CORE_MINIMUM_VALIDATOR_COUNT {
            return Err(MosaicError::InvariantViolation(format!(
                "Minimum validator count must be at least {}",
                CORE_MINIMUM_VALIDATOR_COUNT
            )));
        }
        if self.join_limit < self.minimum_validator_count {
            return Err(MosaicError::InvariantViolation(
                "Join limit must not be below the minimum validator count".into(),
            ));
        }
        validate_super_majority(self.super_majority_numerator, self.super_majority_denominator)
    }

    /// floor(count * numerator / denominator)
    pub fn quorum(&self, active_count: u64) -> u64 {
        active_count * self.super_majority_numerator / self.super_majority_denominator
    }
}

/// Genesis kernel and committed metablock of a core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreGenesis {
    /// Height of the first open kernel
    pub height: BlockHeight,
    /// Parent of the first open kernel
    pub parent: Hash,
    pub gas_target: Gas,
    /// Dynasty of the last committed metablock
    pub dynasty: Dynasty,
    /// Accumulated gas of the last committed metablock
    pub accumulated_gas: Gas,
    /// Source checkpoint of the last committed metablock
    pub source: Hash,
    pub source_block_height: BlockHeight,
}

impl Default for CoreGenesis {
    fn default() -> Self {
        Self {
            height: 0,
            parent: Hash::ZERO,
            gas_target: 1_000_000,
            dynasty: 0,
            accumulated_gas: 0,
            source: Hash::ZERO,
            source_block_height: 0,
        }
    }
}

/// Parameters of a committee instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitteeConfig {
    /// Sole caller of enter_committee and challenge_committee
    pub orchestrator: Address,

    /// Number of seats
    pub committee_size: u64,

    /// Non-zero value shifting the sortition
    pub dislocation: Hash,

    /// Proposal the committee decides on; members are ranked by distance to it
    pub proposal: Hash,

    pub super_majority_numerator: u64,
    pub super_majority_denominator: u64,

    pub formation_cooldown: u64,
    pub commit_phase_length: u64,
    pub reveal_phase_length: u64,
}

impl Default for CommitteeConfig {
    fn default() -> Self {
        Self {
            orchestrator: Address::ZERO,
            committee_size: 7,
            dislocation: Hash::ZERO,
            proposal: Hash::ZERO,
            super_majority_numerator: COMMITTEE_SUPER_MAJORITY_NUMERATOR,
            super_majority_denominator: COMMITTEE_SUPER_MAJORITY_DENOMINATOR,
            formation_cooldown: COMMITTEE_FORMATION_COOLDOWN,
            commit_phase_length: COMMIT_PHASE_LENGTH,
            reveal_phase_length: REVEAL_PHASE_LENGTH,
        }
    }
}

impl CommitteeConfig {
    /// Same parameters, bound to a dislocation and a proposal
    pub fn for_proposal(&self, dislocation: Hash, proposal: Hash) -> Self {
        Self {
            dislocation,
            proposal,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> MosaicResult<()> {
        if self.orchestrator.is_reserved() {
            return Err(MosaicError::InvariantViolation(
                "Orchestrator address must not be null".into(),
            ));
        }
        if self.committee_size < COMMITTEE_MINIMUM_SIZE {
            return Err(MosaicError::InvariantViolation(format!(
                "Committee size must not be smaller than {}",
                COMMITTEE_MINIMUM_SIZE
            )));
        }
        if self.dislocation.is_zero() {
            return Err(MosaicError::InvariantViolation(
                "Committee formation must be dislocated by a non-zero value".into(),
            ));
        }
        if self.proposal.is_zero() {
            return Err(MosaicError::InvariantViolation(
                "Committee proposal must not be null".into(),
            ));
        }
        validate_super_majority(self.super_majority_numerator, self.super_majority_denominator)
    }

    pub fn quorum(&self) -> u64 {
        self.committee_size * self.super_majority_numerator / self.super_majority_denominator
    }
}

fn validate_super_majority(numerator: u64, denominator: u64) -> MosaicResult<()> {
    if numerator == 0 || denominator == 0 || numerator > denominator {
        return Err(MosaicError::InvariantViolation(format!(
            "Super majority {}/{} is not a fraction in (0, 1]",
            numerator, denominator
        )));
    }
    Ok(())
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    pub enabled: bool,

    /// API listen address
    pub listen_addr: String,

    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:8080".to_string(),
            enable_cors: true,
        }
    }
}
