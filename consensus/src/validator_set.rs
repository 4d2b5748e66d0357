//! Height-ranged validator membership

use mosaic_core::{Address, BlockHeight, MosaicError, MosaicResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// End height of a validator that has not been retired
pub const MAX_END_HEIGHT: BlockHeight = BlockHeight::MAX;

/// Membership range of one validator
///
/// Active at `h` iff `begin_height <= h < end_height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub address: Address,
    pub begin_height: BlockHeight,
    pub end_height: BlockHeight,
}

impl ValidatorRecord {
    pub fn is_active_at(&self, height: BlockHeight) -> bool {
        self.begin_height <= height && height < self.end_height
    }

    /// An end height has been assigned
    pub fn is_retired(&self) -> bool {
        self.end_height != MAX_END_HEIGHT
    }
}

/// Append/retire registry of validators
///
/// Records are never unlinked, so every historical range stays queryable.
/// Active counts are answered from a map of per-height deltas (+1 at a begin
/// height, -1 at an end height), which makes `count_active` exact for any
/// height no matter how many later insertions and removals happened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorSet {
    /// All records in insertion order
    records: Vec<ValidatorRecord>,
    /// Record indices per address, oldest first
    ranges: HashMap<Address, Vec<usize>>,
    deltas: BTreeMap<BlockHeight, i64>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `insert(address, begin_height)` would succeed
    pub fn check_insert(&self, address: &Address, begin_height: BlockHeight) -> MosaicResult<()> {
        if address.is_reserved() {
            return Err(MosaicError::InvariantViolation(
                "Validator address must not be null or the sentinel".into(),
            ));
        }
        if begin_height == MAX_END_HEIGHT {
            return Err(MosaicError::InvariantViolation(
                "Begin height must be below the maximum end height".into(),
            ));
        }
        if let Some(latest) = self.record(address) {
            if !latest.is_retired() {
                return Err(MosaicError::Idempotency(format!(
                    "Validator {} is already registered",
                    address
                )));
            }
            if begin_height < latest.end_height {
                return Err(MosaicError::InvariantViolation(format!(
                    "Validator {} cannot begin at {} before its previous end height {}",
                    address, begin_height, latest.end_height
                )));
            }
        }
        Ok(())
    }

    /// Add a validator, active from `begin_height` with an open end
    pub fn insert(&mut self, address: Address, begin_height: BlockHeight) -> MosaicResult<()> {
        self.check_insert(&address, begin_height)?;

        let index = self.records.len();
        self.records.push(ValidatorRecord {
            address,
            begin_height,
            end_height: MAX_END_HEIGHT,
        });
        self.ranges.entry(address).or_default().push(index);
        self.add_delta(begin_height, 1);
        self.add_delta(MAX_END_HEIGHT, -1);
        Ok(())
    }

    /// Check that `remove(address, end_height)` would succeed
    pub fn check_remove(&self, address: &Address, end_height: BlockHeight) -> MosaicResult<()> {
        let latest = self.record(address).ok_or_else(|| {
            MosaicError::InvariantViolation(format!("Validator {} is not registered", address))
        })?;
        if latest.is_retired() {
            return Err(MosaicError::Idempotency(format!(
                "Validator {} has already been removed",
                address
            )));
        }
        if end_height < latest.begin_height || end_height == MAX_END_HEIGHT {
            return Err(MosaicError::InvariantViolation(format!(
                "End height {} is outside the range of validator {}",
                end_height, address
            )));
        }
        Ok(())
    }

    /// Retire a validator at `end_height`; the record stays in the set
    pub fn remove(&mut self, address: Address, end_height: BlockHeight) -> MosaicResult<()> {
        self.check_remove(&address, end_height)?;

        let index = self
            .latest_index(&address)
            .ok_or_else(|| MosaicError::Internal("validator index vanished".into()))?;
        self.records[index].end_height = end_height;
        self.add_delta(MAX_END_HEIGHT, 1);
        self.add_delta(end_height, -1);
        Ok(())
    }

    /// Number of validators active at `height`
    pub fn count_active(&self, height: BlockHeight) -> u64 {
        let sum: i64 = self.deltas.range(..=height).map(|(_, delta)| delta).sum();
        sum.max(0) as u64
    }

    /// Whether `address` is active at `height` in any of its ranges
    pub fn is_active(&self, address: &Address, height: BlockHeight) -> bool {
        self.ranges
            .get(address)
            .map(|indices| indices.iter().any(|&i| self.records[i].is_active_at(height)))
            .unwrap_or(false)
    }

    /// Latest range of `address`
    pub fn record(&self, address: &Address) -> Option<&ValidatorRecord> {
        self.latest_index(address).map(|i| &self.records[i])
    }

    /// All ranges of `address`, oldest first
    pub fn history(&self, address: &Address) -> Vec<ValidatorRecord> {
        self.ranges
            .get(address)
            .map(|indices| indices.iter().map(|&i| self.records[i]).collect())
            .unwrap_or_default()
    }

    /// Records, most recently inserted first
    pub fn iter(&self) -> impl Iterator<Item = &ValidatorRecord> {
        self.records.iter().rev()
    }

    /// Number of records ever inserted
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn latest_index(&self, address: &Address) -> Option<usize> {
        self.ranges.get(address).and_then(|indices| indices.last().copied())
    }

    fn add_delta(&mut self, height: BlockHeight, delta: i64) {
        let entry = self.deltas.entry(height).or_insert(0);
        *entry += delta;
        if *entry == 0 {
            self.deltas.remove(&height);
        }
    }
}
