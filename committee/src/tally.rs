//! Revealed position tally

use mosaic_core::{Hash, Position};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Counts of revealed positions and the decision once one reaches quorum
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionTally {
    counts: HashMap<Position, u64>,
    /// Distinct positions in first-seen order
    taken: Vec<Position>,
    total: u64,
    decision: Option<Position>,
}

impl PositionTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one reveal; sets the decision the first time a count reaches `quorum`
    ///
    /// Returns the new count of `position`.
    pub fn record(&mut self, position: Position, quorum: u64) -> u64 {
        let count = self.counts.entry(position).or_insert(0);
        if *count == 0 {
            self.taken.push(position);
        }
        *count += 1;
        let count = *count;
        self.total += 1;

        if self.decision.is_none() && count >= quorum {
            self.decision = Some(position);
        }
        count
    }

    pub fn count(&self, position: &Position) -> u64 {
        self.counts.get(position).copied().unwrap_or(0)
    }

    pub fn positions_taken(&self) -> &[Position] {
        &self.taken
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn decision(&self) -> Option<Position> {
        self.decision
    }

    /// Decision, or the zero hash while undecided
    pub fn decision_or_zero(&self) -> Hash {
        self.decision.unwrap_or(Hash::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_order() {
        let mut tally = PositionTally::new();
        let p = Hash([1u8; 32]);
        let q = Hash([2u8; 32]);

        tally.record(q, 3);
        tally.record(p, 3);
        tally.record(q, 3);

        assert_eq!(tally.positions_taken(), &[q, p]);
        assert_eq!(tally.count(&q), 2);
        assert_eq!(tally.total(), 3);
        assert_eq!(tally.decision_or_zero(), Hash::ZERO);
    }

    #[test]
    fn test_decision_is_immutable() {
        let mut tally = PositionTally::new();
        let p = Hash([1u8; 32]);
        let q = Hash([2u8; 32]);

        tally.record(p, 2);
        assert_eq!(tally.record(p, 2), 2);
        assert_eq!(tally.decision(), Some(p));

        tally.record(q, 2);
        tally.record(q, 2);
        assert_eq!(tally.decision(), Some(p));
    }
}
