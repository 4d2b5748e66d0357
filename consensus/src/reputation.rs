//! In-memory reputation registry

use dashmap::DashMap;
use mosaic_core::{Address, Reputation};

/// Reputation weights kept in memory
///
/// A validator is honest while its weight is non-zero; slashing zeroes it.
#[derive(Debug, Default)]
pub struct MemoryReputation {
    weights: DashMap<Address, u64>,
}

impl MemoryReputation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, validator: Address, weight: u64) {
        self.weights.insert(validator, weight);
    }

    pub fn slash(&self, validator: &Address) {
        if let Some(mut weight) = self.weights.get_mut(validator) {
            *weight = 0;
        }
    }

    pub fn weight(&self, validator: &Address) -> u64 {
        self.weights.get(validator).map(|w| *w).unwrap_or(0)
    }
}

impl Reputation for MemoryReputation {
    fn is_active_and_honest(&self, validator: &Address) -> bool {
        self.weight(validator) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash() {
        let reputation = MemoryReputation::new();
        let validator = Address([1u8; 32]);
        assert!(!reputation.is_active_and_honest(&validator));

        reputation.set(validator, 10);
        assert!(reputation.is_active_and_honest(&validator));

        reputation.slash(&validator);
        assert!(!reputation.is_active_and_honest(&validator));
        assert_eq!(reputation.weight(&validator), 0);
    }
}
