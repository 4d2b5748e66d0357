//! Default sealed-commit and sortition primitives

use mosaic_core::{Address, Commitment, Distance, Hash, Position, Sortition};

use crate::hashing::{hash_multiple, sortition_distance};

/// Sealed commit `hash(position ‖ salt ‖ sender)`
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Commitment;

impl Commitment for Blake3Commitment {
    fn seal(&self, position: &Position, salt: &Hash, sender: &Address) -> Hash {
        seal_position(position, salt, sender)
    }
}

/// Sortition by [`sortition_distance`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Sortition;

impl Sortition for Blake3Sortition {
    fn distance(&self, account: &Address, dislocation: &Hash, proposal: &Hash) -> Distance {
        sortition_distance(account, dislocation, proposal)
    }
}

/// Compute the sealed commit a member submits before revealing
pub fn seal_position(position: &Position, salt: &Hash, sender: &Address) -> Hash {
    hash_multiple(&[position.as_bytes(), salt.as_bytes(), sender.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_reveal() {
        let commitment = Blake3Commitment;
        let position = Hash([1u8; 32]);
        let salt = Hash([2u8; 32]);
        let sender = Address([3u8; 32]);

        let sealed = commitment.seal(&position, &salt, &sender);
        assert!(commitment.reveal(&sealed, &position, &salt, &sender));

        // Every part of the preimage is bound
        assert!(!commitment.reveal(&sealed, &Hash([9u8; 32]), &salt, &sender));
        assert!(!commitment.reveal(&sealed, &position, &Hash([9u8; 32]), &sender));
        assert!(!commitment.reveal(&sealed, &position, &salt, &Address([9u8; 32])));
    }

    #[test]
    fn test_seal_position_vector() {
        let sealed = seal_position(&Hash([1u8; 32]), &Hash([2u8; 32]), &Address([3u8; 32]));
        assert_eq!(
            sealed.to_hex(),
            "3656bd82356d3713799cc02c514eaa850ee36da8d8ab68d464022427d2619126"
        );
    }
}
