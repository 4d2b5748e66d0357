//! Kernels, metablocks and their typed hashes
//!
//! Every digest a validator signs is `H(0x19 0x01 ‖ domainSeparator ‖ structHash)`
//! so that a signature for one core instance never verifies on another.

use mosaic_core::{Address, BlockHeight, Dynasty, Gas, Hash};
use mosaic_crypto::hashing::{hash_multiple, type_hash, TypedHasher};
use serde::{Deserialize, Serialize};

pub const DOMAIN_SEPARATOR_TYPE: &str =
    "MosaicDomain(string name,string version,bytes32 metachainId,address verifyingCore)";

pub const KERNEL_TYPE: &str = "Kernel(uint256 height,bytes32 parent,address[] updatedValidators,uint256[] updatedReputation,uint256 gasTarget)";

pub const METABLOCK_TYPE: &str = "Metablock(bytes32 kernelHash,bytes32 originObservation,uint256 dynasty,uint256 accumulatedGas,bytes32 committeeLock,bytes32 source,bytes32 target,uint256 sourceBlockHeight,uint256 targetBlockHeight)";

pub const KERNEL_INTENT_TYPE: &str = "KernelIntent(uint256 height,bytes32 kernelHash)";

pub const DOMAIN_SEPARATOR_NAME: &str = "Mosaic-Core";
pub const DOMAIN_SEPARATOR_VERSION: &str = "0";

const TYPED_DATA_PREFIX: [u8; 2] = [0x19, 0x01];

/// Domain separator binding typed hashes to one metachain and core
pub fn domain_separator(metachain_id: &Hash, core_id: &Address) -> Hash {
    TypedHasher::tagged(&type_hash(DOMAIN_SEPARATOR_TYPE))
        .string(DOMAIN_SEPARATOR_NAME)
        .string(DOMAIN_SEPARATOR_VERSION)
        .hash(metachain_id)
        .address(core_id)
        .finalize()
}

/// `H(0x19 0x01 ‖ domain_separator ‖ struct_hash)`
pub fn typed_data_hash(domain_separator: &Hash, struct_hash: &Hash) -> Hash {
    hash_multiple(&[
        &TYPED_DATA_PREFIX,
        domain_separator.as_bytes(),
        struct_hash.as_bytes(),
    ])
}

/// Intent hash gateways use to confirm a kernel opening
pub fn kernel_intent_hash(height: BlockHeight, kernel_hash: &Hash) -> Hash {
    TypedHasher::tagged(&type_hash(KERNEL_INTENT_TYPE))
        .uint(height)
        .hash(kernel_hash)
        .finalize()
}

/// Validator updates and gas target of one metablock height
///
/// `updated_reputations[i]` is the new reputation of `updated_validators[i]`;
/// zero records a logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kernel {
    pub height: BlockHeight,
    /// Hash of the metablock precommitted at the previous height
    pub parent: Hash,
    pub updated_validators: Vec<Address>,
    pub updated_reputations: Vec<u64>,
    pub gas_target: Gas,
}

impl Kernel {
    pub fn struct_hash(&self) -> Hash {
        TypedHasher::tagged(&type_hash(KERNEL_TYPE))
            .uint(self.height)
            .hash(&self.parent)
            .address_list(&self.updated_validators)
            .uint_list(&self.updated_reputations)
            .uint(self.gas_target)
            .finalize()
    }

    pub fn hash(&self, domain_separator: &Hash) -> Hash {
        typed_data_hash(domain_separator, &self.struct_hash())
    }
}

/// Metablock proposal validators vote on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metablock {
    pub kernel_hash: Hash,
    pub origin_observation: Hash,
    pub dynasty: Dynasty,
    pub accumulated_gas: Gas,
    pub committee_lock: Hash,
    pub source: Hash,
    pub target: Hash,
    pub source_block_height: BlockHeight,
    pub target_block_height: BlockHeight,
}

impl Metablock {
    pub fn struct_hash(&self) -> Hash {
        TypedHasher::tagged(&type_hash(METABLOCK_TYPE))
            .hash(&self.kernel_hash)
            .hash(&self.origin_observation)
            .uint(self.dynasty)
            .uint(self.accumulated_gas)
            .hash(&self.committee_lock)
            .hash(&self.source)
            .hash(&self.target)
            .uint(self.source_block_height)
            .uint(self.target_block_height)
            .finalize()
    }

    pub fn hash(&self, domain_separator: &Hash) -> Hash {
        typed_data_hash(domain_separator, &self.struct_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metablock() -> Metablock {
        Metablock {
            kernel_hash: Hash([1u8; 32]),
            origin_observation: Hash([2u8; 32]),
            dynasty: 1,
            accumulated_gas: 100,
            committee_lock: Hash([3u8; 32]),
            source: Hash([4u8; 32]),
            target: Hash([5u8; 32]),
            source_block_height: 100,
            target_block_height: 200,
        }
    }

    #[test]
    fn test_domain_separator_binds_core() {
        let chain = Hash([7u8; 32]);
        let a = domain_separator(&chain, &Address([1u8; 32]));
        let b = domain_separator(&chain, &Address([2u8; 32]));
        let c = domain_separator(&Hash([8u8; 32]), &Address([1u8; 32]));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, domain_separator(&chain, &Address([1u8; 32])));
    }

    #[test]
    fn test_metablock_hash_covers_every_field() {
        let domain = domain_separator(&Hash([7u8; 32]), &Address([1u8; 32]));
        let base = metablock().hash(&domain);

        let mut changed = metablock();
        changed.dynasty = 2;
        assert_ne!(changed.hash(&domain), base);

        let mut changed = metablock();
        changed.target_block_height = 300;
        assert_ne!(changed.hash(&domain), base);

        let other_domain = domain_separator(&Hash([7u8; 32]), &Address([2u8; 32]));
        assert_ne!(metablock().hash(&other_domain), base);
    }

    #[test]
    fn test_kernel_hash_is_order_sensitive() {
        let domain = domain_separator(&Hash([7u8; 32]), &Address([1u8; 32]));
        let a = Address([10u8; 32]);
        let b = Address([11u8; 32]);
        let kernel = Kernel {
            height: 1,
            parent: Hash([9u8; 32]),
            updated_validators: vec![a, b],
            updated_reputations: vec![1, 0],
            gas_target: 10,
        };
        let swapped = Kernel {
            updated_validators: vec![b, a],
            updated_reputations: vec![0, 1],
            ..kernel.clone()
        };
        assert_ne!(kernel.hash(&domain), swapped.hash(&domain));
        assert_eq!(
            kernel.hash(&domain),
            typed_data_hash(&domain, &kernel.struct_hash())
        );
    }

    fn digest(s: &str) -> Hash {
        Hash::from_hex(s).unwrap()
    }

    #[test]
    fn test_typed_hash_vectors() {
        let domain = domain_separator(&Hash([7u8; 32]), &Address([1u8; 32]));
        assert_eq!(
            domain,
            digest("7c0e868890e7272f3d60c9a108261cdd06bcaabcb6785c67819a263d28c45c1d")
        );

        let kernel = Kernel {
            height: 1,
            parent: Hash([9u8; 32]),
            updated_validators: vec![Address([10u8; 32]), Address([11u8; 32])],
            updated_reputations: vec![1, 0],
            gas_target: 10,
        };
        assert_eq!(
            kernel.hash(&domain),
            digest("11c537c81afbbcb1fee86ab042d361c6e1529831bb3ad7fcb7e090decdc62a1d")
        );

        assert_eq!(
            metablock().hash(&domain),
            digest("0eab5f08fdec78b4575f9b57b435710a55ba5c46938aaf10c0acbe0890befbac")
        );

        assert_eq!(
            kernel_intent_hash(1, &Hash([3u8; 32])),
            digest("2dd5bc4960fe8f4db109a567fe06cbc98d3bbb2b4b9e070ea07cc49a0582a318")
        );
    }

    #[test]
    fn test_kernel_intent_hash() {
        let kernel_hash = Hash([3u8; 32]);
        assert_ne!(
            kernel_intent_hash(1, &kernel_hash),
            kernel_intent_hash(2, &kernel_hash)
        );
    }
}
