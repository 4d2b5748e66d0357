//! Digital signature operations using Ed25519

use ed25519_dalek::{Signer, Verifier};
use mosaic_core::{
    Address, Hash, MosaicError, MosaicResult, Position, PublicKey, Signature, VoteSignature,
};

use crate::hashing::hash_multiple;
use crate::keys::{validator_address, verifying_key, KeyPair};

/// Committee call a member authorizes with its own key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAction {
    Cooldown,
    Activate,
    Commit,
    Reveal,
}

impl MemberAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberAction::Cooldown => "cooldown",
            MemberAction::Activate => "activate",
            MemberAction::Commit => "commit",
            MemberAction::Reveal => "reveal",
        }
    }
}

/// Sign a message using Ed25519
pub fn sign(keypair: &KeyPair, message: &[u8]) -> Signature {
    let signature = keypair.signing_key().sign(message);
    Signature::from_bytes(signature.to_bytes())
}

/// Verify a signature using Ed25519
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> MosaicResult<()> {
    let verifying_key = verifying_key(public_key)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());

    verifying_key
        .verify(message, &sig)
        .map_err(|_| MosaicError::InvalidSignature)
}

/// Sign a vote for a proposal hash
pub fn sign_vote(keypair: &KeyPair, proposal: &Hash) -> VoteSignature {
    VoteSignature {
        public_key: keypair.public_key(),
        signature: sign(keypair, proposal.as_bytes()),
    }
}

/// Recover the signer address of a vote signature over `proposal`
///
/// Fails unless the signature verifies under the key it carries.
pub fn recover_vote_signer(proposal: &Hash, vote: &VoteSignature) -> MosaicResult<Address> {
    verify(&vote.public_key, proposal.as_bytes(), &vote.signature)?;
    validator_address(&vote.public_key)
}

/// Message a member signs to authorize `action` on the committee of `proposal`
pub fn member_action_hash(proposal: &Hash, action: MemberAction, payload: &[u8]) -> Hash {
    hash_multiple(&[
        b"mosaic-committee",
        action.as_str().as_bytes(),
        proposal.as_bytes(),
        payload,
    ])
}

/// Signed payload of a reveal: position followed by salt
pub fn reveal_payload(position: &Position, salt: &Hash) -> Vec<u8> {
    let mut payload = Vec::with_capacity(64);
    payload.extend_from_slice(position.as_bytes());
    payload.extend_from_slice(salt.as_bytes());
    payload
}

pub fn sign_member_action(
    keypair: &KeyPair,
    proposal: &Hash,
    action: MemberAction,
    payload: &[u8],
) -> VoteSignature {
    sign_vote(keypair, &member_action_hash(proposal, action, payload))
}

/// Recover the member that authorized `action`
pub fn recover_member(
    proposal: &Hash,
    action: MemberAction,
    payload: &[u8],
    signature: &VoteSignature,
) -> MosaicResult<Address> {
    recover_vote_signer(&member_action_hash(proposal, action, payload), signature)
}
