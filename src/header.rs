//! Block-header hashing and commit-signature verification.
//!
//! The header hash is the SHA-256 merkle root over the fourteen header
//! fields in upstream order. Getting these bytes wrong makes every
//! downstream signature check fail, so the leaf encodings live in
//! [`crate::canonical`] and are pinned by golden tests.

use std::collections::HashMap;

use prost::Message;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::canonical::{
    canonical_block_id, encode_bytes, encode_i64, encode_string, precommit_sign_bytes,
    BlockIdProto, ConsensusVersion, Timestamp,
};
use crate::config::QuorumRule;
use crate::crypto::{decode_base64, ConsensusKey};
use crate::errors::{ChainError, ChainResult};
use crate::types::{BlockHeaderFull, ValidatorsProof};

/// Read-only view of the previous epoch's participants, keyed by upper-case
/// hex consensus address.
pub struct ParticipantKeys {
    keys: HashMap<String, (ConsensusKey, u64)>,
    total_weight: u128,
}

impl ParticipantKeys {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            total_weight: 0,
        }
    }

    pub fn insert(&mut self, address_hex: String, key: ConsensusKey, weight: u64) {
        self.total_weight += u128::from(weight);
        self.keys.insert(address_hex.to_uppercase(), (key, weight));
    }

    pub fn get(&self, address_hex: &str) -> Option<&(ConsensusKey, u64)> {
        self.keys.get(&address_hex.to_uppercase())
    }

    pub fn contains(&self, address_hex: &str) -> bool {
        self.get(address_hex).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn total_weight(&self) -> u128 {
        self.total_weight
    }
}

impl Default for ParticipantKeys {
    fn default() -> Self {
        Self::new()
    }
}

/// Recomputes the Tendermint header hash from the full header fields.
pub fn header_hash(header: &BlockHeaderFull) -> ChainResult<[u8; 32]> {
    let version = ConsensusVersion {
        block: header.version as u64,
        app: 0,
    }
    .encode_to_vec();
    let time = Timestamp::from_datetime(&header.timestamp).encode_to_vec();
    let last_block_id = BlockIdProto::from_block_id(&header.last_block_id)?.encode_to_vec();

    let leaves: Vec<Vec<u8>> = vec![
        version,
        encode_string(&header.chain_id),
        encode_i64(header.height),
        time,
        last_block_id,
        encode_bytes(&header.last_commit_hash),
        encode_bytes(&header.data_hash),
        encode_bytes(&header.validators_hash),
        encode_bytes(&header.next_validators_hash),
        encode_bytes(&header.consensus_hash),
        encode_bytes(&header.app_hash),
        encode_bytes(&header.last_results_hash),
        encode_bytes(&header.evidence_hash),
        encode_bytes(&header.proposer_address),
    ];
    Ok(merkle_root(&leaves))
}

/// RFC 6962 merkle root: leaves prefixed with 0x00, inner nodes with 0x01,
/// split at the largest power of two strictly below the count.
pub fn merkle_root(leaves: &[Vec<u8>]) -> [u8; 32] {
    match leaves.len() {
        0 => Sha256::digest([]).into(),
        1 => leaf_hash(&leaves[0]),
        n => {
            let split = largest_power_of_two_below(n);
            let left = merkle_root(&leaves[..split]);
            let right = merkle_root(&leaves[split..]);
            inner_hash(&left, &right)
        }
    }
}

fn leaf_hash(leaf: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(leaf);
    hasher.finalize().into()
}

fn inner_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn largest_power_of_two_below(n: usize) -> usize {
    debug_assert!(n > 1);
    let mut power = 1;
    while power * 2 < n {
        power *= 2;
    }
    power
}

/// Outcome of verifying one commit against a participant set.
pub struct VerifiedCommit {
    /// Addresses whose precommit signature checked out.
    pub signers: Vec<String>,
    pub signed_weight: u128,
}

/// Verifies every signature of `proof` against the participant set.
///
/// Signers missing from the set fail the whole commit. An empty signature,
/// or one that only verifies over the empty (nil-vote) block id, is
/// tolerated and counted as absent. The quorum check is separate so the
/// caller can pick the configured rule.
pub fn verify_commit_signatures(
    proof: &ValidatorsProof,
    chain_id: &str,
    participants: &ParticipantKeys,
) -> ChainResult<VerifiedCommit> {
    for signature in &proof.signatures {
        if !participants.contains(&signature.validator_address_hex) {
            return Err(ChainError::VerificationFailed(
                "validator address not found in previous participants".into(),
            ));
        }
    }

    let block_id = canonical_block_id(&proof.block_id)?;
    let mut signers = Vec::new();
    let mut signed_weight: u128 = 0;

    for signature in &proof.signatures {
        if signature.signature_base64.is_empty() {
            continue;
        }
        let raw = decode_base64(&signature.signature_base64)?;
        let (key, weight) = participants
            .get(&signature.validator_address_hex)
            .expect("membership checked above");

        let sign_bytes = precommit_sign_bytes(
            proof.block_height,
            proof.round,
            block_id.clone(),
            &signature.timestamp,
            chain_id,
        );
        match key.verify(&sign_bytes, &raw) {
            Ok(()) => {
                signers.push(signature.validator_address_hex.to_uppercase());
                signed_weight += u128::from(*weight);
            }
            Err(err) => {
                // A precommit for no block is signed over an empty block id.
                let nil_bytes = precommit_sign_bytes(
                    proof.block_height,
                    proof.round,
                    None,
                    &signature.timestamp,
                    chain_id,
                );
                if key.verify(&nil_bytes, &raw).is_ok() {
                    debug!(
                        validator = %signature.validator_address_hex,
                        height = proof.block_height,
                        "nil precommit counted as absent"
                    );
                    continue;
                }
                return Err(err);
            }
        }
    }

    Ok(VerifiedCommit {
        signers,
        signed_weight,
    })
}

/// Applies the configured quorum rule to a verified commit.
pub fn check_quorum(
    commit: &VerifiedCommit,
    participants: &ParticipantKeys,
    rule: QuorumRule,
) -> ChainResult<()> {
    match rule {
        QuorumRule::Count => {
            let needed = participants.len() * 2 / 3 + 1;
            if commit.signers.len() < needed {
                return Err(ChainError::VerificationFailed(format!(
                    "quorum not reached: {} of {} required signers",
                    commit.signers.len(),
                    needed
                )));
            }
        }
        QuorumRule::Weight => {
            // Strictly more than two thirds of the total weight.
            if commit.signed_weight * 3 <= participants.total_weight() * 2 {
                return Err(ChainError::VerificationFailed(format!(
                    "quorum not reached: signed weight {} of total {}",
                    commit.signed_weight,
                    participants.total_weight()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::crypto::hex_upper;
    use crate::types::BlockId;

    fn golden_header() -> BlockHeaderFull {
        BlockHeaderFull {
            version: 11,
            chain_id: "inference-test".to_string(),
            height: 101,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            last_block_id: BlockId {
                hash: hex_upper(&[0xAA; 32]),
                part_set_header_total: 1,
                part_set_header_hash: hex_upper(&[0xBB; 32]),
            },
            last_commit_hash: vec![0x01; 32],
            data_hash: vec![0x02; 32],
            validators_hash: vec![0x03; 32],
            next_validators_hash: vec![0x04; 32],
            consensus_hash: vec![0x05; 32],
            app_hash: vec![0x06; 32],
            last_results_hash: vec![0x07; 32],
            evidence_hash: vec![0x08; 32],
            proposer_address: vec![0x09; 20],
        }
    }

    #[test]
    fn merkle_root_of_single_leaf_is_prefixed_hash() {
        let leaves = vec![vec![1, 2, 3]];
        let expected: [u8; 32] = {
            let mut hasher = Sha256::new();
            hasher.update([0x00]);
            hasher.update([1, 2, 3]);
            hasher.finalize().into()
        };
        assert_eq!(merkle_root(&leaves), expected);
    }

    #[test]
    fn merkle_root_splits_at_power_of_two() {
        // Three leaves: root = inner(inner(l0, l1), l2).
        let leaves: Vec<Vec<u8>> = vec![vec![0], vec![1], vec![2]];
        let l0 = leaf_hash(&leaves[0]);
        let l1 = leaf_hash(&leaves[1]);
        let l2 = leaf_hash(&leaves[2]);
        let expected = inner_hash(&inner_hash(&l0, &l1), &l2);
        assert_eq!(merkle_root(&leaves), expected);
    }

    #[test]
    fn header_hash_is_deterministic_and_field_sensitive() {
        let header = golden_header();
        let first = header_hash(&header).expect("hash");
        let second = header_hash(&header).expect("hash");
        assert_eq!(first, second);

        let mut changed = golden_header();
        changed.app_hash = vec![0x60; 32];
        assert_ne!(header_hash(&changed).expect("hash"), first);

        let mut renamed = golden_header();
        renamed.chain_id = "inference-prod".to_string();
        assert_ne!(header_hash(&renamed).expect("hash"), first);
    }

    #[test]
    fn header_hash_accepts_genesis_empty_last_block_id() {
        let mut header = golden_header();
        header.height = 1;
        header.last_block_id = BlockId::default();
        header.last_commit_hash = Vec::new();
        header_hash(&header).expect("genesis header hashes");
    }

    use chrono::DateTime;
    use ed25519_dalek::{Signer, SigningKey};

    use crate::crypto::encode_base64;
    use crate::types::SignatureInfo;

    fn signer_set(seeds: &[u8]) -> (Vec<SigningKey>, ParticipantKeys) {
        let mut keys = ParticipantKeys::new();
        let signers: Vec<SigningKey> = seeds
            .iter()
            .map(|seed| SigningKey::from_bytes(&[*seed; 32]))
            .collect();
        for signing in &signers {
            let key = ConsensusKey::from_bytes(signing.verifying_key().as_bytes()).expect("key");
            keys.insert(key.address_hex(), key, 100);
        }
        (signers, keys)
    }

    fn signature_for(
        signing: &SigningKey,
        proof: &ValidatorsProof,
        block_id: Option<crate::canonical::CanonicalBlockId>,
        timestamp: DateTime<Utc>,
        chain_id: &str,
    ) -> SignatureInfo {
        let sign_bytes =
            precommit_sign_bytes(proof.block_height, proof.round, block_id, &timestamp, chain_id);
        let key = ConsensusKey::from_bytes(signing.verifying_key().as_bytes()).expect("key");
        SignatureInfo {
            signature_base64: encode_base64(&signing.sign(&sign_bytes).to_bytes()),
            validator_address_hex: key.address_hex(),
            timestamp,
        }
    }

    #[test]
    fn nil_precommit_is_tolerated_and_counted_absent() {
        let (signers, keys) = signer_set(&[1, 2, 3]);
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut proof = ValidatorsProof {
            block_height: 100,
            round: 0,
            block_id: BlockId {
                hash: hex_upper(&[0xAA; 32]),
                part_set_header_total: 1,
                part_set_header_hash: hex_upper(&[0xBB; 32]),
            },
            signatures: Vec::new(),
        };
        let block_id = canonical_block_id(&proof.block_id).expect("canonical block id");

        // Two honest commit votes, one nil vote, one absent validator.
        proof.signatures.push(signature_for(
            &signers[0],
            &proof,
            block_id.clone(),
            timestamp,
            "test-chain",
        ));
        proof.signatures.push(signature_for(
            &signers[1],
            &proof,
            block_id,
            timestamp,
            "test-chain",
        ));
        proof.signatures.push(signature_for(
            &signers[2],
            &proof,
            None,
            timestamp,
            "test-chain",
        ));

        let commit =
            verify_commit_signatures(&proof, "test-chain", &keys).expect("commit verifies");
        assert_eq!(commit.signers.len(), 2);
        assert_eq!(commit.signed_weight, 200);
    }

    #[test]
    fn weight_quorum_needs_strictly_more_than_two_thirds() {
        let (_, keys) = signer_set(&[1, 2, 3]);
        let two_of_three = VerifiedCommit {
            signers: vec!["A".into(), "B".into()],
            signed_weight: 200,
        };
        // 200 of 300 is not strictly above 2/3.
        assert!(check_quorum(&two_of_three, &keys, QuorumRule::Weight).is_err());
        assert!(check_quorum(&two_of_three, &keys, QuorumRule::Count).is_err());

        let heavy = VerifiedCommit {
            signers: vec!["A".into(), "B".into(), "C".into()],
            signed_weight: 201,
        };
        assert!(check_quorum(&heavy, &keys, QuorumRule::Weight).is_ok());
    }
}
