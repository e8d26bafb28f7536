//! Shared fixtures: deterministic validator keys, participant sets, commits
//! signed with real ed25519 keys, and single-leaf merkle proof chains.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signer, SigningKey};
use ics23::commitment_proof::Proof;
use ics23::{
    calculate_existence_root, CommitmentProof, ExistenceProof, HashOp, HostFunctionsManager,
    LeafOp, LengthOp,
};
use prost::Message;

use epoch_proofs::canonical::{canonical_block_id, precommit_sign_bytes};
use epoch_proofs::crypto::{encode_base64, hex_upper};
use epoch_proofs::types::{
    ActiveParticipants, BlockHeaderFull, BlockId, CurrentEpochStats, Participant,
    ParticipantStatus, ProofOp, ProofOps, SignatureInfo, ValidatorsProof,
};

pub const CHAIN_ID: &str = "inference-test";

pub struct Validator {
    pub signing: SigningKey,
    pub address_hex: String,
    pub key_base64: String,
}

pub fn validator(seed: u8) -> Validator {
    let signing = SigningKey::from_bytes(&[seed; 32]);
    let key_base64 = encode_base64(signing.verifying_key().as_bytes());
    let address_hex = epoch_proofs::crypto::consensus_key_to_address(&key_base64)
        .expect("derive validator address");
    Validator {
        signing,
        address_hex,
        key_base64,
    }
}

pub fn participant(validator: &Validator, weight: u64) -> Participant {
    Participant {
        address: format!("gonka1{}", validator.address_hex.to_lowercase()),
        validator_key: validator.key_base64.clone(),
        weight,
        coin_balance: 1_000,
        status: ParticipantStatus::Active,
        epochs_completed: 1,
        consecutive_invalid_inferences: 0,
        current_epoch_stats: CurrentEpochStats::default(),
    }
}

pub fn participant_set(
    epoch_id: u64,
    created_at: i64,
    validators: &[&Validator],
    weight: u64,
) -> ActiveParticipants {
    ActiveParticipants {
        epoch_id,
        epoch_group_id: epoch_id,
        created_at_block_height: created_at,
        effective_block_height: created_at + 10,
        participants: validators
            .iter()
            .map(|validator| participant(validator, weight))
            .collect(),
    }
}

pub fn block_id(fill: u8) -> BlockId {
    BlockId {
        hash: hex_upper(&[fill; 32]),
        part_set_header_total: 1,
        part_set_header_hash: hex_upper(&[fill.wrapping_add(1); 32]),
    }
}

pub fn sign_time(offset: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, offset).unwrap()
}

/// Builds a commit for `height` over `commit_block_id`, signed by the given
/// validators with real precommit sign-bytes.
pub fn signed_commit(
    height: i64,
    round: i64,
    commit_block_id: &BlockId,
    signers: &[&Validator],
) -> ValidatorsProof {
    let canonical = canonical_block_id(commit_block_id).expect("canonical block id");
    let signatures = signers
        .iter()
        .enumerate()
        .map(|(index, validator)| {
            let timestamp = sign_time(index as u32);
            let sign_bytes =
                precommit_sign_bytes(height, round, canonical.clone(), &timestamp, CHAIN_ID);
            let signature = validator.signing.sign(&sign_bytes);
            SignatureInfo {
                signature_base64: encode_base64(&signature.to_bytes()),
                validator_address_hex: validator.address_hex.clone(),
                timestamp,
            }
        })
        .collect();
    ValidatorsProof {
        block_height: height,
        round,
        block_id: commit_block_id.clone(),
        signatures,
    }
}

/// Header for the block following the participant-set commit height.
pub fn header_for(height: i64, last_block_id: &BlockId, app_hash: Vec<u8>) -> BlockHeaderFull {
    BlockHeaderFull {
        version: 11,
        chain_id: CHAIN_ID.to_string(),
        height,
        timestamp: sign_time(30),
        last_block_id: last_block_id.clone(),
        last_commit_hash: vec![0x01; 32],
        data_hash: vec![0x02; 32],
        validators_hash: vec![0x03; 32],
        next_validators_hash: vec![0x04; 32],
        consensus_hash: vec![0x05; 32],
        app_hash,
        last_results_hash: vec![0x07; 32],
        evidence_hash: vec![0x08; 32],
        proposer_address: vec![0x09; 20],
    }
}

fn single_leaf_proof(leaf: LeafOp, key: &[u8], value: &[u8]) -> (Vec<u8>, CommitmentProof) {
    let existence = ExistenceProof {
        key: key.to_vec(),
        value: value.to_vec(),
        leaf: Some(leaf),
        path: Vec::new(),
    };
    let root = calculate_existence_root::<HostFunctionsManager>(&existence)
        .expect("fixture existence root");
    (
        root,
        CommitmentProof {
            proof: Some(Proof::Exist(existence)),
        },
    )
}

/// Two-op proof chain for `(key, value)` in `store`; the returned root is
/// the app hash the chain ends at.
pub fn proof_chain(store: &str, key: &[u8], value: &[u8]) -> (Vec<u8>, ProofOps) {
    let iavl_leaf = LeafOp {
        hash: HashOp::Sha256 as i32,
        prehash_key: HashOp::NoHash as i32,
        prehash_value: HashOp::Sha256 as i32,
        length: LengthOp::VarProto as i32,
        prefix: vec![0x00, 0x02, 0x02],
    };
    let multistore_leaf = LeafOp {
        hash: HashOp::Sha256 as i32,
        prehash_key: HashOp::NoHash as i32,
        prehash_value: HashOp::Sha256 as i32,
        length: LengthOp::VarProto as i32,
        prefix: vec![0x00],
    };

    let (store_root, iavl_proof) = single_leaf_proof(iavl_leaf, key, value);
    let (app_hash, multistore_proof) =
        single_leaf_proof(multistore_leaf, store.as_bytes(), &store_root);
    let ops = ProofOps {
        ops: vec![
            ProofOp {
                op_type: "ics23:iavl".to_string(),
                key: key.to_vec(),
                data: iavl_proof.encode_to_vec(),
            },
            ProofOp {
                op_type: "ics23:simple".to_string(),
                key: store.as_bytes().to_vec(),
                data: multistore_proof.encode_to_vec(),
            },
        ],
    };
    (app_hash, ops)
}
