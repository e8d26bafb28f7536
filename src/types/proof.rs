use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Block identifier as carried on the wire: hashes are upper-case hex.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockId {
    pub hash: String,
    pub part_set_header_total: i64,
    pub part_set_header_hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature_base64: String,
    /// Upper-case hex consensus address of the signer.
    pub validator_address_hex: String,
    pub timestamp: DateTime<Utc>,
}

/// Last-commit data lifted from block N+1, proving who signed block N.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidatorsProof {
    pub block_height: i64,
    pub round: i64,
    pub block_id: BlockId,
    pub signatures: Vec<SignatureInfo>,
}

/// The full Tendermint header of the block following the commit height.
/// Field order matches the upstream header; the byte fields are raw digests.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeaderFull {
    pub version: i64,
    pub chain_id: String,
    pub height: i64,
    pub timestamp: DateTime<Utc>,
    pub last_block_id: BlockId,
    pub last_commit_hash: Vec<u8>,
    pub data_hash: Vec<u8>,
    pub validators_hash: Vec<u8>,
    pub next_validators_hash: Vec<u8>,
    pub consensus_hash: Vec<u8>,
    pub app_hash: Vec<u8>,
    pub last_results_hash: Vec<u8>,
    pub evidence_hash: Vec<u8>,
    pub proposer_address: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitInfo {
    pub validator_address: String,
    pub validator_pub_key: String,
}

/// Internal record pinning the app hash and commit set of one block.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockProof {
    pub created_at_block_height: i64,
    pub app_hash_hex: String,
    pub commits: Vec<CommitInfo>,
}

/// One ABCI merkle proof operation; `data` is an encoded commitment proof.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofOp {
    #[serde(rename = "type")]
    pub op_type: String,
    pub key: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofOps {
    pub ops: Vec<ProofOp>,
}

/// Self-contained proof payload for one epoch's participant set, built from
/// blocks N+1 and N+2 around the set's creation height N.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MsgSubmitActiveParticipantsProofData {
    pub block_height: u64,
    pub epoch_id: u64,
    pub current_block_validators_proof: Option<ValidatorsProof>,
    pub next_block_validators_proof: Option<ValidatorsProof>,
    pub block_proof: Option<BlockHeaderFull>,
    pub proof_ops: Option<ProofOps>,
}
