use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};
use crate::types::{MsgSubmitActiveParticipantsProofData, ProofOps, ValidatorsProof};

/// Record-only submission: stores the carried proofs without re-verifying.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MsgSubmitParticipantsProof {
    pub block_height: u64,
    pub validators_proof: Option<ValidatorsProof>,
    pub proof_ops: Option<ProofOps>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MsgClaimRewards {
    pub seed: u64,
    pub epoch_index: u64,
}

/// Chain messages this crate produces or consumes, tagged by type URL.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Msg {
    SubmitActiveParticipantsProofData(MsgSubmitActiveParticipantsProofData),
    SubmitParticipantsProof(MsgSubmitParticipantsProof),
    ClaimRewards(MsgClaimRewards),
}

pub const TYPE_URL_SUBMIT_PROOF_DATA: &str = "/inference.v1.MsgSubmitActiveParticipantsProofData";
pub const TYPE_URL_SUBMIT_PARTICIPANTS_PROOF: &str = "/inference.v1.MsgSubmitParticipantsProof";
pub const TYPE_URL_CLAIM_REWARDS: &str = "/inference.v1.MsgClaimRewards";

impl Msg {
    pub fn type_url(&self) -> &'static str {
        match self {
            Msg::SubmitActiveParticipantsProofData(_) => TYPE_URL_SUBMIT_PROOF_DATA,
            Msg::SubmitParticipantsProof(_) => TYPE_URL_SUBMIT_PARTICIPANTS_PROOF,
            Msg::ClaimRewards(_) => TYPE_URL_CLAIM_REWARDS,
        }
    }
}

/// Dynamically-typed envelope, mirroring the chain's `Any` packing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnyMsg {
    pub type_url: String,
    pub value: Vec<u8>,
}

impl AnyMsg {
    pub fn pack(msg: &Msg) -> ChainResult<Self> {
        let value = match msg {
            Msg::SubmitActiveParticipantsProofData(inner) => bincode::serialize(inner)?,
            Msg::SubmitParticipantsProof(inner) => bincode::serialize(inner)?,
            Msg::ClaimRewards(inner) => bincode::serialize(inner)?,
        };
        Ok(Self {
            type_url: msg.type_url().to_string(),
            value,
        })
    }

    pub fn unpack(&self) -> ChainResult<Msg> {
        match self.type_url.as_str() {
            TYPE_URL_SUBMIT_PROOF_DATA => Ok(Msg::SubmitActiveParticipantsProofData(
                bincode::deserialize(&self.value)?,
            )),
            TYPE_URL_SUBMIT_PARTICIPANTS_PROOF => Ok(Msg::SubmitParticipantsProof(
                bincode::deserialize(&self.value)?,
            )),
            TYPE_URL_CLAIM_REWARDS => Ok(Msg::ClaimRewards(bincode::deserialize(&self.value)?)),
            other => Err(ChainError::InvalidArgument(format!(
                "unregistered message type url: {other}"
            ))),
        }
    }
}
