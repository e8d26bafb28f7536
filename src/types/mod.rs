mod msg;
mod proof;

use serde::{Deserialize, Serialize};

pub use msg::{AnyMsg, Msg, MsgClaimRewards, MsgSubmitParticipantsProof};
pub use proof::{
    BlockHeaderFull, BlockId, BlockProof, CommitInfo, MsgSubmitActiveParticipantsProofData,
    ProofOp, ProofOps, SignatureInfo, ValidatorsProof,
};

pub type Address = String;

/// Key prefix for the per-epoch committed participant sets.
pub const ACTIVE_PARTICIPANTS_KEY_PREFIX: &[u8] = b"ActiveParticipants/";

/// `ActiveParticipants/` followed by the big-endian epoch id.
pub fn active_participants_full_key(epoch_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(ACTIVE_PARTICIPANTS_KEY_PREFIX.len() + 8);
    key.extend_from_slice(ACTIVE_PARTICIPANTS_KEY_PREFIX);
    key.extend_from_slice(&epoch_id.to_be_bytes());
    key
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParticipantStatus {
    #[default]
    Active,
    Ramping,
    Invalid,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParticipantStatusReason {
    #[default]
    NoReason,
    Ramping,
    ConsecutiveFailures,
    StatisticalInvalidations,
}

impl ParticipantStatusReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatusReason::NoReason => "no_reason",
            ParticipantStatusReason::Ramping => "ramping",
            ParticipantStatusReason::ConsecutiveFailures => "consecutive_failures",
            ParticipantStatusReason::StatisticalInvalidations => "statistical_invalidations",
        }
    }
}

/// Per-epoch serving counters; reset when the participant enters a new epoch.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentEpochStats {
    pub inference_count: u64,
    pub validated_inferences: u64,
    pub invalidated_inferences: u64,
    pub missed_requests: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    /// Bech32 account address.
    pub address: Address,
    /// Base64-encoded consensus public key.
    pub validator_key: String,
    pub weight: u64,
    pub coin_balance: u64,
    pub status: ParticipantStatus,
    pub epochs_completed: u64,
    pub consecutive_invalid_inferences: u64,
    pub current_epoch_stats: CurrentEpochStats,
}

/// The committed participant set for one epoch. Immutable once written.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActiveParticipants {
    pub epoch_id: u64,
    pub epoch_group_id: u64,
    pub created_at_block_height: i64,
    pub effective_block_height: i64,
    pub participants: Vec<Participant>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExcludedParticipant {
    pub address: Address,
    pub epoch_index: u64,
    pub reason: String,
    pub effective_height: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SeedType {
    Current,
    Previous,
    Upcoming,
}

impl SeedType {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            SeedType::Current => 0,
            SeedType::Previous => 1,
            SeedType::Upcoming => 2,
        }
    }
}

/// Per-epoch randomness used to drive validations and reward claims.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedInfo {
    pub seed: u64,
    pub epoch_index: u64,
    pub signature: String,
    pub claimed: bool,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_participants_key_is_prefix_plus_big_endian_epoch() {
        let key = active_participants_full_key(3);
        assert!(key.starts_with(b"ActiveParticipants/"));
        assert_eq!(&key[key.len() - 8..], &3u64.to_be_bytes());
    }

    #[test]
    fn active_participants_roundtrip_through_storage_codec() {
        let set = ActiveParticipants {
            epoch_id: 7,
            epoch_group_id: 2,
            created_at_block_height: 100,
            effective_block_height: 110,
            participants: vec![Participant {
                address: "gonka1p2lhgng7tcqju7emk989s5fpdr7k2c3ek6h26m".to_string(),
                validator_key: "q1JhWJcDN1B7ZBKHevzrcmTHfrVhJmdXKO4lJJGuyLc=".to_string(),
                weight: 250,
                coin_balance: 1_000,
                status: ParticipantStatus::Active,
                epochs_completed: 4,
                consecutive_invalid_inferences: 0,
                current_epoch_stats: CurrentEpochStats::default(),
            }],
        };
        let bytes = bincode::serialize(&set).expect("serialize participants");
        let decoded: ActiveParticipants = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(decoded, set);
    }
}
