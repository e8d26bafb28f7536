use tracing::{info, warn};

use crate::config::ValidationParams;
use crate::crypto::{hex_upper, ConsensusKey};
use crate::errors::{ChainError, ChainResult};
use crate::header::{check_quorum, header_hash, verify_commit_signatures, ParticipantKeys};
use crate::merkle::verify_proof_ops;
use crate::status::compute_status;
use crate::store::SnapshotStore;
use crate::types::{
    active_participants_full_key, ActiveParticipants, BlockProof, CommitInfo, ExcludedParticipant,
    MsgSubmitActiveParticipantsProofData, MsgSubmitParticipantsProof, Participant,
    ParticipantStatus, ParticipantStatusReason,
};

/// Name of the module store the proofs commit into.
pub const MODULE_STORE_KEY: &str = "inference";

/// Capability handle over the snapshot store. On-chain message handlers run
/// through here, single-threaded per block; each handler commits one batch
/// or nothing.
pub struct Keeper {
    store: SnapshotStore,
    chain_id: String,
    params: ValidationParams,
}

impl Keeper {
    pub fn new(store: SnapshotStore, chain_id: String, params: ValidationParams) -> Self {
        Self {
            store,
            chain_id,
            params,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn params(&self) -> &ValidationParams {
        &self.params
    }

    /// Record-only submission: stores the carried proofs, verifying nothing.
    pub fn submit_participants_proof(&self, msg: &MsgSubmitParticipantsProof) -> ChainResult<()> {
        if msg.block_height == 0 {
            return Err(ChainError::InvalidArgument("block height must be set".into()));
        }
        let mut batch = self.store.begin();
        if let Some(proof) = &msg.validators_proof {
            batch.set_validators_proof(proof)?;
        }
        if let Some(ops) = &msg.proof_ops {
            batch.set_active_participants_proof(ops, msg.block_height)?;
        }
        batch.commit()
    }

    /// Validates a full proof payload for one epoch and commits it.
    ///
    /// The payload must tie together: the participant set created at height
    /// N, the commit for block N carried in block N+1, the full header of
    /// block N+1, the commit for block N+1 carried in block N+2, and (past
    /// the genesis epoch) a merkle proof of the stored set against the app
    /// hash in that header.
    pub fn submit_proof_data(
        &self,
        msg: &MsgSubmitActiveParticipantsProofData,
    ) -> ChainResult<()> {
        if msg.block_height == 0 {
            return Err(ChainError::InvalidArgument("block height must be set".into()));
        }
        let (current_proof, next_proof, block_proof) = match (
            &msg.current_block_validators_proof,
            &msg.next_block_validators_proof,
            &msg.block_proof,
        ) {
            (Some(current), Some(next), Some(header)) => (current, next, header),
            _ => {
                return Err(ChainError::InvalidArgument(
                    "one of the mandatory proofs missing".into(),
                ))
            }
        };
        if msg.epoch_id != 0 && msg.proof_ops.is_none() {
            return Err(ChainError::InvalidArgument(
                "merkle proof is mandatory for epoch_id > 0".into(),
            ));
        }

        // The proofs must really come from blocks N and N+1.
        if msg.block_height as i64 != block_proof.height - 1
            || current_proof.block_height != block_proof.height - 1
        {
            return Err(ChainError::InvalidArgument(
                "invalid height by block proof".into(),
            ));
        }
        if current_proof.block_id.hash.to_uppercase()
            != block_proof.last_block_id.hash.to_uppercase()
        {
            return Err(ChainError::VerificationFailed(
                "invalid hash by block proof".into(),
            ));
        }

        let current = self
            .store
            .get_active_participants(msg.epoch_id)?
            .ok_or_else(|| {
                ChainError::NotFound("participants for given epoch not found".into())
            })?;
        if current.participants.is_empty() {
            return Err(ChainError::InvalidArgument(
                "participant set for epoch is empty".into(),
            ));
        }
        if current.created_at_block_height != msg.block_height as i64
            || current.created_at_block_height != current_proof.block_height
        {
            return Err(ChainError::InvalidArgument(
                "proofs block height do not match participants block height".into(),
            ));
        }

        // Epoch 0 is the bootstrap case: the set vouches for itself.
        let previous = if msg.epoch_id == 0 {
            current.clone()
        } else {
            self.store
                .get_active_participants(msg.epoch_id - 1)?
                .ok_or_else(|| {
                    ChainError::NotFound("participants for previous epoch not found".into())
                })?
        };

        let (keys, pubkeys_by_address) = participant_keys(&previous)?;

        let commit = verify_commit_signatures(current_proof, &self.chain_id, &keys)?;
        check_quorum(&commit, &keys, self.params.quorum_rule)?;

        // Validators of block N+2 sign the header we were handed; its hash
        // replaces whatever block id the submitter put on the next proof.
        let computed = header_hash(block_proof)?;
        let mut next_proof = next_proof.clone();
        next_proof.block_id.hash = hex_upper(&computed);
        let next_commit = verify_commit_signatures(&next_proof, &self.chain_id, &keys)?;
        check_quorum(&next_commit, &keys, self.params.quorum_rule)?;

        if let Some(ops) = &msg.proof_ops {
            let key = active_participants_full_key(msg.epoch_id);
            let value = bincode::serialize(&current)?;
            verify_proof_ops(ops, &block_proof.app_hash, MODULE_STORE_KEY, &key, &value)?;
        }

        let commits = current_proof
            .signatures
            .iter()
            .map(|signature| CommitInfo {
                validator_address: signature.validator_address_hex.clone(),
                validator_pub_key: pubkeys_by_address
                    .get(&signature.validator_address_hex.to_uppercase())
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect();

        let mut batch = self.store.begin();
        batch.set_block_proof(&BlockProof {
            created_at_block_height: msg.block_height as i64,
            app_hash_hex: hex::encode(&block_proof.app_hash),
            commits,
        })?;
        batch.set_validators_proof(current_proof)?;
        if let Some(ops) = &msg.proof_ops {
            batch.set_active_participants_proof(ops, msg.block_height)?;
        }
        batch.commit()?;

        info!(
            epoch = msg.epoch_id,
            height = msg.block_height,
            signers = commit.signers.len(),
            "stored active-participants proof"
        );
        Ok(())
    }

    /// Commits the participant set for the next epoch and advances the
    /// upcoming-epoch pointer. The only writer of the epoch indices, together
    /// with [`Keeper::promote_upcoming_epoch`].
    pub fn advance_epoch(&self, participants: &ActiveParticipants) -> ChainResult<()> {
        if participants.participants.is_empty() {
            return Err(ChainError::InvalidArgument(
                "participant set for epoch is empty".into(),
            ));
        }
        if participants.effective_block_height < participants.created_at_block_height {
            return Err(ChainError::InvalidArgument(
                "effective height precedes creation height".into(),
            ));
        }
        let mut batch = self.store.begin();
        batch.set_active_participants(participants)?;
        for member in &participants.participants {
            batch.add_epoch_group_member(participants.epoch_id, &member.address)?;
        }
        batch.set_upcoming_epoch_index(participants.epoch_id)?;
        batch.commit()?;
        info!(
            epoch = participants.epoch_id,
            members = participants.participants.len(),
            created_at = participants.created_at_block_height,
            "committed upcoming participant set"
        );
        Ok(())
    }

    /// Makes the upcoming epoch effective.
    pub fn promote_upcoming_epoch(&self) -> ChainResult<u64> {
        let upcoming = self
            .store
            .upcoming_epoch_index()?
            .ok_or_else(|| ChainError::NotFound("no upcoming epoch committed".into()))?;
        let mut batch = self.store.begin();
        batch.set_effective_epoch_index(upcoming)?;
        batch.commit()?;
        Ok(upcoming)
    }

    /// The single entry point for changing a participant's status. Detects
    /// transitions and applies the invalidation side-effects exactly once
    /// per (participant, epoch).
    pub fn update_participant_status(
        &self,
        participant: &mut Participant,
        block_height: u64,
    ) -> ChainResult<()> {
        let original = participant.status;
        let (status, reason) = compute_status(&self.params, participant)?;
        if original == status {
            return Ok(());
        }

        participant.status = status;

        if original != ParticipantStatus::Invalid && status == ParticipantStatus::Invalid {
            self.invalidate_participant(participant, reason, block_height)?;
        }
        Ok(())
    }

    fn invalidate_participant(
        &self,
        participant: &mut Participant,
        reason: ParticipantStatusReason,
        block_height: u64,
    ) -> ChainResult<()> {
        let slashed = (participant.coin_balance as f64 * self.params.slash_fraction_invalid) as u64;
        participant.coin_balance = participant.coin_balance.saturating_sub(slashed);

        let mut batch = self.store.begin();
        if let Some(epoch_index) = self.store.effective_epoch_index()? {
            batch.set_excluded_participant(&ExcludedParticipant {
                address: participant.address.clone(),
                epoch_index,
                reason: reason.as_str().to_string(),
                effective_height: block_height,
            })?;
            batch.remove_epoch_group_member(epoch_index, &participant.address)?;
        } else {
            warn!(
                address = %participant.address,
                "no effective epoch; skipping exclusion record"
            );
        }
        batch.commit()?;

        info!(
            address = %participant.address,
            reason = reason.as_str(),
            slashed,
            "participant invalidated"
        );
        Ok(())
    }
}

/// Builds the verification view of a participant set: consensus keys plus
/// weights by upper-hex address, and the raw base64 keys for commit records.
fn participant_keys(
    set: &ActiveParticipants,
) -> ChainResult<(ParticipantKeys, std::collections::HashMap<String, String>)> {
    let mut keys = ParticipantKeys::new();
    let mut raw = std::collections::HashMap::new();
    for participant in &set.participants {
        let key = ConsensusKey::from_base64(&participant.validator_key)?;
        let address = key.address_hex();
        raw.insert(address.clone(), participant.validator_key.clone());
        keys.insert(address, key, participant.weight);
    }
    Ok((keys, raw))
}
