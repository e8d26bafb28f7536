use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::errors::{ChainError, ChainResult};
use crate::types::{
    ActiveParticipants, Address, BlockProof, ExcludedParticipant, ProofOps, SeedInfo, SeedType,
    ValidatorsProof,
};

pub(crate) const CF_ACTIVE_PARTICIPANTS: &str = "active_participants";
pub(crate) const CF_BLOCK_PROOFS: &str = "block_proofs";
pub(crate) const CF_PARTICIPANT_PROOFS: &str = "participant_proofs";
pub(crate) const CF_PENDING_PROOFS: &str = "pending_proofs";
pub(crate) const CF_VALIDATORS_PROOFS: &str = "validators_proofs";
pub(crate) const CF_EXCLUDED: &str = "excluded_participants";
pub(crate) const CF_EPOCH_GROUPS: &str = "epoch_group_members";
pub(crate) const CF_SEEDS: &str = "seeds";
pub(crate) const CF_METADATA: &str = "metadata";

const EFFECTIVE_EPOCH_KEY: &[u8] = b"effective_epoch";
const UPCOMING_EPOCH_KEY: &[u8] = b"upcoming_epoch";

const ALL_CFS: [&str; 9] = [
    CF_ACTIVE_PARTICIPANTS,
    CF_BLOCK_PROOFS,
    CF_PARTICIPANT_PROOFS,
    CF_PENDING_PROOFS,
    CF_VALIDATORS_PROOFS,
    CF_EXCLUDED,
    CF_EPOCH_GROUPS,
    CF_SEEDS,
    CF_METADATA,
];

/// Persistent owner of every per-epoch and per-height proof record. All
/// mutations flow through a [`StoreBatch`], which commits atomically.
pub struct SnapshotStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl SnapshotStore {
    pub fn open(path: &Path) -> ChainResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let cf_descriptors: Vec<_> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();
        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn begin(&self) -> StoreBatch<'_> {
        StoreBatch {
            store: self,
            batch: WriteBatch::default(),
            staged: HashSet::new(),
        }
    }

    fn cf(&self, name: &'static str) -> ChainResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ChainError::Internal(format!("missing column family {name}")))
    }

    fn get_record<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &'static str,
        key: &[u8],
    ) -> ChainResult<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(&cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn has(&self, cf_name: &'static str, key: &[u8]) -> ChainResult<bool> {
        let cf = self.cf(cf_name)?;
        Ok(self.db.get_cf(&cf, key)?.is_some())
    }

    pub fn get_active_participants(&self, epoch_id: u64) -> ChainResult<Option<ActiveParticipants>> {
        self.get_record(CF_ACTIVE_PARTICIPANTS, &epoch_id.to_be_bytes())
    }

    pub fn get_block_proof(&self, height: i64) -> ChainResult<Option<BlockProof>> {
        self.get_record(CF_BLOCK_PROOFS, &(height as u64).to_be_bytes())
    }

    pub fn get_active_participants_proof(&self, height: i64) -> ChainResult<Option<ProofOps>> {
        self.get_record(CF_PARTICIPANT_PROOFS, &(height as u64).to_be_bytes())
    }

    pub fn get_pending_proof(&self, height: i64) -> ChainResult<Option<u64>> {
        self.get_record(CF_PENDING_PROOFS, &(height as u64).to_be_bytes())
    }

    pub fn get_validators_proof(&self, height: i64) -> ChainResult<Option<ValidatorsProof>> {
        self.get_record(CF_VALIDATORS_PROOFS, &(height as u64).to_be_bytes())
    }

    pub fn get_excluded_participant(
        &self,
        epoch_index: u64,
        address: &str,
    ) -> ChainResult<Option<ExcludedParticipant>> {
        self.get_record(CF_EXCLUDED, &excluded_key(epoch_index, address))
    }

    pub fn is_epoch_group_member(&self, epoch_index: u64, address: &str) -> ChainResult<bool> {
        self.has(CF_EPOCH_GROUPS, &excluded_key(epoch_index, address))
    }

    pub fn effective_epoch_index(&self) -> ChainResult<Option<u64>> {
        self.read_epoch_index(EFFECTIVE_EPOCH_KEY)
    }

    pub fn upcoming_epoch_index(&self) -> ChainResult<Option<u64>> {
        self.read_epoch_index(UPCOMING_EPOCH_KEY)
    }

    fn read_epoch_index(&self, key: &[u8]) -> ChainResult<Option<u64>> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| ChainError::Internal("invalid epoch index encoding".into()))?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Newest active seed row of the given type.
    pub fn get_active_seed(&self, seed_type: SeedType) -> ChainResult<Option<SeedInfo>> {
        match self.newest_active_seed(seed_type)? {
            Some((_, info)) => Ok(Some(info)),
            None => Ok(None),
        }
    }

    fn newest_active_seed(&self, seed_type: SeedType) -> ChainResult<Option<(Vec<u8>, SeedInfo)>> {
        let cf = self.cf(CF_SEEDS)?;
        let upper = seed_key(seed_type, u64::MAX);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&upper, Direction::Reverse));
        for entry in iter {
            let (key, value) = entry?;
            if key.first() != Some(&seed_type.tag()) {
                break;
            }
            let info: SeedInfo = bincode::deserialize(&value)?;
            if info.active {
                return Ok(Some((key.to_vec(), info)));
            }
        }
        Ok(None)
    }

    fn seed_rows(&self, seed_type: SeedType) -> ChainResult<Vec<(Vec<u8>, SeedInfo)>> {
        let cf = self.cf(CF_SEEDS)?;
        let lower = seed_key(seed_type, 0);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&lower, Direction::Forward));
        let mut rows = Vec::new();
        for entry in iter {
            let (key, value) = entry?;
            if key.first() != Some(&seed_type.tag()) {
                break;
            }
            rows.push((key.to_vec(), bincode::deserialize(&value)?));
        }
        Ok(rows)
    }
}

impl Clone for SnapshotStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}

fn excluded_key(epoch_index: u64, address: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + address.len());
    key.extend_from_slice(&epoch_index.to_be_bytes());
    key.extend_from_slice(address.as_bytes());
    key
}

fn seed_key(seed_type: SeedType, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(seed_type.tag());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Write set for one message handler. Either every staged write commits or
/// none does; duplicate checks see both the database and earlier writes in
/// the same batch.
pub struct StoreBatch<'a> {
    store: &'a SnapshotStore,
    batch: WriteBatch,
    staged: HashSet<(&'static str, Vec<u8>)>,
}

impl<'a> StoreBatch<'a> {
    fn put_record<T: serde::Serialize>(
        &mut self,
        cf_name: &'static str,
        key: Vec<u8>,
        value: &T,
    ) -> ChainResult<()> {
        let cf = self.store.cf(cf_name)?;
        self.batch.put_cf(&cf, &key, bincode::serialize(value)?);
        self.staged.insert((cf_name, key));
        Ok(())
    }

    fn exists(&self, cf_name: &'static str, key: &[u8]) -> ChainResult<bool> {
        if self.staged.contains(&(cf_name, key.to_vec())) {
            return Ok(true);
        }
        self.store.has(cf_name, key)
    }

    /// Unconditional write keyed by the set's epoch id.
    pub fn set_active_participants(&mut self, participants: &ActiveParticipants) -> ChainResult<()> {
        self.put_record(
            CF_ACTIVE_PARTICIPANTS,
            participants.epoch_id.to_be_bytes().to_vec(),
            participants,
        )
    }

    /// Insert-once: a second proof for the same height is a conflict.
    pub fn set_block_proof(&mut self, proof: &BlockProof) -> ChainResult<()> {
        let key = (proof.created_at_block_height as u64).to_be_bytes().to_vec();
        if self.exists(CF_BLOCK_PROOFS, &key)? {
            return Err(ChainError::Conflict(format!(
                "block proof already stored for height {}",
                proof.created_at_block_height
            )));
        }
        self.put_record(CF_BLOCK_PROOFS, key, proof)
    }

    /// Idempotent: re-recording a pending proof for a height is a no-op.
    pub fn set_pending_proof(&mut self, height: i64, participants_epoch: u64) -> ChainResult<()> {
        let key = (height as u64).to_be_bytes().to_vec();
        if self.exists(CF_PENDING_PROOFS, &key)? {
            return Ok(());
        }
        self.put_record(CF_PENDING_PROOFS, key, &participants_epoch)
    }

    /// Idempotent insert of the merkle proof for a height.
    pub fn set_active_participants_proof(
        &mut self,
        proof: &ProofOps,
        height: u64,
    ) -> ChainResult<()> {
        let key = height.to_be_bytes().to_vec();
        if self.exists(CF_PARTICIPANT_PROOFS, &key)? {
            return Ok(());
        }
        self.put_record(CF_PARTICIPANT_PROOFS, key, proof)
    }

    /// Idempotent, keyed by the proof's block height.
    pub fn set_validators_proof(&mut self, proof: &ValidatorsProof) -> ChainResult<()> {
        let key = (proof.block_height as u64).to_be_bytes().to_vec();
        if self.exists(CF_VALIDATORS_PROOFS, &key)? {
            return Ok(());
        }
        self.put_record(CF_VALIDATORS_PROOFS, key, proof)
    }

    /// Idempotent upsert keyed by (epoch, address).
    pub fn set_excluded_participant(&mut self, record: &ExcludedParticipant) -> ChainResult<()> {
        let key = excluded_key(record.epoch_index, &record.address);
        if self.exists(CF_EXCLUDED, &key)? {
            return Ok(());
        }
        self.put_record(CF_EXCLUDED, key, record)
    }

    pub fn add_epoch_group_member(&mut self, epoch_index: u64, address: &Address) -> ChainResult<()> {
        self.put_record(CF_EPOCH_GROUPS, excluded_key(epoch_index, address), address)
    }

    pub fn remove_epoch_group_member(
        &mut self,
        epoch_index: u64,
        address: &str,
    ) -> ChainResult<()> {
        let cf = self.store.cf(CF_EPOCH_GROUPS)?;
        let key = excluded_key(epoch_index, address);
        self.batch.delete_cf(&cf, &key);
        self.staged.remove(&(CF_EPOCH_GROUPS, key));
        Ok(())
    }

    pub fn set_effective_epoch_index(&mut self, epoch_index: u64) -> ChainResult<()> {
        let cf = self.store.cf(CF_METADATA)?;
        self.batch
            .put_cf(&cf, EFFECTIVE_EPOCH_KEY, epoch_index.to_be_bytes());
        Ok(())
    }

    pub fn set_upcoming_epoch_index(&mut self, epoch_index: u64) -> ChainResult<()> {
        let cf = self.store.cf(CF_METADATA)?;
        self.batch
            .put_cf(&cf, UPCOMING_EPOCH_KEY, epoch_index.to_be_bytes());
        Ok(())
    }

    /// Deactivates every previously-active row of the type, then inserts the
    /// new row as the single active one. All within this batch.
    pub fn set_active_seed(&mut self, seed_type: SeedType, info: &SeedInfo) -> ChainResult<()> {
        let rows = self.store.seed_rows(seed_type)?;
        let mut next_seq = 0u64;
        for (key, mut row) in rows {
            let raw: [u8; 8] = key[1..]
                .try_into()
                .map_err(|_| ChainError::Internal("invalid seed key encoding".into()))?;
            next_seq = next_seq.max(u64::from_be_bytes(raw) + 1);
            if row.active {
                row.active = false;
                self.put_record(CF_SEEDS, key, &row)?;
            }
        }
        let mut inserted = info.clone();
        inserted.active = true;
        self.put_record(CF_SEEDS, seed_key(seed_type, next_seq), &inserted)
    }

    /// Flips `claimed` on the newest active row; `Ok(false)` when none is
    /// active.
    pub fn mark_seed_claimed(&mut self, seed_type: SeedType) -> ChainResult<bool> {
        match self.store.newest_active_seed(seed_type)? {
            Some((key, mut info)) => {
                info.claimed = true;
                self.put_record(CF_SEEDS, key, &info)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn commit(self) -> ChainResult<()> {
        self.store.db.write(self.batch)?;
        Ok(())
    }
}
