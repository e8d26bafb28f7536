//! Off-chain proof assembly.
//!
//! For every epoch in the requested range, pulls the committed participant
//! set plus blocks N+1 and N+2 from an archive node, lifts the commits into
//! validators proofs, and submits the assembled payload through the
//! transaction-broker seam.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{info, warn};

use crate::crypto::{decode_base64, decode_hex};
use crate::errors::{ChainError, ChainResult};
use crate::keeper::{Keeper, MODULE_STORE_KEY};
use crate::observer::{BlockResults, BlockResultsClient, TxResult};
use crate::types::{
    active_participants_full_key, ActiveParticipants, BlockHeaderFull, BlockId, Msg,
    MsgSubmitActiveParticipantsProofData, ProofOp, ProofOps, SignatureInfo, ValidatorsProof,
};

const RPC_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: u32 = 5;

/// Cooperative cancellation shared between the caller and long runs.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// A block as needed for proof assembly: its full header and the commit it
/// carries for the previous block.
#[derive(Clone, Debug)]
pub struct ArchiveBlock {
    pub header: BlockHeaderFull,
    pub last_commit: ValidatorsProof,
}

#[derive(Clone, Debug)]
pub struct AbciQueryResult {
    pub value: Vec<u8>,
    pub proof_ops: Option<ProofOps>,
}

/// Read access to an archive node.
pub trait ArchiveRpc: Send + Sync {
    fn block(&self, height: i64) -> ChainResult<ArchiveBlock>;
    fn abci_query(&self, key: &[u8], height: i64, prove: bool) -> ChainResult<AbciQueryResult>;
}

/// Transaction-broker seam: packs and carries messages to the chain.
pub trait ProofSubmitter: Send + Sync {
    fn submit(&self, msg: Msg) -> ChainResult<()>;
}

/// In-process submitter driving the keeper directly. Used by the recovery
/// tooling, where the chain runs in the same process.
pub struct KeeperSubmitter {
    keeper: Arc<Keeper>,
}

impl KeeperSubmitter {
    pub fn new(keeper: Arc<Keeper>) -> Self {
        Self { keeper }
    }
}

impl ProofSubmitter for KeeperSubmitter {
    fn submit(&self, msg: Msg) -> ChainResult<()> {
        match msg {
            Msg::SubmitActiveParticipantsProofData(inner) => self.keeper.submit_proof_data(&inner),
            Msg::SubmitParticipantsProof(inner) => self.keeper.submit_participants_proof(&inner),
            Msg::ClaimRewards(_) => Err(ChainError::InvalidArgument(
                "reward claims are not handled in-process".into(),
            )),
        }
    }
}

/// Assembles and submits proof payloads for every epoch in
/// `[start_epoch, current_epoch + 1]`. Returns the number of submitted
/// epochs.
pub fn populate_missing_proofs(
    rpc: &dyn ArchiveRpc,
    submitter: &dyn ProofSubmitter,
    current_epoch: u64,
    start_epoch: u64,
    cancel: &CancelToken,
) -> ChainResult<u64> {
    if start_epoch > current_epoch + 1 {
        return Err(ChainError::InvalidArgument(
            "startFromEpoch cannot be greater than current epoch".into(),
        ));
    }

    let mut submitted = 0;
    for epoch_id in start_epoch..=current_epoch + 1 {
        if cancel.is_cancelled() {
            warn!(epoch = epoch_id, "proof population cancelled");
            break;
        }
        let msg = assemble_epoch_proof(rpc, epoch_id)?;
        submitter.submit(Msg::SubmitActiveParticipantsProofData(msg))?;
        submitted += 1;
        info!(epoch = epoch_id, "submitted participants proof");
    }
    Ok(submitted)
}

/// Builds the proof payload for one epoch from archive data.
pub fn assemble_epoch_proof(
    rpc: &dyn ArchiveRpc,
    epoch_id: u64,
) -> ChainResult<MsgSubmitActiveParticipantsProofData> {
    let key = active_participants_full_key(epoch_id);
    let snapshot = rpc.abci_query(&key, 0, false)?;
    if snapshot.value.is_empty() {
        return Err(ChainError::NotFound(format!(
            "participants for epoch {epoch_id} not found on archive node"
        )));
    }
    let participants: ActiveParticipants = bincode::deserialize(&snapshot.value)?;

    let created_at = participants.created_at_block_height;
    let proof_block = rpc.block(created_at + 1)?;
    let next_block = rpc.block(created_at + 2)?;

    let proof_ops = if epoch_id != 0 {
        let proven = rpc.abci_query(&key, created_at, true)?;
        Some(proven.proof_ops.ok_or_else(|| {
            ChainError::NotFound(format!(
                "merkle proof for epoch {epoch_id} not available at height {created_at}"
            ))
        })?)
    } else {
        None
    };

    Ok(MsgSubmitActiveParticipantsProofData {
        block_height: created_at as u64,
        epoch_id,
        current_block_validators_proof: Some(proof_block.last_commit.clone()),
        next_block_validators_proof: Some(next_block.last_commit.clone()),
        block_proof: Some(proof_block.header),
        proof_ops,
    })
}

/// Blocking JSON-RPC client for an archive node. Transport failures are
/// retried with exponential backoff before being surfaced as transient.
pub struct HttpArchiveRpc {
    base_url: String,
    client: Client,
}

impl HttpArchiveRpc {
    pub fn new(endpoint: &str) -> ChainResult<Self> {
        let trimmed = endpoint.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ChainError::InvalidArgument(
                "archive rpc endpoint must not be empty".into(),
            ));
        }
        let client = Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|err| ChainError::Config(format!("failed to build rpc client: {err}")))?;
        Ok(Self {
            base_url: trimmed.to_string(),
            client,
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path_and_query: &str) -> ChainResult<T> {
        let url = format!("{}{}", self.base_url, path_and_query);
        with_backoff(|| {
            let response = self
                .client
                .get(&url)
                .send()
                .map_err(|err| ChainError::Transient(format!("rpc request failed: {err}")))?;
            let status = response.status();
            if status.is_server_error() {
                return Err(ChainError::Transient(format!(
                    "rpc returned status {status}"
                )));
            }
            if !status.is_success() {
                return Err(ChainError::InvalidArgument(format!(
                    "rpc returned status {status}"
                )));
            }
            response
                .json::<RpcEnvelope<T>>()
                .map_err(|err| ChainError::Internal(format!("rpc response decode failed: {err}")))
                .map(|envelope| envelope.result)
        })
    }
}

/// Retries transient failures with exponential backoff (250 ms base, ×2,
/// capped at 5 s, at most five attempts).
fn with_backoff<T>(mut call: impl FnMut() -> ChainResult<T>) -> ChainResult<T> {
    let mut delay = BACKOFF_BASE;
    let mut attempt = 1;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!(attempt, %err, "transient rpc failure, backing off");
                std::thread::sleep(delay);
                delay = (delay * 2).min(BACKOFF_CAP);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

impl ArchiveRpc for HttpArchiveRpc {
    fn block(&self, height: i64) -> ChainResult<ArchiveBlock> {
        let raw: RawBlockResult = self.get_json(&format!("/block?height={height}"))?;
        raw.block.try_into()
    }

    fn abci_query(&self, key: &[u8], height: i64, prove: bool) -> ChainResult<AbciQueryResult> {
        let query = format!(
            "/abci_query?path=%22/store/{MODULE_STORE_KEY}/key%22&data=0x{}&height={height}&prove={prove}",
            hex::encode(key)
        );
        let raw: RawAbciQueryResult = self.get_json(&query)?;
        raw.response.try_into()
    }
}

impl BlockResultsClient for HttpArchiveRpc {
    fn block_results(&self, height: i64) -> ChainResult<BlockResults> {
        let raw: RawBlockResultsResult =
            self.get_json(&format!("/block_results?height={height}"))?;
        Ok(BlockResults {
            txs_results: raw.txs_results.unwrap_or_default(),
        })
    }
}

// JSON shapes of the upstream RPC responses. Heights are decimal strings,
// digests are upper hex, signatures and query values are base64.

#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct RawBlockResult {
    block: RawBlock,
}

#[derive(Deserialize)]
struct RawBlock {
    header: RawHeader,
    last_commit: RawCommit,
}

#[derive(Deserialize)]
struct RawHeader {
    version: RawVersion,
    chain_id: String,
    height: String,
    time: DateTime<Utc>,
    last_block_id: RawBlockId,
    last_commit_hash: String,
    data_hash: String,
    validators_hash: String,
    next_validators_hash: String,
    consensus_hash: String,
    app_hash: String,
    last_results_hash: String,
    evidence_hash: String,
    proposer_address: String,
}

#[derive(Deserialize)]
struct RawVersion {
    block: String,
}

#[derive(Deserialize)]
struct RawBlockId {
    hash: String,
    parts: RawPartSetHeader,
}

#[derive(Deserialize)]
struct RawPartSetHeader {
    total: u32,
    hash: String,
}

#[derive(Deserialize)]
struct RawCommit {
    height: String,
    round: i64,
    block_id: RawBlockId,
    signatures: Vec<RawCommitSig>,
}

#[derive(Deserialize)]
struct RawCommitSig {
    validator_address: String,
    timestamp: DateTime<Utc>,
    signature: Option<String>,
}

#[derive(Deserialize)]
struct RawBlockResultsResult {
    txs_results: Option<Vec<TxResult>>,
}

#[derive(Deserialize)]
struct RawAbciQueryResult {
    response: RawAbciResponse,
}

#[derive(Deserialize)]
struct RawAbciResponse {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    log: String,
    value: Option<String>,
    #[serde(rename = "proofOps")]
    proof_ops: Option<RawProofOps>,
}

#[derive(Deserialize)]
struct RawProofOps {
    ops: Vec<RawProofOp>,
}

#[derive(Deserialize)]
struct RawProofOp {
    #[serde(rename = "type")]
    op_type: String,
    key: String,
    data: String,
}

fn parse_height(value: &str) -> ChainResult<i64> {
    value
        .parse::<i64>()
        .map_err(|err| ChainError::Internal(format!("invalid height encoding: {err}")))
}

impl From<RawBlockId> for BlockId {
    fn from(raw: RawBlockId) -> Self {
        BlockId {
            hash: raw.hash,
            part_set_header_total: i64::from(raw.parts.total),
            part_set_header_hash: raw.parts.hash,
        }
    }
}

impl TryFrom<RawBlock> for ArchiveBlock {
    type Error = ChainError;

    fn try_from(raw: RawBlock) -> ChainResult<Self> {
        let last_block_id: BlockId = raw.header.last_block_id.into();
        let header = BlockHeaderFull {
            version: parse_height(&raw.header.version.block)?,
            chain_id: raw.header.chain_id,
            height: parse_height(&raw.header.height)?,
            timestamp: raw.header.time,
            last_block_id: last_block_id.clone(),
            last_commit_hash: decode_hex(&raw.header.last_commit_hash)?,
            data_hash: decode_hex(&raw.header.data_hash)?,
            validators_hash: decode_hex(&raw.header.validators_hash)?,
            next_validators_hash: decode_hex(&raw.header.next_validators_hash)?,
            consensus_hash: decode_hex(&raw.header.consensus_hash)?,
            app_hash: decode_hex(&raw.header.app_hash)?,
            last_results_hash: decode_hex(&raw.header.last_results_hash)?,
            evidence_hash: decode_hex(&raw.header.evidence_hash)?,
            proposer_address: decode_hex(&raw.header.proposer_address)?,
        };

        let signatures = raw
            .last_commit
            .signatures
            .into_iter()
            .map(|signature| SignatureInfo {
                signature_base64: signature.signature.unwrap_or_default(),
                validator_address_hex: signature.validator_address,
                timestamp: signature.timestamp,
            })
            .collect();
        let last_commit = ValidatorsProof {
            block_height: parse_height(&raw.last_commit.height)?,
            round: raw.last_commit.round,
            block_id: last_block_id,
            signatures,
        };
        Ok(ArchiveBlock {
            header,
            last_commit,
        })
    }
}

impl TryFrom<RawAbciResponse> for AbciQueryResult {
    type Error = ChainError;

    fn try_from(raw: RawAbciResponse) -> ChainResult<Self> {
        if raw.code != 0 {
            return Err(ChainError::InvalidArgument(format!(
                "abci query failed with code {}: {}",
                raw.code, raw.log
            )));
        }
        let value = match raw.value {
            Some(encoded) if !encoded.is_empty() => decode_base64(&encoded)?,
            _ => Vec::new(),
        };
        let proof_ops = match raw.proof_ops {
            Some(raw_ops) => {
                let mut ops = Vec::with_capacity(raw_ops.ops.len());
                for op in raw_ops.ops {
                    ops.push(ProofOp {
                        op_type: op.op_type,
                        key: decode_base64(&op.key)?,
                        data: decode_base64(&op.data)?,
                    });
                }
                Some(ProofOps { ops })
            }
            None => None,
        };
        Ok(AbciQueryResult { value, proof_ops })
    }
}
