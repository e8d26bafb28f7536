//! ABCI merkle-proof verification.
//!
//! A stored value is proven in two steps: an IAVL existence proof from the
//! key/value pair up to the module store root, then a simple-merkle
//! commitment from the store name up to the app hash.

use ics23::commitment_proof::Proof;
use ics23::{
    calculate_existence_root, iavl_spec, tendermint_spec, verify_membership, CommitmentProof,
    ExistenceProof, HostFunctionsManager, ProofSpec,
};
use percent_encoding::{percent_decode_str, percent_encode, NON_ALPHANUMERIC};
use prost::Message;

use crate::errors::{ChainError, ChainResult};
use crate::types::{ProofOp, ProofOps};

pub const PROOF_OP_IAVL: &str = "ics23:iavl";
pub const PROOF_OP_MULTISTORE: &str = "ics23:simple";

/// Verifies a two-op proof for `(key, value)` under `store` against
/// `app_hash`. The key is raw binary and is never transformed.
pub fn verify_proof_ops(
    ops: &ProofOps,
    app_hash: &[u8],
    store: &str,
    key: &[u8],
    value: &[u8],
) -> ChainResult<()> {
    if ops.ops.len() != 2 {
        return Err(ChainError::InvalidArgument(format!(
            "expected 2 proof ops, got {}",
            ops.ops.len()
        )));
    }

    let store_root = apply_op(&ops.ops[0], PROOF_OP_IAVL, &iavl_spec(), key, value)?;
    let computed_app_hash = apply_op(
        &ops.ops[1],
        PROOF_OP_MULTISTORE,
        &tendermint_spec(),
        store.as_bytes(),
        &store_root,
    )?;

    if computed_app_hash != app_hash {
        return Err(ChainError::VerificationFailed(
            "merkle root does not match app hash".into(),
        ));
    }
    Ok(())
}

/// Legacy entry point taking a pre-percent-encoded `/{store}/{key}` path.
/// Produces the same verdict as [`verify_proof_ops`] for every input.
pub fn verify_proof_ops_with_path(
    ops: &ProofOps,
    app_hash: &[u8],
    path: &str,
    value: &[u8],
) -> ChainResult<()> {
    let (store, key) = split_store_path(path)?;
    verify_proof_ops(ops, app_hash, &store, &key, value)
}

/// Builds the percent-encoded query path for a raw store key.
pub fn store_query_path(store: &str, key: &[u8]) -> String {
    format!("/{store}/{}", percent_encode(key, NON_ALPHANUMERIC))
}

fn split_store_path(path: &str) -> ChainResult<(String, Vec<u8>)> {
    let trimmed = path.strip_prefix('/').ok_or_else(|| {
        ChainError::InvalidArgument("store path must start with '/'".into())
    })?;
    let (store, encoded_key) = trimmed.split_once('/').ok_or_else(|| {
        ChainError::InvalidArgument("store path must be /{store}/{key}".into())
    })?;
    if store.is_empty() || encoded_key.is_empty() {
        return Err(ChainError::InvalidArgument(
            "store path must be /{store}/{key}".into(),
        ));
    }
    let key = percent_decode_str(encoded_key).collect::<Vec<u8>>();
    Ok((store.to_string(), key))
}

/// Applies one commitment op: checks the embedded existence proof matches
/// `(key, value)`, then returns the root it commits to.
fn apply_op(
    op: &ProofOp,
    expected_type: &str,
    spec: &ProofSpec,
    key: &[u8],
    value: &[u8],
) -> ChainResult<Vec<u8>> {
    if op.op_type != expected_type {
        return Err(ChainError::InvalidArgument(format!(
            "unexpected proof op type {}, want {expected_type}",
            op.op_type
        )));
    }
    if op.key != key {
        return Err(ChainError::VerificationFailed(format!(
            "proof op key mismatch for {expected_type}"
        )));
    }

    let proof = CommitmentProof::decode(op.data.as_slice())
        .map_err(|err| ChainError::Internal(format!("malformed commitment proof: {err}")))?;
    let existence = existence_proof(&proof)?;
    if existence.key != key || existence.value != value {
        return Err(ChainError::VerificationFailed(format!(
            "existence proof does not cover the queried entry for {expected_type}"
        )));
    }

    let root = calculate_existence_root::<HostFunctionsManager>(existence)
        .map_err(|err| ChainError::VerificationFailed(format!("invalid existence proof: {err}")))?;
    if !verify_membership::<HostFunctionsManager>(&proof, spec, &root, key, value) {
        return Err(ChainError::VerificationFailed(format!(
            "membership verification failed for {expected_type}"
        )));
    }
    Ok(root)
}

fn existence_proof(proof: &CommitmentProof) -> ChainResult<&ExistenceProof> {
    match &proof.proof {
        Some(Proof::Exist(existence)) => Ok(existence),
        _ => Err(ChainError::VerificationFailed(
            "commitment proof is not an existence proof".into(),
        )),
    }
}
