use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::assembler::{
    populate_missing_proofs, CancelToken, HttpArchiveRpc, KeeperSubmitter,
};
use crate::errors::{ChainError, ChainResult};
use crate::keeper::Keeper;
use crate::types::SeedType;

/// Collaborator performing validation recovery and reward claims; the real
/// implementation talks to the chain through the transaction broker.
pub trait RecoveryHooks: Send + Sync {
    fn detect_missed_validations(&self, epoch_index: u64, seed: u64) -> ChainResult<usize>;
    fn claim_rewards(&self, epoch_index: u64, seed: u64) -> ChainResult<()>;
}

/// Stand-in hooks for deployments without a broker attached: detects
/// nothing and lets the claim succeed.
pub struct NoopRecovery;

impl RecoveryHooks for NoopRecovery {
    fn detect_missed_validations(&self, _epoch_index: u64, _seed: u64) -> ChainResult<usize> {
        Ok(0)
    }

    fn claim_rewards(&self, epoch_index: u64, seed: u64) -> ChainResult<()> {
        info!(epoch_index, seed, "claim forwarded without a broker");
        Ok(())
    }
}

#[derive(Clone)]
struct AppState {
    keeper: Arc<Keeper>,
    recovery: Arc<dyn RecoveryHooks>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    chain_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PopulateProofsRequest {
    archive_node_rpc_endpoint: String,
    #[serde(default)]
    start_from_epoch: u64,
}

#[derive(Serialize)]
struct PopulateProofsResponse {
    submitted_epochs: u64,
}

#[derive(Deserialize)]
struct ClaimRewardRecoverRequest {
    epoch_index: Option<u64>,
    #[serde(default)]
    force_claim: bool,
}

#[derive(Serialize)]
struct ClaimRewardRecoverResponse {
    success: bool,
    message: String,
    epoch_index: u64,
    missed_validations: usize,
    already_claimed: bool,
    claim_executed: bool,
}

pub async fn serve(
    keeper: Arc<Keeper>,
    recovery: Arc<dyn RecoveryHooks>,
    addr: SocketAddr,
) -> ChainResult<()> {
    let state = AppState { keeper, recovery };
    let router = Router::new()
        .route("/health", get(health))
        .route("/admin/populate-missing-proofs", post(populate_proofs))
        .route("/admin/claim-reward-recover", post(claim_reward_recover))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!(?addr, "admin server listening");
    axum::serve(listener, router)
        .await
        .map_err(|err| ChainError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        chain_id: state.keeper.chain_id().to_string(),
    })
}

async fn populate_proofs(
    State(state): State<AppState>,
    Json(request): Json<PopulateProofsRequest>,
) -> Result<Json<PopulateProofsResponse>, (StatusCode, Json<ErrorResponse>)> {
    if request.archive_node_rpc_endpoint.is_empty() {
        return Err(to_http_error(ChainError::InvalidArgument(
            "archiveNodeRpcEndpoint is required".into(),
        )));
    }

    let keeper = state.keeper.clone();
    let submitted = tokio::task::spawn_blocking(move || {
        let rpc = HttpArchiveRpc::new(&request.archive_node_rpc_endpoint)?;
        let current_epoch = keeper
            .store()
            .upcoming_epoch_index()?
            .ok_or_else(|| ChainError::NotFound("no epoch committed yet".into()))?;
        let submitter = KeeperSubmitter::new(keeper.clone());
        populate_missing_proofs(
            &rpc,
            &submitter,
            current_epoch,
            request.start_from_epoch,
            &CancelToken::new(),
        )
    })
    .await
    .map_err(|err| to_http_error(ChainError::Internal(format!("recovery task failed: {err}"))))?
    .map_err(|err| {
        error!(%err, "proof population failed");
        to_http_error(err)
    })?;

    Ok(Json(PopulateProofsResponse {
        submitted_epochs: submitted,
    }))
}

async fn claim_reward_recover(
    State(state): State<AppState>,
    Json(request): Json<ClaimRewardRecoverRequest>,
) -> Result<Json<ClaimRewardRecoverResponse>, (StatusCode, Json<ErrorResponse>)> {
    let store = state.keeper.store();
    let seed = store
        .get_active_seed(SeedType::Previous)
        .map_err(to_http_error)?
        .ok_or_else(|| {
            to_http_error(ChainError::NotFound(
                "no valid seed available for recovery".into(),
            ))
        })?;

    // Only the previous epoch can be recovered: that is the one the seed
    // still covers.
    if let Some(requested) = request.epoch_index {
        if requested != seed.epoch_index {
            return Err(to_http_error(ChainError::InvalidArgument(format!(
                "can only recover previous epoch {}",
                seed.epoch_index
            ))));
        }
    }

    let already_claimed = seed.claimed;
    if already_claimed && !request.force_claim {
        return Ok(Json(ClaimRewardRecoverResponse {
            success: false,
            message: "rewards already claimed for this epoch; use force_claim to override".into(),
            epoch_index: seed.epoch_index,
            missed_validations: 0,
            already_claimed: true,
            claim_executed: false,
        }));
    }

    info!(
        epoch_index = seed.epoch_index,
        seed = seed.seed,
        already_claimed,
        force_claim = request.force_claim,
        "starting manual validation recovery"
    );

    let missed = state
        .recovery
        .detect_missed_validations(seed.epoch_index, seed.seed)
        .map_err(to_http_error)?;

    state
        .recovery
        .claim_rewards(seed.epoch_index, seed.seed)
        .map_err(to_http_error)?;

    let mut batch = store.begin();
    batch
        .mark_seed_claimed(SeedType::Previous)
        .and_then(|_| batch.commit())
        .map_err(to_http_error)?;

    Ok(Json(ClaimRewardRecoverResponse {
        success: true,
        message: "manual claim reward recovery completed".into(),
        epoch_index: seed.epoch_index,
        missed_validations: missed,
        already_claimed,
        claim_executed: true,
    }))
}

fn to_http_error(err: ChainError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        ChainError::InvalidArgument(_) | ChainError::Config(_) => StatusCode::BAD_REQUEST,
        ChainError::NotFound(_) => StatusCode::NOT_FOUND,
        ChainError::Conflict(_) => StatusCode::CONFLICT,
        ChainError::VerificationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}
