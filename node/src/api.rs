//! HTTP API for the Mosaic node

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use mosaic_consensus::{Metablock, ValidatorRecord, VoteReceipt};
use mosaic_core::{
    Address, BlockHeight, ErrorKind, Hash, MosaicError, Position, PublicKey, Signature,
    VoteSignature,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::runtime::{CommitteeView, CoreView, MetablockCommit, NodeRuntime};

/// API state containing node runtime
pub type ApiState = Arc<NodeRuntime>;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Failure of an API request
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid {0}")]
    BadRequest(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Mosaic(#[from] MosaicError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Mosaic(e) => error_status(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (status, Json(ApiResponse::<()>::err(self))).into_response()
    }
}

/// HTTP status of a state machine failure
pub fn error_status(error: &MosaicError) -> StatusCode {
    match error.kind() {
        ErrorKind::AccessControl => StatusCode::FORBIDDEN,
        ErrorKind::StateTransition | ErrorKind::Idempotency => StatusCode::CONFLICT,
        ErrorKind::InvariantViolation | ErrorKind::Crypto | ErrorKind::Config => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::Mismatch => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Storage | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::ok(data))))
}

fn parse_address(s: &str) -> Result<Address, ApiError> {
    Address::from_hex(s).map_err(|_| ApiError::BadRequest("address"))
}

fn parse_hash(s: &str) -> Result<Hash, ApiError> {
    Hash::from_hex(s).map_err(|_| ApiError::BadRequest("hash"))
}

/// Node status response
#[derive(Debug, Serialize)]
pub struct NodeStatusResponse {
    pub name: String,
    pub orchestrator: Address,
    pub block_height: BlockHeight,
    pub core: CoreView,
    pub committees: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockHeightRequest {
    pub block_height: BlockHeight,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidatorRequest {
    pub validator: Address,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReputationRequest {
    pub validator: Address,
    pub weight: u64,
}

/// Validator lookup response
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidatorResponse {
    pub record: ValidatorRecord,
    pub is_validator: bool,
    pub reputation: u64,
    pub vote: Option<Hash>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub proposal: Hash,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteRequest {
    pub proposal: Hash,
    pub public_key: PublicKey,
    pub signature: Signature,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCommitteeRequest {
    pub dislocation: Hash,
    pub proposal: Hash,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnterCommitteeRequest {
    pub validator: Address,
    /// Member to be seated in front of; computed by the node when absent
    #[serde(default)]
    pub further: Option<Address>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub candidate: Address,
}

/// Signature of a member authorizing a committee call
#[derive(Debug, Serialize, Deserialize)]
pub struct MemberRequest {
    pub public_key: PublicKey,
    pub signature: Signature,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SealedCommitRequest {
    pub sealed: Hash,
    pub public_key: PublicKey,
    pub signature: Signature,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevealRequest {
    pub position: Position,
    pub salt: Hash,
    pub public_key: PublicKey,
    pub signature: Signature,
}

fn vote_signature(public_key: PublicKey, signature: Signature) -> VoteSignature {
    VoteSignature {
        public_key,
        signature,
    }
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    let router = Router::new()
        // Health
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/height", post(observe_block_height))
        // Validators
        .route("/validators", get(get_validators))
        .route("/validators/join", post(join))
        .route("/validators/logout", post(logout))
        .route("/validators/:address", get(get_validator))
        .route("/reputation", post(set_reputation))
        // Metablocks and votes
        .route("/metablocks", post(propose_metablock))
        .route("/metablocks/open", post(open_metablock))
        .route("/metablocks/assert", post(assert_precommit))
        .route("/proposals/:proposal", get(get_proposal))
        .route("/votes", post(register_vote))
        .route("/votes/:validator", delete(remove_vote))
        .route("/kernels/:height", get(get_kernel))
        .route("/halt", post(halt))
        // Committees
        .route("/committees", get(get_committees).post(create_committee))
        .route("/committees/:proposal", get(get_committee))
        .route("/committees/:proposal/members", post(enter_committee))
        .route("/committees/:proposal/hint/:validator", get(get_hint))
        .route("/committees/:proposal/challenge", post(challenge_committee))
        .route("/committees/:proposal/cooldown", post(cooldown_committee))
        .route("/committees/:proposal/activate", post(activate_committee))
        .route("/committees/:proposal/commits", post(submit_sealed_commit))
        .route("/committees/:proposal/close", post(close_commit_phase))
        .route("/committees/:proposal/reveals", post(reveal_commit))
        .route(
            "/committees/:proposal/positions/:member",
            get(get_position),
        );

    let enable_cors = state.config().api.enable_cors;
    let router = router.with_state(state).layer(TraceLayer::new_for_http());
    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Node status
async fn status(State(runtime): State<ApiState>) -> ApiResult<NodeStatusResponse> {
    ok(NodeStatusResponse {
        name: runtime.config().name.clone(),
        orchestrator: runtime.orchestrator(),
        block_height: runtime.block_height(),
        core: runtime.core_view(),
        committees: runtime.committee_proposals().len(),
    })
}

async fn observe_block_height(
    State(runtime): State<ApiState>,
    Json(req): Json<BlockHeightRequest>,
) -> ApiResult<BlockHeight> {
    ok(runtime.observe_block_height(req.block_height)?)
}

// ---- Validators ----

async fn get_validators(State(runtime): State<ApiState>) -> ApiResult<Vec<ValidatorRecord>> {
    ok(runtime.validators())
}

async fn get_validator(
    State(runtime): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<ValidatorResponse> {
    let address = parse_address(&address)?;
    let record = runtime
        .validator_record(&address)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Validator {}", address)))?;
    ok(ValidatorResponse {
        record,
        is_validator: runtime.is_validator(&address),
        reputation: runtime.reputation_of(&address),
        vote: runtime.vote_of(&address),
    })
}

async fn join(
    State(runtime): State<ApiState>,
    Json(req): Json<ValidatorRequest>,
) -> ApiResult<CoreView> {
    runtime.join(req.validator).await?;
    info!("Validator {} joined", req.validator);
    ok(runtime.core_view())
}

async fn logout(
    State(runtime): State<ApiState>,
    Json(req): Json<ValidatorRequest>,
) -> ApiResult<CoreView> {
    runtime.logout(req.validator).await?;
    info!("Validator {} logged out", req.validator);
    ok(runtime.core_view())
}

async fn set_reputation(
    State(runtime): State<ApiState>,
    Json(req): Json<ReputationRequest>,
) -> ApiResult<u64> {
    runtime.set_reputation(req.validator, req.weight);
    ok(req.weight)
}

// ---- Metablocks and votes ----

async fn propose_metablock(
    State(runtime): State<ApiState>,
    Json(metablock): Json<Metablock>,
) -> ApiResult<ProposalResponse> {
    let proposal = runtime.propose_metablock(&metablock).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(ProposalResponse { proposal })),
    ))
}

async fn open_metablock(
    State(runtime): State<ApiState>,
    Json(commit): Json<MetablockCommit>,
) -> ApiResult<Hash> {
    ok(runtime.open_metablock(&commit).await?)
}

async fn assert_precommit(
    State(runtime): State<ApiState>,
    Json(metablock): Json<Metablock>,
) -> ApiResult<Hash> {
    ok(runtime.assert_precommit(&metablock)?)
}

async fn get_proposal(
    State(runtime): State<ApiState>,
    Path(proposal): Path<String>,
) -> ApiResult<mosaic_consensus::VoteCount> {
    let proposal = parse_hash(&proposal)?;
    let count = runtime
        .vote_count(&proposal)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Proposal {}", proposal)))?;
    ok(count)
}

async fn register_vote(
    State(runtime): State<ApiState>,
    Json(req): Json<VoteRequest>,
) -> ApiResult<VoteReceipt> {
    let signature = vote_signature(req.public_key, req.signature);
    ok(runtime.register_vote(req.proposal, &signature).await?)
}

async fn remove_vote(
    State(runtime): State<ApiState>,
    Path(validator): Path<String>,
) -> ApiResult<Option<Hash>> {
    let validator = parse_address(&validator)?;
    ok(runtime.remove_vote(validator).await?)
}

async fn get_kernel(
    State(runtime): State<ApiState>,
    Path(height): Path<BlockHeight>,
) -> ApiResult<Hash> {
    let kernel_hash = runtime
        .kernel_hash(height)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Kernel at height {}", height)))?;
    ok(kernel_hash)
}

async fn halt(State(runtime): State<ApiState>) -> ApiResult<CoreView> {
    runtime.halt().await?;
    warn!("Core halted");
    ok(runtime.core_view())
}

// ---- Committees ----

async fn get_committees(State(runtime): State<ApiState>) -> ApiResult<Vec<Hash>> {
    ok(runtime.committee_proposals())
}

async fn create_committee(
    State(runtime): State<ApiState>,
    Json(req): Json<CreateCommitteeRequest>,
) -> ApiResult<CommitteeView> {
    let view = runtime
        .create_committee(req.dislocation, req.proposal)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(view))))
}

async fn get_committee(
    State(runtime): State<ApiState>,
    Path(proposal): Path<String>,
) -> ApiResult<CommitteeView> {
    let proposal = parse_hash(&proposal)?;
    ok(runtime.committee_view(&proposal)?)
}

async fn enter_committee(
    State(runtime): State<ApiState>,
    Path(proposal): Path<String>,
    Json(req): Json<EnterCommitteeRequest>,
) -> ApiResult<Option<Address>> {
    let proposal = parse_hash(&proposal)?;
    ok(runtime
        .enter_committee(&proposal, req.validator, req.further)
        .await?)
}

async fn get_hint(
    State(runtime): State<ApiState>,
    Path((proposal, validator)): Path<(String, String)>,
) -> ApiResult<Option<Address>> {
    let proposal = parse_hash(&proposal)?;
    let validator = parse_address(&validator)?;
    ok(runtime.committee_hint(&proposal, &validator)?)
}

async fn challenge_committee(
    State(runtime): State<ApiState>,
    Path(proposal): Path<String>,
    Json(req): Json<ChallengeRequest>,
) -> ApiResult<CommitteeView> {
    let proposal = parse_hash(&proposal)?;
    runtime.challenge_committee(&proposal, req.candidate).await?;
    ok(runtime.committee_view(&proposal)?)
}

async fn cooldown_committee(
    State(runtime): State<ApiState>,
    Path(proposal): Path<String>,
    Json(req): Json<MemberRequest>,
) -> ApiResult<BlockHeight> {
    let proposal = parse_hash(&proposal)?;
    let signature = vote_signature(req.public_key, req.signature);
    ok(runtime.cooldown_committee(&proposal, &signature).await?)
}

async fn activate_committee(
    State(runtime): State<ApiState>,
    Path(proposal): Path<String>,
    Json(req): Json<MemberRequest>,
) -> ApiResult<BlockHeight> {
    let proposal = parse_hash(&proposal)?;
    let signature = vote_signature(req.public_key, req.signature);
    ok(runtime.activate_committee(&proposal, &signature).await?)
}

async fn submit_sealed_commit(
    State(runtime): State<ApiState>,
    Path(proposal): Path<String>,
    Json(req): Json<SealedCommitRequest>,
) -> ApiResult<CommitteeView> {
    let proposal = parse_hash(&proposal)?;
    let signature = vote_signature(req.public_key, req.signature);
    runtime
        .submit_sealed_commit(&proposal, req.sealed, &signature)
        .await?;
    ok(runtime.committee_view(&proposal)?)
}

async fn close_commit_phase(
    State(runtime): State<ApiState>,
    Path(proposal): Path<String>,
) -> ApiResult<BlockHeight> {
    let proposal = parse_hash(&proposal)?;
    ok(runtime.close_commit_phase(&proposal).await?)
}

async fn reveal_commit(
    State(runtime): State<ApiState>,
    Path(proposal): Path<String>,
    Json(req): Json<RevealRequest>,
) -> ApiResult<u64> {
    let proposal = parse_hash(&proposal)?;
    let signature = vote_signature(req.public_key, req.signature);
    ok(runtime
        .reveal_commit(&proposal, req.position, req.salt, &signature)
        .await?)
}

async fn get_position(
    State(runtime): State<ApiState>,
    Path((proposal, member)): Path<(String, String)>,
) -> ApiResult<Position> {
    let proposal = parse_hash(&proposal)?;
    let member = parse_address(&member)?;
    let position = runtime
        .committee_position(&proposal, &member)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Position of {}", member)))?;
    ok(position)
}

/// Start API server
pub async fn start_api_server(runtime: Arc<NodeRuntime>, listen_addr: &str) -> anyhow::Result<()> {
    let router = create_router(runtime);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("API server listening on {}", listen_addr);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::{create_test_runtime, metablock, validator_keys};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use mosaic_crypto::signing::sign_vote;
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    async fn send<T: DeserializeOwned>(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, ApiResponse<T>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn test_router() -> (Router, ApiState) {
        let runtime = Arc::new(create_test_runtime().await);
        (create_router(runtime.clone()), runtime)
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = test_router().await;
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_join_and_vote() {
        let (router, runtime) = test_router().await;
        let keys = validator_keys();
        for key in &keys {
            runtime.set_reputation(key.address(), 1);
            let (status, response) = send::<serde_json::Value>(
                &router,
                "POST",
                "/validators/join",
                Some(serde_json::json!({ "validator": key.address().to_hex() })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert!(response.success);
        }

        let metablock = metablock(&runtime);
        let (status, response) = send::<ProposalResponse>(
            &router,
            "POST",
            "/metablocks",
            Some(serde_json::to_value(&metablock).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let proposal = response.data.unwrap().proposal;

        let vote = sign_vote(&keys[0], &proposal);
        let body = serde_json::json!({
            "proposal": proposal.to_hex(),
            "public_key": vote.public_key.to_hex(),
            "signature": vote.signature.to_hex(),
        });
        let (status, response) =
            send::<VoteReceipt>(&router, "POST", "/votes", Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.data.unwrap().count, 1);

        // Replayed vote
        let (status, response) =
            send::<VoteReceipt>(&router, "POST", "/votes", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!response.success);

        let (status, response) = send::<mosaic_consensus::VoteCount>(
            &router,
            "GET",
            &format!("/proposals/{}", proposal.to_hex()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.data.unwrap().count, 1);

        let (status, response) = send::<ValidatorResponse>(
            &router,
            "GET",
            &format!("/validators/{}", keys[0].address().to_hex()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let validator = response.data.unwrap();
        assert!(validator.is_validator);
        assert_eq!(validator.vote, Some(proposal));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (router, runtime) = test_router().await;

        // Proposing before the core opened
        let (status, _) = send::<serde_json::Value>(
            &router,
            "POST",
            "/metablocks",
            Some(serde_json::to_value(metablock(&runtime)).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) =
            send::<serde_json::Value>(&router, "GET", "/validators/not-hex", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send::<serde_json::Value>(&router, "GET", "/kernels/7", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send::<serde_json::Value>(
            &router,
            "POST",
            "/metablocks/assert",
            Some(serde_json::to_value(metablock(&runtime)).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send::<serde_json::Value>(
            &router,
            "POST",
            "/validators/join",
            Some(serde_json::json!({ "validator": Address::ZERO.to_hex() })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_committee_routes() {
        let (router, _) = test_router().await;
        let proposal = Hash([8u8; 32]);
        let body = serde_json::json!({
            "dislocation": Hash([9u8; 32]).to_hex(),
            "proposal": proposal.to_hex(),
        });

        let (status, response) =
            send::<serde_json::Value>(&router, "POST", "/committees", Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(response.success);
        let (status, _) =
            send::<serde_json::Value>(&router, "POST", "/committees", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let member = validator_keys()[0].address();
        let uri = format!("/committees/{}/members", proposal.to_hex());
        let (status, _) = send::<Option<Address>>(
            &router,
            "POST",
            &uri,
            Some(serde_json::json!({ "validator": member.to_hex() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, response) = send::<serde_json::Value>(
            &router,
            "GET",
            &format!("/committees/{}", proposal.to_hex()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.data.unwrap()["members"][0], member.to_hex());

        // Position lookups before any reveal
        let (status, _) = send::<serde_json::Value>(
            &router,
            "GET",
            &format!("/committees/{}/positions/{}", proposal.to_hex(), member.to_hex()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&MosaicError::AccessControl("caller".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            error_status(&MosaicError::StateTransition("halted".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&MosaicError::InvariantViolation("zero".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&MosaicError::Idempotency("again".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&MosaicError::Mismatch("hash".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            error_status(&MosaicError::StorageError("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
