//! Route-level tests driven through the full router, in-process store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use tallyd_core::pipeline::traits::{
    OwnershipOracle, ProvingEngine, SignatureVerifier, SignerClient, SignerProvider,
};
use tallyd_core::{
    CoordinatorError, Ingestor, MemoryRegistryStore, PollRegistry, ProofPipeline,
    RegistryStore, Result as CoreResult, Scheduler,
};
use tallyd_model::{
    GenerationProgress, Proof, ProofSessionRequest, SupportedChain, TallyArtifact,
    VotingMode,
};
use tallyd_server::config::Config;
use tallyd_server::routes;
use tallyd_server::state::AppState;

const SECRET: &str = "s3cret";
const OPERATOR_KEY: &str = "macipk.operator";

struct IdleEngine;

#[async_trait]
impl ProvingEngine for IdleEngine {
    async fn merge(
        &self,
        _request: &ProofSessionRequest,
        _signer: &dyn SignerClient,
    ) -> CoreResult<()> {
        Err(CoordinatorError::Engine("not wired in route tests".into()))
    }

    async fn generate(
        &self,
        _request: &ProofSessionRequest,
        _voting_mode: VotingMode,
        _progress: mpsc::Sender<GenerationProgress>,
    ) -> CoreResult<(Vec<Proof>, Option<TallyArtifact>)> {
        Err(CoordinatorError::Engine("not wired in route tests".into()))
    }

    async fn submit(
        &self,
        _request: &ProofSessionRequest,
        _signer: &dyn SignerClient,
        _tally: &TallyArtifact,
    ) -> CoreResult<TallyArtifact> {
        Err(CoordinatorError::Engine("not wired in route tests".into()))
    }
}

struct IdleSigner;

#[async_trait]
impl SignerProvider for IdleSigner {
    async fn create_client(
        &self,
        session_key_address: &str,
        _approval: &str,
        _chain: SupportedChain,
    ) -> CoreResult<Arc<dyn SignerClient>> {
        Err(CoordinatorError::SessionKeyNotFound(
            session_key_address.to_string(),
        ))
    }
}

struct StaticOracle;

#[async_trait]
impl OwnershipOracle for StaticOracle {
    async fn fetch_poll_owner(
        &self,
        _poll_id: &str,
        _chain: SupportedChain,
    ) -> CoreResult<String> {
        Ok("0xowner".into())
    }
}

struct StaticVerifier {
    recovered: &'static str,
}

#[async_trait]
impl SignatureVerifier for StaticVerifier {
    async fn recover_signer(&self, _digest: &str, _signature: &str) -> CoreResult<String> {
        Ok(self.recovered.into())
    }
}

fn test_config() -> Config {
    Config {
        server_host: "127.0.0.1".into(),
        server_port: 0,
        dev_mode: true,
        redis_url: "redis://unused".into(),
        namespace: "test".into(),
        max_retries: 3,
        lease_ttl: Duration::from_secs(900),
        scheduler_interval: Duration::from_secs(60),
        pipeline_timeout: Duration::from_secs(600),
        max_concurrent_pipelines: 2,
        coordinator_public_key: OPERATOR_KEY.into(),
        session_key_address: "0xsession".into(),
        session_key_approval: "approval".into(),
        webhook_secret_header: "x-webhook-secret".into(),
        webhook_secret_value: SECRET.into(),
        proving_engine_url: "http://unused".into(),
        signer_service_url: "http://unused".into(),
        subgraph_project_id: "unused".into(),
        subgraph_version: "v1".into(),
        allowed_origins: Vec::new(),
    }
}

fn app(verifier_recovers: &'static str) -> Router {
    let config = Arc::new(test_config());
    let store: Arc<dyn RegistryStore> = Arc::new(MemoryRegistryStore::new());
    let registry = Arc::new(PollRegistry::new(
        store,
        config.namespace.clone(),
        config.max_retries,
    ));
    let pipeline = Arc::new(ProofPipeline::new(
        Arc::clone(&registry),
        Arc::new(IdleEngine),
        Arc::new(IdleSigner),
    ));
    let ingestor = Arc::new(Ingestor::new(Arc::clone(&registry), OPERATOR_KEY.into()));
    let scheduler = Scheduler::new(
        Arc::clone(&registry),
        Arc::clone(&pipeline),
        config.coordinator_settings(),
    );

    routes::router(AppState {
        config,
        registry,
        ingestor,
        pipeline,
        scheduler,
        oracle: Arc::new(StaticOracle),
        verifier: Arc::new(StaticVerifier {
            recovered: verifier_recovers,
        }),
    })
}

fn poll_created_body() -> Value {
    json!({
        "id": "whk_1",
        "transactionHash": "0xdeadbeef",
        "blockNumber": 4242,
        "blockTimestamp": 1699990000,
        "logIndex": 3,
        "address": "0xaaa",
        "eventSignature": "PollCreated",
        "chainId": 11155420,
        "chain": "optimism-sepolia",
        "eventParams": ["7", OPERATOR_KEY, "p2", "1700000000", "p4", "0", "p6", "p7", "p8", "p9"],
    })
}

fn webhook_request(body: &Value, secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/webhook/goldsky/poll-created")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(secret) = secret {
        builder = builder.header("x-webhook-secret", secret);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let response = app("0xowner")
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn poll_created_with_secret_registers() {
    let response = app("0xowner")
        .oneshot(webhook_request(&poll_created_body(), Some(SECRET)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "true");
}

#[tokio::test]
async fn poll_created_without_secret_is_unauthorized() {
    let response = app("0xowner")
        .oneshot(webhook_request(&poll_created_body(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn duplicate_delivery_still_acknowledges() {
    let app = app("0xowner");

    let first = app
        .clone()
        .oneshot(webhook_request(&poll_created_body(), Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(webhook_request(&poll_created_body(), Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_text(second).await, "true");
}

#[tokio::test]
async fn unsubscribed_signature_is_not_acknowledged() {
    let mut body = poll_created_body();
    body["eventSignature"] = json!("MessagePublished");

    let response = app("0xowner")
        .oneshot(webhook_request(&body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "false");
}

#[tokio::test]
async fn short_param_vector_is_a_bad_request() {
    let mut body = poll_created_body();
    body["eventParams"].as_array_mut().unwrap().pop();

    let response = app("0xowner")
        .oneshot(webhook_request(&body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsupported_chain_is_a_bad_request() {
    let mut body = poll_created_body();
    body["chainId"] = json!(31337);

    let response = app("0xowner")
        .oneshot(webhook_request(&body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn foreign_coordinator_key_is_forbidden() {
    let mut body = poll_created_body();
    body["eventParams"][1] = json!("macipk.other");

    let response = app("0xowner")
        .oneshot(webhook_request(&body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn webhook_health_is_public() {
    let response = app("0xowner")
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/webhook/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn proof_session_rejects_a_foreign_signer_before_upgrading() {
    let response = app("0xintruder")
        .oneshot(
            Request::builder()
                .uri("/v1/proof/ws")
                .header(header::CONNECTION, "upgrade")
                .header(header::UPGRADE, "websocket")
                .header(header::SEC_WEBSOCKET_VERSION, "13")
                .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
                .header(
                    header::AUTHORIZATION,
                    "Bearer 7 optimism_sepolia 0xsig",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
