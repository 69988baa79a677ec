//! Admin/Health Surface (C12), spec's ambient addition: a minimal `axum`
//! router exposing liveness, Prometheus metrics, session status, and the two
//! ingress stubs standing in for the relay pub/sub transport. Grounded in the
//! teacher's `main.rs` (`Router::new().route(...)` chaining, `TextEncoder`
//! metrics rendering) but built around a single owned `AdminState` rather
//! than the teacher's `static Lazy<...>` globals, since every handler here
//! already has a `GatewayHandles` clone to reach into instead.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Deserialize;

use crate::bootstrap::GatewayHandles;
use crate::domain::{SessionStatus, SessionType};
use crate::error::GatewayError;

/// Ceremony/vtxo/invoice counters, registered once against their own
/// `Registry` rather than the process-global default registry the
/// `prometheus` crate ships (so a test can build more than one `Metrics`
/// without fighting over a shared static).
pub struct Metrics {
    registry: Registry,
    pub ceremonies_started: IntCounter,
    pub ceremonies_completed: IntCounter,
    pub ceremonies_failed: IntCounter,
    pub vtxo_inventory: IntGaugeVec,
    pub invoices_created: IntCounter,
    pub invoices_paid: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ceremonies_started =
            IntCounter::with_opts(Opts::new("gateway_ceremonies_started_total", "Signing ceremonies started")).unwrap();
        let ceremonies_completed = IntCounter::with_opts(Opts::new(
            "gateway_ceremonies_completed_total",
            "Signing ceremonies completed",
        ))
        .unwrap();
        let ceremonies_failed =
            IntCounter::with_opts(Opts::new("gateway_ceremonies_failed_total", "Signing ceremonies failed")).unwrap();
        let vtxo_inventory = IntGaugeVec::new(
            Opts::new("gateway_vtxo_inventory", "Available vtxo count per asset"),
            &["asset_id"],
        )
        .unwrap();
        let invoices_created =
            IntCounter::with_opts(Opts::new("gateway_lightning_invoices_created_total", "Lightning invoices created")).unwrap();
        let invoices_paid =
            IntCounter::with_opts(Opts::new("gateway_lightning_invoices_paid_total", "Lightning invoices paid")).unwrap();

        registry.register(Box::new(ceremonies_started.clone())).ok();
        registry.register(Box::new(ceremonies_completed.clone())).ok();
        registry.register(Box::new(ceremonies_failed.clone())).ok();
        registry.register(Box::new(vtxo_inventory.clone())).ok();
        registry.register(Box::new(invoices_created.clone())).ok();
        registry.register(Box::new(invoices_paid.clone())).ok();

        Self {
            registry,
            ceremonies_started,
            ceremonies_completed,
            ceremonies_failed,
            vtxo_inventory,
            invoices_created,
            invoices_paid,
        }
    }

    fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).ok();
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AdminState {
    pub handles: GatewayHandles,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(handles: GatewayHandles, metrics: Arc<Metrics>) -> Router {
    let state = AdminState { handles, metrics };
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/status/session/:id", get(session_status))
        .route("/transport/intent", post(transport_intent))
        .route("/transport/signing-response", post(transport_signing_response))
        .with_state(state)
}

fn error_response(err: GatewayError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
        GatewayError::NotFound(_) | GatewayError::InvoiceNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::InsufficientFunds { .. }
        | GatewayError::InsufficientLightningBalance
        | GatewayError::NoAvailableVtxo { .. } => StatusCode::CONFLICT,
        GatewayError::SessionExpired { .. } | GatewayError::ChallengeExpired { .. } => StatusCode::GONE,
        GatewayError::InvalidTransition { .. } => StatusCode::CONFLICT,
        GatewayError::SigningCeremony { .. } | GatewayError::SigningTimeout(_) | GatewayError::PaymentFailed(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        GatewayError::RouteNotFound => StatusCode::NOT_FOUND,
        GatewayError::Adapter(_) => StatusCode::BAD_GATEWAY,
        GatewayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

/// `GET /health`: adapter health snapshot plus a store round-trip (listing
/// assets doesn't need to find any; it just needs sled to answer).
async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    let chain_ok = state.handles.chain.health().await;
    let lightning_ok = state.handles.lightning.health().await;
    let store_ok = state.handles.store.list_assets().is_ok();

    let healthy = chain_ok && lightning_ok && store_ok;
    let body = serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
        "chain_adapter": chain_ok,
        "lightning_adapter": lightning_ok,
        "store": store_ok,
    });
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    if let Ok(vtxos) = state.handles.store.list_vtxos() {
        let mut by_asset: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
        for v in vtxos {
            if v.is_pooled() {
                *by_asset.entry(v.asset_id).or_insert(0) += 1;
            }
        }
        for (asset_id, count) in by_asset {
            state.metrics.vtxo_inventory.with_label_values(&[&asset_id]).set(count);
        }
    }
    let headers = [(header::CONTENT_TYPE, "text/plain; version=0.0.4")];
    (headers, state.metrics.render())
}

async fn session_status(
    State(state): State<AdminState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.handles.orchestrator.ceremony_status(&session_id).await {
        Ok(status) => (StatusCode::OK, Json(serde_json::to_value(status).unwrap())).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// `POST /transport/intent`: the documented payload shape for the relay's
/// `session.intent` channel (spec §6) — deserializes it and hands straight
/// off to the Session Manager, exactly as a relay-subscriber callback would.
#[derive(Debug, Deserialize)]
struct IntentRequest {
    user_pubkey: String,
    session_type: SessionType,
    intent: serde_json::Value,
    context: Option<String>,
}

async fn transport_intent(
    State(state): State<AdminState>,
    Json(req): Json<IntentRequest>,
) -> impl IntoResponse {
    match state
        .handles
        .sessions
        .create_session(&req.user_pubkey, req.session_type, req.intent, req.context)
        .await
    {
        Ok(session) => (StatusCode::OK, Json(serde_json::to_value(&session).unwrap())).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// `POST /transport/signing-response`: the `session.signing_response`
/// channel payload. Validates the challenge response and, if the session's
/// now `awaiting_signature`, immediately drives the ceremony to completion
/// rather than requiring a second round trip.
#[derive(Debug, Deserialize)]
struct SigningResponseRequest {
    challenge_id: String,
    user_pubkey: String,
    signature: String,
    signature_data: Option<String>,
}

async fn transport_signing_response(
    State(state): State<AdminState>,
    Json(req): Json<SigningResponseRequest>,
) -> impl IntoResponse {
    let challenge = match state.handles.challenges.get_live_challenge(&req.challenge_id) {
        Ok(c) => c,
        Err(e) => return error_response(e).into_response(),
    };

    if let Err(e) = state
        .handles
        .challenges
        .validate_response(&req.challenge_id, &req.user_pubkey, &req.signature)
        .await
    {
        return error_response(e).into_response();
    }

    state.metrics.ceremonies_started.inc();
    let ceremony = state
        .handles
        .orchestrator
        .run_ceremony(&challenge.session_id, req.signature_data)
        .await;

    match ceremony {
        Ok(session) => {
            if session.status == SessionStatus::Completed {
                state.metrics.ceremonies_completed.inc();
            } else if session.status == SessionStatus::Failed {
                state.metrics.ceremonies_failed.inc();
            }
            (StatusCode::OK, Json(serde_json::to_value(&session).unwrap())).into_response()
        }
        Err(e) => {
            state.metrics.ceremonies_failed.inc();
            error_response(e).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::lightning::MockLightningAdapter;
    use crate::adapters::MockChainAdapter;
    use crate::config::GatewayConfig;
    use crate::store::LedgerStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_handles() -> GatewayHandles {
        let store = LedgerStore::open_temporary().unwrap();
        GatewayHandles::new_with_store(
            GatewayConfig::default(),
            store,
            Arc::new(MockChainAdapter::new()),
            Arc::new(MockLightningAdapter::new()),
        )
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = build_router(test_handles(), Arc::new(Metrics::new()));
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let router = build_router(test_handles(), Arc::new(Metrics::new()));
        let response = router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_for_unknown_session_is_not_found() {
        let router = build_router(test_handles(), Arc::new(Metrics::new()));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/status/session/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
