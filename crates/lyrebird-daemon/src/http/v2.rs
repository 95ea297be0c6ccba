//! The legacy management surface. Stubs carry their method registration
//! inline; reads and deletes go through the v4 handlers since both
//! generations share one store.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use lyrebird_core::method::Service;
use lyrebird_core::predicate::PredicateSet;
use lyrebird_core::stub::{ResponseSpec, Stub, StubScope};

use crate::http::{v4, HttpErr};
use crate::registry::{unix_now, MockState};

pub fn routes() -> Router<MockState> {
    Router::new()
        .route("/v2/service", post(upsert_service))
        .route("/v2/grpcStub", post(create_stub).get(v4::list_stubs))
        .route(
            "/v2/grpcStub/:id",
            get(v4::get_stub).delete(v4::delete_stub),
        )
}

async fn upsert_service(
    State(state): State<MockState>,
    Json(service): Json<Service>,
) -> impl IntoResponse {
    let service = state.registry.upsert_service(service);
    tracing::info!(name = %service.name, suffix = %service.suffix, "service registered");
    (StatusCode::OK, Json(service))
}

/// One-shot registration: the stub plus the unary method it rides on.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V2StubRequest {
    service: String,
    method_name: String,
    request_class: String,
    response_class: String,
    request_codecs: String,
    response_codecs: String,
    name: String,
    #[serde(default)]
    labels: Vec<String>,
    scope: StubScope,
    #[serde(default)]
    times: Option<u32>,
    #[serde(default)]
    request_predicates: PredicateSet,
    response: ResponseSpec,
    #[serde(default)]
    state: Option<Value>,
    #[serde(default)]
    seed: Option<Value>,
    #[serde(default)]
    persist: Option<Value>,
}

async fn create_stub(
    State(state): State<MockState>,
    Json(req): Json<V2StubRequest>,
) -> Result<impl IntoResponse, HttpErr> {
    let entry = state
        .registry
        .ensure_unary_method(
            &req.service,
            &req.method_name,
            &req.request_class,
            &req.response_class,
            &req.request_codecs,
            &req.response_codecs,
        )
        .map_err(HttpErr::bad_request)?;
    let stub = Stub {
        id: Uuid::new_v4().to_string(),
        method_description_id: entry.method.id.clone(),
        name: req.name,
        scope: req.scope,
        times: req.times,
        response: req.response,
        request_predicates: req.request_predicates,
        state: req.state,
        seed: req.seed,
        persist: req.persist,
        labels: req.labels,
        created: unix_now(),
    };
    let slot = state
        .registry
        .create_stub(stub)
        .map_err(HttpErr::bad_request)?;
    state.telemetry.record_stub_created(&entry.method.method_name);
    tracing::info!(
        id = %slot.stub().id,
        method = %entry.method.method_name,
        "legacy stub stored"
    );
    Ok((StatusCode::OK, Json(slot.stub().clone())))
}
