//! The v4 management surface: method descriptions and the stubs that
//! reference them as separate resources.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use lyrebird_core::error::LyrebirdError;
use lyrebird_core::method::{ConnectionType, MethodDescription};
use lyrebird_core::predicate::PredicateSet;
use lyrebird_core::stub::{ResponseSpec, Stub, StubScope};

use crate::http::HttpErr;
use crate::registry::{unix_now, MockState};

pub fn routes() -> Router<MockState> {
    Router::new()
        .route(
            "/v4/grpcMethodDescription",
            post(create_method).get(list_methods),
        )
        .route(
            "/v4/grpcMethodDescription/:id",
            get(get_method).delete(delete_method),
        )
        .route("/v4/grpcStub", post(create_stub).get(list_stubs))
        .route("/v4/grpcStub/:id", get(get_stub).delete(delete_stub))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptionRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    service: String,
    method_name: String,
    connection_type: ConnectionType,
    #[serde(default)]
    proxy_url: Option<String>,
    #[serde(default)]
    request_class: String,
    #[serde(default)]
    response_class: String,
    #[serde(default)]
    request_codecs: String,
    #[serde(default)]
    response_codecs: String,
}

impl MethodDescriptionRequest {
    fn into_description(self) -> MethodDescription {
        MethodDescription {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            description: self.description,
            service: self.service,
            method_name: self.method_name,
            connection_type: self.connection_type,
            proxy_url: self.proxy_url,
            request_class: self.request_class,
            response_class: self.response_class,
            request_codecs: self.request_codecs,
            response_codecs: self.response_codecs,
            created: unix_now(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StubRequest {
    method_description_id: String,
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

impl StubRequest {
    fn into_stub(self) -> Stub {
        Stub {
            id: Uuid::new_v4().to_string(),
            method_description_id: self.method_description_id,
            name: self.name,
            scope: self.scope,
            times: self.times,
            response: self.response,
            request_predicates: self.request_predicates,
            state: self.state,
            seed: self.seed,
            persist: self.persist,
            labels: self.labels,
            created: unix_now(),
        }
    }
}

async fn create_method(
    State(state): State<MockState>,
    Json(req): Json<MethodDescriptionRequest>,
) -> Result<impl IntoResponse, HttpErr> {
    let entry = state
        .registry
        .register_method(req.into_description())
        .map_err(HttpErr::bad_request)?;
    tracing::info!(
        id = %entry.method.id,
        method = %entry.method.method_name,
        connection = %entry.method.connection_type.as_str(),
        "method description registered"
    );
    Ok((StatusCode::OK, Json(entry.method.clone())))
}

#[derive(Debug, Deserialize)]
struct MethodFilter {
    service: Option<String>,
}

async fn list_methods(
    State(state): State<MockState>,
    Query(filter): Query<MethodFilter>,
) -> impl IntoResponse {
    let methods: Vec<MethodDescription> = state
        .registry
        .list_methods(filter.service.as_deref())
        .into_iter()
        .map(|entry| entry.method.clone())
        .collect();
    (StatusCode::OK, Json(methods))
}

async fn get_method(
    State(state): State<MockState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HttpErr> {
    let entry = state
        .registry
        .method_by_id(&id)
        .ok_or_else(|| HttpErr::not_found(LyrebirdError::MethodNotFound(id.clone())))?;
    Ok((StatusCode::OK, Json(entry.method.clone())))
}

async fn delete_method(
    State(state): State<MockState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HttpErr> {
    let entry = state.registry.remove_method(&id).map_err(|err| match err {
        LyrebirdError::MethodNotFound(_) => HttpErr::not_found(err),
        other => HttpErr::bad_request(other),
    })?;
    tracing::info!(id = %id, method = %entry.method.method_name, "method description removed");
    Ok((StatusCode::OK, Json(entry.method.clone())))
}

async fn create_stub(
    State(state): State<MockState>,
    Json(req): Json<StubRequest>,
) -> Result<impl IntoResponse, HttpErr> {
    let slot = state
        .registry
        .create_stub(req.into_stub())
        .map_err(HttpErr::bad_request)?;
    if let Some(entry) = state.registry.method_by_id(&slot.stub().method_description_id) {
        state.telemetry.record_stub_created(&entry.method.method_name);
    }
    tracing::info!(
        id = %slot.stub().id,
        method_description = %slot.stub().method_description_id,
        scope = ?slot.stub().scope,
        "stub stored"
    );
    Ok((StatusCode::OK, Json(slot.stub().clone())))
}

#[derive(Debug, Deserialize)]
pub(crate) struct StubFilter {
    query: Option<String>,
}

pub(crate) async fn list_stubs(
    State(state): State<MockState>,
    Query(filter): Query<StubFilter>,
) -> impl IntoResponse {
    let stubs: Vec<Stub> = state
        .registry
        .stubs
        .all()
        .into_iter()
        .filter(|slot| {
            filter
                .query
                .as_deref()
                .map_or(true, |q| matches_query(slot.stub(), q))
        })
        .map(|slot| slot.stub().clone())
        .collect();
    (StatusCode::OK, Json(stubs))
}

/// A stub matches `q` on its method description id, a name fragment, or
/// an exact label.
fn matches_query(stub: &Stub, q: &str) -> bool {
    stub.method_description_id == q
        || stub.name.contains(q)
        || stub.labels.iter().any(|label| label == q)
}

pub(crate) async fn get_stub(
    State(state): State<MockState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HttpErr> {
    let slot = state
        .registry
        .stubs
        .get(&id)
        .ok_or_else(|| HttpErr::not_found(LyrebirdError::StubNotFound(id.clone())))?;
    Ok((StatusCode::OK, Json(slot.stub().clone())))
}

pub(crate) async fn delete_stub(
    State(state): State<MockState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HttpErr> {
    let slot = state
        .registry
        .stubs
        .remove(&id)
        .ok_or_else(|| HttpErr::not_found(LyrebirdError::StubNotFound(id.clone())))?;
    tracing::info!(id = %id, "stub removed");
    Ok((StatusCode::OK, Json(slot.stub().clone())))
}

#[cfg(test)]
mod tests {
    use super::matches_query;
    use lyrebird_core::predicate::PredicateSet;
    use lyrebird_core::stub::{ResponseMode, ResponseSpec, Stub, StubScope};

    fn stub() -> Stub {
        Stub {
            id: "s-1".to_string(),
            method_description_id: "md-1".to_string(),
            name: "prices happy path".to_string(),
            scope: StubScope::Persistent,
            times: None,
            response: ResponseSpec {
                mode: ResponseMode::Fill,
                data: Some(serde_json::json!({})),
                repeats: None,
                stream_delay: None,
            },
            request_predicates: PredicateSet::new(),
            state: None,
            seed: None,
            persist: None,
            labels: vec!["smoke".to_string()],
            created: 0,
        }
    }

    #[test]
    fn query_matches_method_id_name_fragment_and_label() {
        let stub = stub();
        assert!(matches_query(&stub, "md-1"));
        assert!(matches_query(&stub, "happy"));
        assert!(matches_query(&stub, "smoke"));
        assert!(!matches_query(&stub, "md-2"));
        assert!(!matches_query(&stub, "smok"));
    }
}
