//! Management API: the legacy v2 surface and the v4 surface behind one
//! router, sharing the same registry and stub store.

pub mod v2;
pub mod v4;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use lyrebird_core::error::LyrebirdError;

use crate::registry::MockState;

pub fn router(state: MockState, max_body_bytes: usize) -> Router {
    Router::new()
        .merge(v2::routes())
        .merge(v4::routes())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    listener: tokio::net::TcpListener,
    state: MockState,
    max_body_bytes: usize,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state, max_body_bytes))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Management API failure: non-200 status plus `{"error": "..."}`.
#[derive(Debug)]
pub struct HttpErr {
    status: StatusCode,
    message: String,
}

impl HttpErr {
    pub(crate) fn bad_request(err: LyrebirdError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: err.to_string(),
        }
    }

    pub(crate) fn not_found(err: LyrebirdError) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for HttpErr {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
