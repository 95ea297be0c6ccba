//! gRPC serving plane: the catch-all service, its dynamic codecs, and
//! upstream forwarding.

pub mod codec;
pub mod proxy;
pub mod service;

use std::future::Future;
use std::io;

use axum::Router;
use tokio::net::TcpListener;

use crate::registry::MockState;

use self::service::MockGrpcService;

/// Serves the mock gRPC surface on `listener` until `shutdown` resolves.
///
/// The listener speaks h2c: plaintext clients connect with HTTP/2 prior
/// knowledge, which is what gRPC clients given an `http://` target do.
pub async fn serve(
    listener: TcpListener,
    state: MockState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    let router = Router::new().fallback_service(MockGrpcService::new(state));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
