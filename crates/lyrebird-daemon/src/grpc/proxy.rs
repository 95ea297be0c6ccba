//! Raw-frame forwarding to an upstream gRPC server.

use bytes::Bytes;
use http::uri::PathAndQuery;
use tonic::transport::Endpoint;
use tonic::{Request, Status};

use crate::grpc::codec::RawCodec;

/// Forwards one request frame to the upstream at `url` and returns the
/// reply frame. Inbound call metadata is not forwarded; the upstream
/// sees a fresh client connection per call.
pub async fn forward_unary(
    url: &str,
    path: &str,
    frame: Bytes,
) -> Result<tonic::Response<Bytes>, Status> {
    let endpoint = Endpoint::from_shared(url.to_string())
        .map_err(|err| Status::internal(format!("bad proxy url {url}: {err}")))?;
    let channel = endpoint
        .connect()
        .await
        .map_err(|err| Status::unavailable(format!("can't reach upstream {url}: {err}")))?;
    let path = PathAndQuery::from_maybe_shared(path.to_string())
        .map_err(|err| Status::internal(format!("bad method path: {err}")))?;
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|err| Status::unavailable(format!("upstream {url} not ready: {err}")))?;
    grpc.unary(Request::new(frame), path, RawCodec).await
}
