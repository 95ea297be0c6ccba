//! The catch-all gRPC service. Every request path is looked up in the
//! registry at call time, decoded with the method's compiled codec, and
//! answered from the stub store or proxied upstream.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::Bytes;
use prost::Message as _;
use prost_reflect::DynamicMessage;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::body::BoxBody;
use tonic::codegen::{BoxFuture, Service};
use tonic::server::{
    ClientStreamingService, Grpc, ServerStreamingService, StreamingService, UnaryService,
};
use tonic::Status;

use lyrebird_core::error::LyrebirdError;
use lyrebird_core::method::ConnectionType;
use lyrebird_core::render::RenderedResponse;
use lyrebird_core::schema::{self, MethodSchema};

use crate::dispatch;
use crate::grpc::codec::{DynamicCodec, RawCodec};
use crate::grpc::proxy;
use crate::registry::{MethodEntry, MethodTarget, MockState};
use crate::telemetry::Telemetry;

type ResponseStream = Pin<Box<dyn Stream<Item = Result<DynamicMessage, Status>> + Send>>;

/// Routes every inbound gRPC request through the method registry.
#[derive(Clone)]
pub struct MockGrpcService {
    state: MockState,
}

impl MockGrpcService {
    pub fn new(state: MockState) -> Self {
        Self { state }
    }
}

impl Service<http::Request<Body>> for MockGrpcService {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let state = self.state.clone();
        Box::pin(async move {
            let path = req.uri().path().to_string();
            let Some(entry) = state.registry.method_by_path(&path) else {
                state.telemetry.record_unknown_path();
                tracing::info!(path = %path, "no method description for path");
                return Ok(unimplemented_response());
            };
            state
                .telemetry
                .record_grpc_request(entry.method.connection_type.as_str());

            let response = match &entry.target {
                MethodTarget::Proxy { url, schema } => {
                    let adapter = ProxyUnary {
                        state,
                        entry: entry.clone(),
                        url: url.clone(),
                        schema: schema.clone(),
                    };
                    Grpc::new(RawCodec).unary(adapter, req).await
                }
                MethodTarget::Stubbed(schema) => {
                    serve_stubbed(state, entry.clone(), schema.clone(), req).await
                }
            };
            Ok(response.map(Body::new))
        })
    }
}

async fn serve_stubbed(
    state: MockState,
    entry: Arc<MethodEntry>,
    schema: MethodSchema,
    req: http::Request<Body>,
) -> http::Response<BoxBody> {
    let mut grpc = Grpc::new(DynamicCodec::server(&schema));
    match entry.method.connection_type {
        ConnectionType::Unary => {
            grpc.unary(UnaryMock { state, entry, schema }, req).await
        }
        ConnectionType::ServerStreaming => {
            grpc.server_streaming(ServerStreamMock { state, entry, schema }, req)
                .await
        }
        ConnectionType::ClientStreaming => {
            grpc.client_streaming(ClientStreamMock { state, entry, schema }, req)
                .await
        }
        ConnectionType::BidiStreaming => {
            grpc.streaming(BidiMock { state, entry, schema }, req).await
        }
    }
}

struct UnaryMock {
    state: MockState,
    entry: Arc<MethodEntry>,
    schema: MethodSchema,
}

impl UnaryService<DynamicMessage> for UnaryMock {
    type Response = DynamicMessage;
    type Future = BoxFuture<tonic::Response<DynamicMessage>, Status>;

    fn call(&mut self, request: tonic::Request<DynamicMessage>) -> Self::Future {
        let state = self.state.clone();
        let entry = self.entry.clone();
        let schema = self.schema.clone();
        Box::pin(async move {
            let rendered = dispatch::dispatch_message(&state, &entry, request.get_ref())
                .map_err(internal_status)?;
            single_reply(&schema, &rendered)
        })
    }
}

struct ServerStreamMock {
    state: MockState,
    entry: Arc<MethodEntry>,
    schema: MethodSchema,
}

impl ServerStreamingService<DynamicMessage> for ServerStreamMock {
    type Response = DynamicMessage;
    type ResponseStream = ResponseStream;
    type Future = BoxFuture<tonic::Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: tonic::Request<DynamicMessage>) -> Self::Future {
        let state = self.state.clone();
        let entry = self.entry.clone();
        let schema = self.schema.clone();
        Box::pin(async move {
            let rendered = dispatch::dispatch_message(&state, &entry, request.get_ref())
                .map_err(internal_status)?;
            Ok(tonic::Response::new(spawn_emitter(
                state.telemetry.clone(),
                entry.method.method_name.clone(),
                schema,
                rendered,
            )))
        })
    }
}

struct ClientStreamMock {
    state: MockState,
    entry: Arc<MethodEntry>,
    schema: MethodSchema,
}

impl ClientStreamingService<DynamicMessage> for ClientStreamMock {
    type Response = DynamicMessage;
    type Future = BoxFuture<tonic::Response<DynamicMessage>, Status>;

    fn call(&mut self, request: tonic::Request<tonic::Streaming<DynamicMessage>>) -> Self::Future {
        let state = self.state.clone();
        let entry = self.entry.clone();
        let schema = self.schema.clone();
        Box::pin(async move {
            let mut inbound = request.into_inner();
            let mut last = None;
            while let Some(message) = inbound.message().await? {
                last = Some(message);
            }
            // Matching runs against the final message of the stream; an
            // empty stream therefore can't match anything.
            let Some(message) = last else {
                return Err(internal_status(LyrebirdError::NoStubFound(
                    entry.method.method_name.clone(),
                )));
            };
            let rendered = dispatch::dispatch_message(&state, &entry, &message)
                .map_err(internal_status)?;
            single_reply(&schema, &rendered)
        })
    }
}

struct BidiMock {
    state: MockState,
    entry: Arc<MethodEntry>,
    schema: MethodSchema,
}

impl StreamingService<DynamicMessage> for BidiMock {
    type Response = DynamicMessage;
    type ResponseStream = ResponseStream;
    type Future = BoxFuture<tonic::Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: tonic::Request<tonic::Streaming<DynamicMessage>>) -> Self::Future {
        let state = self.state.clone();
        let entry = self.entry.clone();
        let schema = self.schema.clone();
        Box::pin(async move {
            let mut inbound = request.into_inner();
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                // Each inbound message is matched and answered on its
                // own. After a failed turn the inbound side is drained
                // so the client can finish sending, then the status is
                // surfaced once.
                let mut failure: Option<Status> = None;
                loop {
                    match inbound.message().await {
                        Ok(Some(message)) => {
                            if failure.is_some() {
                                continue;
                            }
                            match dispatch::dispatch_message(&state, &entry, &message) {
                                Ok(rendered) => {
                                    let delay = rendered.delay;
                                    for value in rendered.messages {
                                        if let Some(pause) = delay {
                                            tokio::time::sleep(pause).await;
                                        }
                                        match schema::value_to_message(
                                            schema.response.clone(),
                                            &value,
                                        ) {
                                            Ok(reply) => {
                                                if tx.send(Ok(reply)).await.is_err() {
                                                    return;
                                                }
                                                state.telemetry.record_stream_message(
                                                    &entry.method.method_name,
                                                );
                                            }
                                            Err(err) => {
                                                failure = Some(internal_status(err));
                                                break;
                                            }
                                        }
                                    }
                                }
                                Err(err) => failure = Some(internal_status(err)),
                            }
                        }
                        Ok(None) => break,
                        Err(status) => {
                            failure.get_or_insert(status);
                            break;
                        }
                    }
                }
                if let Some(status) = failure {
                    let _ = tx.send(Err(status)).await;
                }
            });
            Ok(tonic::Response::new(
                Box::pin(ReceiverStream::new(rx)) as ResponseStream
            ))
        })
    }
}

struct ProxyUnary {
    state: MockState,
    entry: Arc<MethodEntry>,
    url: String,
    schema: Option<MethodSchema>,
}

impl UnaryService<Bytes> for ProxyUnary {
    type Response = Bytes;
    type Future = BoxFuture<tonic::Response<Bytes>, Status>;

    fn call(&mut self, request: tonic::Request<Bytes>) -> Self::Future {
        let state = self.state.clone();
        let entry = self.entry.clone();
        let url = self.url.clone();
        let schema = self.schema.clone();
        Box::pin(async move {
            let frame = request.into_inner();
            // With codecs on the description, local stubs get first
            // refusal. Only a miss falls through to the upstream.
            if let Some(schema) = &schema {
                let message = DynamicMessage::decode(schema.request.clone(), frame.clone())
                    .map_err(|err| Status::internal(format!("can't decode request: {err}")))?;
                match dispatch::dispatch_message(&state, &entry, &message) {
                    Ok(rendered) => {
                        let reply = single_reply(schema, &rendered)?;
                        return Ok(reply.map(|m| Bytes::from(m.encode_to_vec())));
                    }
                    Err(LyrebirdError::NoStubFound(_)) => {}
                    Err(err) => return Err(internal_status(err)),
                }
            }
            state.telemetry.record_proxied_call(&entry.method.method_name);
            tracing::info!(
                method = %entry.method.method_name,
                upstream = %url,
                "forwarding to upstream"
            );
            proxy::forward_unary(&url, &entry.method.grpc_path(), frame).await
        })
    }
}

/// Emits each rendered message on its own channel send, pausing for the
/// stub's delay in between. Sends that land are counted per method.
fn spawn_emitter(
    telemetry: Arc<Telemetry>,
    method: String,
    schema: MethodSchema,
    rendered: RenderedResponse,
) -> ResponseStream {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let delay = rendered.delay;
        for value in rendered.messages {
            if let Some(pause) = delay {
                tokio::time::sleep(pause).await;
            }
            match schema::value_to_message(schema.response.clone(), &value) {
                Ok(reply) => {
                    if tx.send(Ok(reply)).await.is_err() {
                        break;
                    }
                    telemetry.record_stream_message(&method);
                }
                Err(err) => {
                    let _ = tx.send(Err(internal_status(err))).await;
                    break;
                }
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

fn single_reply(
    schema: &MethodSchema,
    rendered: &RenderedResponse,
) -> Result<tonic::Response<DynamicMessage>, Status> {
    let value = rendered
        .messages
        .first()
        .ok_or_else(|| Status::internal("fill response rendered no message"))?;
    let reply =
        schema::value_to_message(schema.response.clone(), value).map_err(internal_status)?;
    Ok(tonic::Response::new(reply))
}

fn internal_status(err: LyrebirdError) -> Status {
    Status::internal(err.to_string())
}

/// Trailers-only reply for paths no method description claims.
fn unimplemented_response() -> http::Response<Body> {
    let mut response = http::Response::new(Body::empty());
    response
        .headers_mut()
        .insert("grpc-status", http::HeaderValue::from_static("12"));
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/grpc"),
    );
    response
}
