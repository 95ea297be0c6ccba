use std::net::SocketAddr;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use http::uri::PathAndQuery;
use lyrebird_core::method::{ConnectionType, MethodDescription};
use lyrebird_core::schema::{self, MethodSchema};
use lyrebird_daemon::grpc::codec::DynamicCodec;
use lyrebird_daemon::http as management;
use lyrebird_daemon::{grpc, MockState};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tonic::transport::Endpoint;
use tonic::Code;

const PRICES_METHOD: &str = "market_data.OTCMarketDataService/PricesUnary";

const TEST_PROTO: &str = r#"
syntax = "proto3";

package market_data;

service OTCMarketDataService {
  rpc PricesUnary(PricesRequest) returns (PricesResponse);
}

message PricesRequest {
  string instrument_id = 1;
  string instrument_id_kind = 2;
}

message PricesResponse {
  string code = 1;
  string instrument_id = 2;
  string tracking_id = 3;
}
"#;

fn codec_b64() -> String {
    B64.encode(TEST_PROTO)
}

async fn start_daemon() -> (SocketAddr, SocketAddr) {
    let state = MockState::new();
    let grpc_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind grpc");
    let grpc_addr = grpc_listener.local_addr().expect("grpc addr");
    let http_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind http");
    let http_addr = http_listener.local_addr().expect("http addr");
    tokio::spawn({
        let state = state.clone();
        async move {
            grpc::serve(grpc_listener, state, std::future::pending::<()>())
                .await
                .expect("grpc server run");
        }
    });
    tokio::spawn(async move {
        management::serve(http_listener, state, 1 << 20, std::future::pending::<()>())
            .await
            .expect("http server run");
    });
    (grpc_addr, http_addr)
}

async fn post_ok(http_addr: SocketAddr, path: &str, body: Value) {
    let resp = reqwest::Client::new()
        .post(format!("http://{http_addr}{path}"))
        .json(&body)
        .send()
        .await
        .expect("post");
    assert_eq!(resp.status(), StatusCode::OK);
}

async fn setup_stubbed_method(http_addr: SocketAddr, stub: Value) {
    post_ok(http_addr, "/v2/service", json!({"name": "beta", "suffix": "beta"})).await;
    post_ok(
        http_addr,
        "/v4/grpcMethodDescription",
        json!({
            "id": "md-up",
            "service": "beta",
            "methodName": PRICES_METHOD,
            "connectionType": "UNARY",
            "requestClass": "PricesRequest",
            "responseClass": "PricesResponse",
            "requestCodecs": codec_b64(),
            "responseCodecs": codec_b64(),
        }),
    )
    .await;
    post_ok(http_addr, "/v4/grpcStub", stub).await;
}

fn test_schema() -> MethodSchema {
    MethodSchema::compile(&MethodDescription {
        id: "md-client".to_string(),
        description: None,
        service: "beta".to_string(),
        method_name: PRICES_METHOD.to_string(),
        connection_type: ConnectionType::Unary,
        proxy_url: None,
        request_class: "PricesRequest".to_string(),
        response_class: "PricesResponse".to_string(),
        request_codecs: codec_b64(),
        response_codecs: codec_b64(),
        created: 0,
    })
    .expect("client schema")
}

async fn call_unary(
    addr: SocketAddr,
    schema: &MethodSchema,
    payload: Value,
) -> Result<Value, tonic::Status> {
    let channel = Endpoint::from_shared(format!("http://{addr}"))
        .expect("endpoint")
        .connect()
        .await
        .expect("connect");
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready().await.expect("ready");
    let message =
        schema::value_to_message(schema.request.clone(), &payload).expect("request message");
    let response = grpc
        .unary(
            tonic::Request::new(message),
            PathAndQuery::from_static("/market_data.OTCMarketDataService/PricesUnary"),
            DynamicCodec::client(schema),
        )
        .await?;
    Ok(schema::message_to_value(response.get_ref()).expect("response value"))
}

#[tokio::test]
async fn local_stubs_answer_before_the_upstream_sees_anything() {
    let (upstream_grpc, upstream_http) = start_daemon().await;
    setup_stubbed_method(
        upstream_http,
        json!({
            "methodDescriptionId": "md-up",
            "name": "upstream answer",
            "scope": "persistent",
            "response": {"mode": "fill", "data": {"code": "UPSTREAM"}},
        }),
    )
    .await;

    let (front_grpc, front_http) = start_daemon().await;
    post_ok(front_http, "/v2/service", json!({"name": "beta", "suffix": "beta"})).await;
    post_ok(
        front_http,
        "/v4/grpcMethodDescription",
        json!({
            "id": "md-front",
            "service": "beta",
            "methodName": PRICES_METHOD,
            "connectionType": "UNARY",
            "proxyUrl": format!("http://{upstream_grpc}"),
            "requestClass": "PricesRequest",
            "responseClass": "PricesResponse",
            "requestCodecs": codec_b64(),
            "responseCodecs": codec_b64(),
        }),
    )
    .await;
    post_ok(
        front_http,
        "/v4/grpcStub",
        json!({
            "methodDescriptionId": "md-front",
            "name": "local override",
            "scope": "persistent",
            "requestPredicates": {"instrument_id": {"==": "LOCAL"}},
            "response": {"mode": "fill", "data": {"code": "LOCAL"}},
        }),
    )
    .await;

    let schema = test_schema();
    let local = call_unary(front_grpc, &schema, json!({"instrument_id": "LOCAL"}))
        .await
        .expect("local");
    assert_eq!(local["code"], "LOCAL");
    let forwarded = call_unary(front_grpc, &schema, json!({"instrument_id": "OTHER"}))
        .await
        .expect("forwarded");
    assert_eq!(forwarded["code"], "UPSTREAM");
}

#[tokio::test]
async fn codec_less_proxy_forwards_frames_opaquely() {
    let (upstream_grpc, upstream_http) = start_daemon().await;
    setup_stubbed_method(
        upstream_http,
        json!({
            "methodDescriptionId": "md-up",
            "name": "upstream answer",
            "scope": "persistent",
            "response": {
                "mode": "fill",
                "data": {"code": "UPSTREAM", "instrument_id": "${req.instrument_id}"},
            },
        }),
    )
    .await;

    // No codecs on the front registration: frames pass through unparsed.
    let (front_grpc, front_http) = start_daemon().await;
    post_ok(front_http, "/v2/service", json!({"name": "beta", "suffix": "beta"})).await;
    post_ok(
        front_http,
        "/v4/grpcMethodDescription",
        json!({
            "id": "md-front",
            "service": "beta",
            "methodName": PRICES_METHOD,
            "connectionType": "UNARY",
            "proxyUrl": format!("http://{upstream_grpc}"),
        }),
    )
    .await;

    let schema = test_schema();
    let reply = call_unary(front_grpc, &schema, json!({"instrument_id": "XS1"}))
        .await
        .expect("forwarded");
    assert_eq!(reply["code"], "UPSTREAM");
    assert_eq!(reply["instrument_id"], "XS1");
}

#[tokio::test]
async fn unreachable_upstream_surfaces_unavailable() {
    let (front_grpc, front_http) = start_daemon().await;
    post_ok(front_http, "/v2/service", json!({"name": "beta", "suffix": "beta"})).await;
    post_ok(
        front_http,
        "/v4/grpcMethodDescription",
        json!({
            "id": "md-front",
            "service": "beta",
            "methodName": PRICES_METHOD,
            "connectionType": "UNARY",
            "proxyUrl": "http://127.0.0.1:1",
        }),
    )
    .await;

    let schema = test_schema();
    let status = call_unary(front_grpc, &schema, json!({"instrument_id": "XS1"}))
        .await
        .expect_err("nothing listens there");
    assert_eq!(status.code(), Code::Unavailable);
}
