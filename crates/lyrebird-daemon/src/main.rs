// Copyright [2026] [Lyrebird Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Lyrebird Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lyrebird_daemon::config::DaemonConfig;
use lyrebird_daemon::{grpc, http, MockState};

#[derive(Debug, Parser)]
#[command(name = "lyrebird-daemon")]
#[command(about = "Lyrebird dynamic gRPC mock server")]
struct Args {
    /// Address the mocked gRPC surface listens on [default: 0.0.0.0:9000, env: LYREBIRD_GRPC_LISTEN].
    #[arg(long)]
    grpc_listen: Option<String>,

    /// Address the HTTP management API listens on [default: 0.0.0.0:8228, env: LYREBIRD_HTTP_LISTEN].
    #[arg(long)]
    http_listen: Option<String>,

    /// Optional Prometheus text endpoint, e.g. 127.0.0.1:9464 [env: LYREBIRD_METRICS_LISTEN].
    #[arg(long)]
    metrics_listen: Option<String>,

    /// Management request body cap in bytes [default: 4194304, env: LYREBIRD_MAX_BODY_BYTES].
    #[arg(long)]
    max_body_bytes: Option<usize>,

    /// Log filter, e.g. "info" or "lyrebird_daemon=debug" [env: LYREBIRD_LOG].
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = args
        .log
        .or_else(|| std::env::var("LYREBIRD_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut cfg = DaemonConfig::from_env();
    if let Some(listen) = args.grpc_listen {
        cfg.grpc_listen = listen;
    }
    if let Some(listen) = args.http_listen {
        cfg.http_listen = listen;
    }
    if let Some(listen) = args.metrics_listen {
        cfg.metrics_listen = Some(listen);
    }
    if let Some(limit) = args.max_body_bytes {
        cfg.max_body_bytes = limit;
    }

    let state = MockState::new();

    if let Some(addr) = cfg.metrics_addr() {
        let addr = addr?;
        let _metrics = Arc::clone(&state.telemetry)
            .spawn_metrics_server(addr)
            .await?;
        tracing::info!(%addr, "metrics listener up");
    }

    let grpc_listener = tokio::net::TcpListener::bind(cfg.grpc_addr()?).await?;
    let http_listener = tokio::net::TcpListener::bind(cfg.http_addr()?).await?;
    tracing::info!(
        grpc = %cfg.grpc_listen,
        http = %cfg.http_listen,
        "starting lyrebird mock server"
    );

    let grpc_task = tokio::spawn(grpc::serve(grpc_listener, state.clone(), shutdown_signal()));
    let http_task = tokio::spawn(http::serve(
        http_listener,
        state,
        cfg.max_body_bytes,
        shutdown_signal(),
    ));

    let (grpc_result, http_result) = tokio::try_join!(grpc_task, http_task)?;
    grpc_result?;
    http_result?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
