use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("metrics server failed: {0}")]
    Server(std::io::Error),
}

#[derive(Debug, Default)]
struct TelemetryState {
    grpc_requests_total: HashMap<String, u64>,
    stub_hits_total: HashMap<String, u64>,
    stub_misses_total: HashMap<String, u64>,
    render_failures_total: HashMap<String, u64>,
    proxied_calls_total: HashMap<String, u64>,
    stream_messages_total: HashMap<String, u64>,
    stubs_created_total: HashMap<String, u64>,
    stubs_exhausted_total: HashMap<String, u64>,
    unknown_paths_total: u64,
}

/// Counters for the serving and management planes, rendered in the
/// Prometheus text format.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    state: Arc<Mutex<TelemetryState>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_grpc_request(&self, connection_type: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .grpc_requests_total
            .entry(connection_type.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_stub_hit(&self, method: &str) {
        let mut guard = self.state.lock();
        let entry = guard.stub_hits_total.entry(method.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_stub_miss(&self, method: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .stub_misses_total
            .entry(method.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_render_failure(&self, method: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .render_failures_total
            .entry(method.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_proxied_call(&self, method: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .proxied_calls_total
            .entry(method.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    /// One message pushed onto a response stream (server streaming or
    /// bidi turns), counted after the send lands.
    pub fn record_stream_message(&self, method: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .stream_messages_total
            .entry(method.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_stub_created(&self, method: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .stubs_created_total
            .entry(method.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    /// A countdown or ephemeral stub served its last call and left the
    /// store.
    pub fn record_stub_exhausted(&self, method: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .stubs_exhausted_total
            .entry(method.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_unknown_path(&self) {
        let mut guard = self.state.lock();
        guard.unknown_paths_total = guard.unknown_paths_total.saturating_add(1);
    }

    pub fn render(&self) -> String {
        let guard = self.state.lock();
        let mut out = String::new();
        out.push_str("# TYPE lyrebird_grpc_requests_total counter\n");
        for (connection_type, value) in &guard.grpc_requests_total {
            let _ = writeln!(
                out,
                "lyrebird_grpc_requests_total{{connection_type=\"{}\"}} {}",
                connection_type, value
            );
        }
        out.push_str("# TYPE lyrebird_stub_hits_total counter\n");
        for (method, value) in &guard.stub_hits_total {
            let _ = writeln!(
                out,
                "lyrebird_stub_hits_total{{method=\"{}\"}} {}",
                method, value
            );
        }
        out.push_str("# TYPE lyrebird_stub_misses_total counter\n");
        for (method, value) in &guard.stub_misses_total {
            let _ = writeln!(
                out,
                "lyrebird_stub_misses_total{{method=\"{}\"}} {}",
                method, value
            );
        }
        out.push_str("# TYPE lyrebird_render_failures_total counter\n");
        for (method, value) in &guard.render_failures_total {
            let _ = writeln!(
                out,
                "lyrebird_render_failures_total{{method=\"{}\"}} {}",
                method, value
            );
        }
        out.push_str("# TYPE lyrebird_proxied_calls_total counter\n");
        for (method, value) in &guard.proxied_calls_total {
            let _ = writeln!(
                out,
                "lyrebird_proxied_calls_total{{method=\"{}\"}} {}",
                method, value
            );
        }
        out.push_str("# TYPE lyrebird_stream_messages_total counter\n");
        for (method, value) in &guard.stream_messages_total {
            let _ = writeln!(
                out,
                "lyrebird_stream_messages_total{{method=\"{}\"}} {}",
                method, value
            );
        }
        out.push_str("# TYPE lyrebird_stubs_created_total counter\n");
        for (method, value) in &guard.stubs_created_total {
            let _ = writeln!(
                out,
                "lyrebird_stubs_created_total{{method=\"{}\"}} {}",
                method, value
            );
        }
        out.push_str("# TYPE lyrebird_stubs_exhausted_total counter\n");
        for (method, value) in &guard.stubs_exhausted_total {
            let _ = writeln!(
                out,
                "lyrebird_stubs_exhausted_total{{method=\"{}\"}} {}",
                method, value
            );
        }
        out.push_str("# TYPE lyrebird_unknown_paths_total counter\n");
        let _ = writeln!(
            out,
            "lyrebird_unknown_paths_total {}",
            guard.unknown_paths_total
        );
        out
    }

    /// Serves `GET /metrics` over a bare TCP listener. One read, one
    /// write, connection closed; anything that isn't a scrape gets a
    /// 404.
    pub async fn spawn_metrics_server(
        self: Arc<Self>,
        addr: SocketAddr,
    ) -> Result<tokio::task::JoinHandle<()>, TelemetryError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(TelemetryError::Server)?;
        Ok(tokio::spawn(async move {
            loop {
                let (mut stream, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        tracing::error!(error = %err, "metrics accept loop stopped");
                        break;
                    }
                };
                let telemetry = Arc::clone(&self);
                tokio::spawn(async move {
                    let mut request = [0_u8; 1024];
                    let read = match stream.read(&mut request).await {
                        Ok(0) => return,
                        Ok(n) => n,
                        Err(err) => {
                            tracing::warn!(peer = %peer, error = %err, "dropping metrics connection");
                            return;
                        }
                    };
                    let head = String::from_utf8_lossy(&request[..read]);
                    let scrape = head.lines().next().map_or(false, |line| {
                        let mut words = line.split_whitespace();
                        words.next() == Some("GET") && words.next() == Some("/metrics")
                    });
                    let (status, body) = if scrape {
                        ("200 OK", telemetry.render())
                    } else {
                        ("404 Not Found", "unknown path".to_string())
                    };
                    let reply = format!(
                        "HTTP/1.1 {status}\r\ncontent-type: text/plain; version=0.0.4\r\ncontent-length: {len}\r\nconnection: close\r\n\r\n{body}",
                        len = body.len(),
                    );
                    if let Err(err) = stream.write_all(reply.as_bytes()).await {
                        tracing::debug!(peer = %peer, error = %err, "metrics reply went unread");
                    }
                });
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::Telemetry;

    #[test]
    fn counters_show_up_in_rendered_output() {
        let telemetry = Telemetry::new();
        telemetry.record_grpc_request("UNARY");
        telemetry.record_grpc_request("UNARY");
        telemetry.record_stub_hit("pkg.Svc/M");
        telemetry.record_stub_miss("pkg.Svc/M");
        telemetry.record_stream_message("pkg.Svc/M");
        telemetry.record_stream_message("pkg.Svc/M");
        telemetry.record_stream_message("pkg.Svc/M");
        telemetry.record_stub_created("pkg.Svc/M");
        telemetry.record_stub_exhausted("pkg.Svc/M");
        telemetry.record_unknown_path();

        let rendered = telemetry.render();
        assert!(rendered.contains("lyrebird_grpc_requests_total{connection_type=\"UNARY\"} 2"));
        assert!(rendered.contains("lyrebird_stub_hits_total{method=\"pkg.Svc/M\"} 1"));
        assert!(rendered.contains("lyrebird_stub_misses_total{method=\"pkg.Svc/M\"} 1"));
        assert!(rendered.contains("lyrebird_stream_messages_total{method=\"pkg.Svc/M\"} 3"));
        assert!(rendered.contains("lyrebird_stubs_created_total{method=\"pkg.Svc/M\"} 1"));
        assert!(rendered.contains("lyrebird_stubs_exhausted_total{method=\"pkg.Svc/M\"} 1"));
        assert!(rendered.contains("lyrebird_unknown_paths_total 1"));
    }

    #[test]
    fn untouched_counters_render_only_type_headers() {
        let telemetry = Telemetry::new();
        let rendered = telemetry.render();
        assert!(rendered.contains("# TYPE lyrebird_stub_hits_total counter"));
        assert!(!rendered.contains("lyrebird_stub_hits_total{"));
    }
}
