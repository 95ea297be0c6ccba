use std::net::{AddrParseError, SocketAddr};

/// Runtime settings for the daemon's listeners.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub grpc_listen: String,
    pub http_listen: String,
    pub metrics_listen: Option<String>,
    pub max_body_bytes: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            grpc_listen: "0.0.0.0:9000".to_string(),
            http_listen: "0.0.0.0:8228".to_string(),
            metrics_listen: None,
            max_body_bytes: 4_194_304,
        }
    }
}

impl DaemonConfig {
    /// Defaults with `LYREBIRD_*` environment overrides applied. CLI
    /// flags are layered on top by `main`, so the precedence is flag,
    /// then variable, then default.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(listen) = std::env::var("LYREBIRD_GRPC_LISTEN") {
            cfg.grpc_listen = listen;
        }
        if let Ok(listen) = std::env::var("LYREBIRD_HTTP_LISTEN") {
            cfg.http_listen = listen;
        }
        if let Ok(listen) = std::env::var("LYREBIRD_METRICS_LISTEN") {
            cfg.metrics_listen = Some(listen);
        }
        if let Ok(raw) = std::env::var("LYREBIRD_MAX_BODY_BYTES") {
            match raw.parse() {
                Ok(limit) => cfg.max_body_bytes = limit,
                Err(err) => {
                    tracing::warn!(value = %raw, error = %err, "ignoring LYREBIRD_MAX_BODY_BYTES");
                }
            }
        }
        cfg
    }

    pub fn grpc_addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.grpc_listen.parse()
    }

    pub fn http_addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.http_listen.parse()
    }

    pub fn metrics_addr(&self) -> Option<Result<SocketAddr, AddrParseError>> {
        self.metrics_listen.as_deref().map(str::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_listeners_parse() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.grpc_addr().unwrap().port(), 9000);
        assert_eq!(cfg.http_addr().unwrap().port(), 8228);
        assert!(cfg.metrics_addr().is_none());
    }

    #[test]
    fn metrics_listener_is_optional_but_validated() {
        let cfg = DaemonConfig {
            metrics_listen: Some("127.0.0.1:9102".to_string()),
            ..DaemonConfig::default()
        };
        assert_eq!(cfg.metrics_addr().unwrap().unwrap().port(), 9102);
        let bad = DaemonConfig {
            metrics_listen: Some("not-an-addr".to_string()),
            ..DaemonConfig::default()
        };
        assert!(bad.metrics_addr().unwrap().is_err());
    }

    // Env vars are process-global, so every phase lives in this one
    // test to keep parallel test threads from racing on them.
    #[test]
    fn env_overrides_layer_over_defaults() {
        const KEYS: [&str; 4] = [
            "LYREBIRD_GRPC_LISTEN",
            "LYREBIRD_HTTP_LISTEN",
            "LYREBIRD_METRICS_LISTEN",
            "LYREBIRD_MAX_BODY_BYTES",
        ];
        for key in KEYS {
            std::env::remove_var(key);
        }
        let cfg = DaemonConfig::from_env();
        assert_eq!(cfg.grpc_listen, "0.0.0.0:9000");
        assert_eq!(cfg.http_listen, "0.0.0.0:8228");
        assert!(cfg.metrics_listen.is_none());
        assert_eq!(cfg.max_body_bytes, 4_194_304);

        std::env::set_var("LYREBIRD_GRPC_LISTEN", "127.0.0.1:7001");
        std::env::set_var("LYREBIRD_HTTP_LISTEN", "127.0.0.1:7002");
        std::env::set_var("LYREBIRD_METRICS_LISTEN", "127.0.0.1:7003");
        std::env::set_var("LYREBIRD_MAX_BODY_BYTES", "1024");
        let cfg = DaemonConfig::from_env();
        assert_eq!(cfg.grpc_listen, "127.0.0.1:7001");
        assert_eq!(cfg.http_listen, "127.0.0.1:7002");
        assert_eq!(cfg.metrics_listen.as_deref(), Some("127.0.0.1:7003"));
        assert_eq!(cfg.max_body_bytes, 1024);

        std::env::set_var("LYREBIRD_MAX_BODY_BYTES", "not-a-number");
        assert_eq!(DaemonConfig::from_env().max_body_bytes, 4_194_304);

        for key in KEYS {
            std::env::remove_var(key);
        }
    }
}
