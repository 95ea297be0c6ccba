use serde::{Deserialize, Serialize};

use crate::error::{LyrebirdError, LyrebirdResult};

/// Transport shape of a mocked gRPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl ConnectionType {
    /// True when the method sends a stream of response messages.
    pub fn streaming_output(self) -> bool {
        matches!(self, Self::ServerStreaming | Self::BidiStreaming)
    }

    /// True when the method receives a stream of request messages.
    pub fn streaming_input(self) -> bool {
        matches!(self, Self::ClientStreaming | Self::BidiStreaming)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unary => "UNARY",
            Self::ServerStreaming => "SERVER_STREAMING",
            Self::ClientStreaming => "CLIENT_STREAMING",
            Self::BidiStreaming => "BIDI_STREAMING",
        }
    }
}

/// A registered upstream service grouping method descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub suffix: String,
}

/// Registration record for one gRPC method the server impersonates.
///
/// `method_name` is the full gRPC path without the leading slash,
/// e.g. `market_data.OTCMarketDataService/PricesUnary`. Codecs carry
/// base64-encoded `.proto` sources; request/response classes name
/// messages defined there.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescription {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub service: String,
    pub method_name: String,
    pub connection_type: ConnectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    pub request_class: String,
    pub response_class: String,
    pub request_codecs: String,
    pub response_codecs: String,
    #[serde(default)]
    pub created: u64,
}

impl MethodDescription {
    /// URI path this method is served under.
    pub fn grpc_path(&self) -> String {
        format!("/{}", self.method_name)
    }

    pub fn validate(&self) -> LyrebirdResult<()> {
        if self.service.is_empty() {
            return Err(LyrebirdError::InvalidArgument("service must not be empty".into()));
        }
        let mut parts = self.method_name.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(svc), Some(method), None) if !svc.is_empty() && !method.is_empty() => {}
            _ => {
                return Err(LyrebirdError::InvalidArgument(format!(
                    "methodName must have the form package.Service/Method, got {:?}",
                    self.method_name
                )))
            }
        }
        if let Some(url) = &self.proxy_url {
            if url.is_empty() {
                return Err(LyrebirdError::InvalidArgument("proxyUrl must not be empty".into()));
            }
            if self.connection_type != ConnectionType::Unary {
                return Err(LyrebirdError::InvalidArgument(
                    "proxyUrl is only supported for UNARY methods".into(),
                ));
            }
        } else {
            if self.request_class.is_empty() || self.response_class.is_empty() {
                return Err(LyrebirdError::InvalidArgument(
                    "requestClass and responseClass must not be empty".into(),
                ));
            }
            if self.request_codecs.is_empty() || self.response_codecs.is_empty() {
                return Err(LyrebirdError::InvalidArgument(
                    "requestCodecs and responseCodecs must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Strips the leading slash from a request URI path, yielding a method name.
pub fn method_name_from_path(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}
