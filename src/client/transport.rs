//! HTTP transport seam for outbound OCPI calls

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use thiserror::Error;
use url::Url;

use crate::security::TlsMaterial;

/// Failures below the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// DNS or TCP connect failure
    #[error("connect failed: {0}")]
    Connect(String),

    /// TLS handshake failure, including no common protocol
    #[error("TLS handshake failed: {0}")]
    Tls(String),

    /// The request exceeded the client timeout
    #[error("request timed out")]
    Timeout,

    /// Client configuration or other I/O failure
    #[error("{0}")]
    Other(String),
}

/// A request ready to put on the wire
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Client certificate and protocol restriction for this party
    pub tls: Option<Arc<TlsMaterial>>,
}

impl OutboundRequest {
    /// A request without headers or body
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            tls: None,
        }
    }
}

/// What came back over the wire
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundResponse {
    /// A header value as a string
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }
}

/// Executes outbound requests
///
/// The production implementation is [`super::ReqwestTransport`]; tests wire
/// nodes together in-process with [`super::LoopbackNetwork`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and collect the whole response
    async fn execute(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError>;
}
