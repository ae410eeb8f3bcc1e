//! In-process transport connecting nodes without sockets
//!
//! Each host is an axum [`Router`] bound to an authority such as
//! `localhost:3301`. When a host terminates TLS, the connection is refused
//! unless client and server share a protocol; otherwise the negotiated
//! protocol and the client certificate reach the router as a
//! [`PeerTlsInfo`] request extension, as a real TLS terminator would attach.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::Request;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::RwLock;
use tower::ServiceExt;
use url::Url;

use super::transport::{HttpTransport, InboundResponse, OutboundRequest, TransportError};
use crate::security::{PeerCertificate, PeerTlsInfo, TlsMaterial, TlsProtocol, all_protocols};

/// Maximum response body accepted from a loopback host
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
struct Host {
    router: Router,
    /// `None` for plain HTTP hosts
    tls_protocols: Option<Vec<TlsProtocol>>,
}

/// Routes requests to in-process routers by URL authority
#[derive(Default)]
pub struct LoopbackNetwork {
    hosts: RwLock<HashMap<String, Host>>,
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hosts: Vec<String> = self.hosts.read().keys().cloned().collect();
        f.debug_struct("LoopbackNetwork")
            .field("hosts", &hosts)
            .finish()
    }
}

fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

/// DER bytes of the first PEM block, or the raw text when it is not PEM
fn certificate_from_pem(pem: &str) -> Vec<u8> {
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .map(str::trim)
        .collect();
    STANDARD
        .decode(body.as_bytes())
        .unwrap_or_else(|_| pem.as_bytes().to_vec())
}

fn peer_certificate(material: &TlsMaterial) -> Option<PeerCertificate> {
    let (leaf, chain) = material.client_certificates.split_first()?;
    Some(PeerCertificate {
        der: certificate_from_pem(leaf),
        chain: chain.iter().map(|c| certificate_from_pem(c)).collect(),
    })
}

impl LoopbackNetwork {
    /// An empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a plain HTTP host
    pub fn bind(&self, authority: impl Into<String>, router: Router) {
        self.hosts.write().insert(
            authority.into(),
            Host {
                router,
                tls_protocols: None,
            },
        );
    }

    /// Bind a host that terminates TLS with the given protocols
    pub fn bind_tls(&self, authority: impl Into<String>, router: Router, protocols: &[TlsProtocol]) {
        self.hosts.write().insert(
            authority.into(),
            Host {
                router,
                tls_protocols: Some(protocols.to_vec()),
            },
        );
    }

    /// Remove a host, so later connects fail
    pub fn unbind(&self, authority: &str) {
        self.hosts.write().remove(authority);
    }
}

#[async_trait]
impl HttpTransport for LoopbackNetwork {
    async fn execute(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError> {
        let authority = authority(&request.url)
            .ok_or_else(|| TransportError::Connect(format!("no host in {}", request.url)))?;
        let host = self
            .hosts
            .read()
            .get(&authority)
            .cloned()
            .ok_or_else(|| TransportError::Connect(format!("connection refused: {authority}")))?;

        let peer_tls = match &host.tls_protocols {
            Some(server) => {
                let client = request
                    .tls
                    .as_ref()
                    .map_or_else(all_protocols, |m| m.allowed_protocols());
                let protocol = TlsProtocol::negotiate(&client, server).ok_or_else(|| {
                    TransportError::Tls(format!(
                        "no common protocol with {authority}: client offers {client:?}, server accepts {server:?}"
                    ))
                })?;
                Some(PeerTlsInfo {
                    protocol,
                    certificate: request.tls.as_deref().and_then(peer_certificate),
                })
            }
            None => None,
        };

        let path = match request.url.query() {
            Some(query) => format!("{}?{query}", request.url.path()),
            None => request.url.path().to_string(),
        };
        let mut builder = Request::builder().method(request.method).uri(path);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers);
            if let Ok(value) = authority.parse() {
                headers.insert(axum::http::header::HOST, value);
            }
        }
        let body = request.body.map_or_else(Body::empty, Body::from);
        let mut http_request = builder
            .body(body)
            .map_err(|e| TransportError::Other(e.to_string()))?;
        if let Some(info) = peer_tls {
            http_request.extensions_mut().insert(info);
        }

        let response = host
            .router
            .oneshot(http_request)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(InboundResponse {
            status,
            headers,
            body,
        })
    }
}
