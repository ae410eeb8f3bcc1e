//! `reqwest`-backed transport

use std::collections::HashMap;
use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use reqwest::tls::Version;
use sha2::{Digest, Sha256};

use super::transport::{HttpTransport, InboundResponse, OutboundRequest, TransportError};
use crate::security::{TlsMaterial, TlsProtocol};
use crate::{Error, Result};

const USER_AGENT: &str = concat!("ocpi-gateway/", env!("CARGO_PKG_VERSION"));

/// Production transport
///
/// Parties with TLS material get their own client, built once and cached by
/// a digest of the material.
pub struct ReqwestTransport {
    timeout: Duration,
    default_client: Client,
    party_clients: Mutex<HashMap<String, Client>>,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("timeout", &self.timeout)
            .field("party_clients", &self.party_clients.lock().len())
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Create a transport with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let default_client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            timeout,
            default_client,
            party_clients: Mutex::new(HashMap::new()),
        })
    }

    /// Restrict connections to parties without their own TLS material
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn with_default_protocols(mut self, protocols: &[TlsProtocol]) -> Result<Self> {
        let material = TlsMaterial::restricted_to(protocols);
        self.default_client = build_client(self.timeout, &material)
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(self)
    }

    fn client_for(&self, material: Option<&TlsMaterial>) -> std::result::Result<Client, TransportError> {
        let Some(material) = material else {
            return Ok(self.default_client.clone());
        };

        let key = material_key(material);
        if let Some(client) = self.party_clients.lock().get(&key) {
            return Ok(client.clone());
        }

        let client = build_client(self.timeout, material)?;
        self.party_clients.lock().insert(key, client.clone());
        Ok(client)
    }
}

fn material_key(material: &TlsMaterial) -> String {
    let mut hasher = Sha256::new();
    for protocol in &material.protocols {
        hasher.update(protocol.to_string().as_bytes());
    }
    for cert in &material.client_certificates {
        hasher.update(cert.as_bytes());
    }
    if let Some(key) = &material.client_private_key {
        hasher.update(key.as_bytes());
    }
    hex::encode(hasher.finalize())
}

const fn tls_version(protocol: TlsProtocol) -> Version {
    match protocol {
        TlsProtocol::Tls12 => Version::TLS_1_2,
        TlsProtocol::Tls13 => Version::TLS_1_3,
    }
}

fn build_client(timeout: Duration, material: &TlsMaterial) -> std::result::Result<Client, TransportError> {
    let mut builder = Client::builder().timeout(timeout).user_agent(USER_AGENT);

    let allowed = material.allowed_protocols();
    if let (Some(min), Some(max)) = (allowed.iter().min(), allowed.iter().max()) {
        builder = builder
            .min_tls_version(tls_version(*min))
            .max_tls_version(tls_version(*max));
    }

    if let (false, Some(key)) = (
        material.client_certificates.is_empty(),
        &material.client_private_key,
    ) {
        let mut pem = material.client_certificates.join("\n").into_bytes();
        pem.push(b'\n');
        pem.extend_from_slice(key.as_bytes());
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| TransportError::Other(format!("invalid client certificate: {e}")))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| TransportError::Other(format!("cannot build TLS client: {e}")))
}

fn classify(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        return TransportError::Timeout;
    }

    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        chain.push_str(": ");
        chain.push_str(&inner.to_string());
        source = inner.source();
    }

    let lower = chain.to_lowercase();
    if lower.contains("tls") || lower.contains("handshake") || lower.contains("certificate") {
        TransportError::Tls(chain)
    } else if error.is_connect() {
        TransportError::Connect(chain)
    } else {
        TransportError::Other(chain)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: OutboundRequest,
    ) -> std::result::Result<InboundResponse, TransportError> {
        let client = self.client_for(request.tls.as_deref())?;

        let mut builder = client
            .request(request.method, request.url.as_str())
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| classify(&e))?;

        Ok(InboundResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_key_tracks_protocols_and_certificates() {
        let a = TlsMaterial {
            protocols: vec![TlsProtocol::Tls12],
            ..TlsMaterial::default()
        };
        let b = TlsMaterial {
            protocols: vec![TlsProtocol::Tls13],
            ..TlsMaterial::default()
        };
        assert_ne!(material_key(&a), material_key(&b));
        assert_eq!(material_key(&a), material_key(&a.clone()));
    }

    #[tokio::test]
    async fn caches_clients_per_material() {
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let material = TlsMaterial {
            protocols: vec![TlsProtocol::Tls12],
            ..TlsMaterial::default()
        };
        transport.client_for(Some(&material)).unwrap();
        transport.client_for(Some(&material)).unwrap();
        transport.client_for(None).unwrap();
        assert_eq!(transport.party_clients.lock().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connect_failure() {
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let request = OutboundRequest::new(
            axum::http::Method::GET,
            "http://127.0.0.1:1/ocpi/versions".parse().unwrap(),
        );
        let err = transport.execute(request).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_) | TransportError::Other(_)));
    }
}
