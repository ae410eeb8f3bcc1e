//! Inbound request trust checks
//!
//! A request is trusted when its `Authorization: Token` value identifies an
//! enabled party (static token or TOTP) and, where required, the TLS client
//! certificate passes the configured [`RemoteCertificateValidator`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::tls::{PeerTlsInfo, RemoteCertificateValidator, TlsProtocol};
use super::token::header_candidates;
use crate::parties::{PartyRegistry, RemoteParty};

/// Why an inbound request was not trusted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    #[error("missing or malformed Authorization header")]
    MissingToken,

    #[error("unknown or blocked access token")]
    UnknownToken,

    #[error("party {0} is disabled")]
    PartyDisabled(String),

    #[error("TLS protocol {0} not allowed for this party")]
    ProtocolNotAllowed(TlsProtocol),

    #[error("client certificate required")]
    CertificateRequired,

    #[error("client certificate rejected: {}", .0.join("; "))]
    CertificateRejected(Vec<String>),

    #[error("party store failure: {0}")]
    Store(String),
}

/// An authenticated caller
///
/// Holds a snapshot of the party record taken at authentication time, so a
/// concurrent token rotation does not affect a request already in flight.
#[derive(Debug, Clone)]
pub struct AuthenticatedParty {
    pub party: RemoteParty,
    /// The token value that matched, after base64 decoding
    pub token: String,
}

/// Validates inbound requests against the party registry
#[derive(Clone)]
pub struct TrustValidator {
    registry: PartyRegistry,
    certificate_validator: Option<Arc<dyn RemoteCertificateValidator>>,
    require_client_certificates: bool,
}

impl std::fmt::Debug for TrustValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustValidator")
            .field("certificate_validator", &self.certificate_validator.is_some())
            .field("require_client_certificates", &self.require_client_certificates)
            .finish_non_exhaustive()
    }
}

impl TrustValidator {
    /// Token-only validation
    #[must_use]
    pub fn new(registry: PartyRegistry) -> Self {
        Self {
            registry,
            certificate_validator: None,
            require_client_certificates: false,
        }
    }

    /// Install a certificate validator
    #[must_use]
    pub fn with_certificate_validator(
        mut self,
        validator: Arc<dyn RemoteCertificateValidator>,
    ) -> Self {
        self.certificate_validator = Some(validator);
        self
    }

    /// Require a valid client certificate from every party
    #[must_use]
    pub const fn require_client_certificates(mut self, require: bool) -> Self {
        self.require_client_certificates = require;
        self
    }

    /// The registry tokens are checked against
    #[must_use]
    pub const fn registry(&self) -> &PartyRegistry {
        &self.registry
    }

    /// Authenticate a request from its `Authorization` header and TLS facts
    ///
    /// # Errors
    ///
    /// Returns the first failed check
    pub fn authenticate(
        &self,
        authorization: Option<&str>,
        tls: Option<&PeerTlsInfo>,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedParty, TrustError> {
        let candidates = authorization.map(header_candidates).unwrap_or_default();
        if candidates.is_empty() {
            return Err(TrustError::MissingToken);
        }

        let mut matched = None;
        for candidate in candidates {
            if let Some(party) = self
                .registry
                .find_by_local_token(&candidate, now)
                .map_err(|e| TrustError::Store(e.to_string()))?
            {
                matched = Some((party, candidate));
                break;
            }
        }
        let Some((party, token)) = matched else {
            tracing::debug!("no party matches presented token");
            return Err(TrustError::UnknownToken);
        };

        if !party.is_enabled() {
            tracing::warn!(party = %party.identity, "request from disabled party");
            return Err(TrustError::PartyDisabled(party.identity.to_string()));
        }

        self.check_tls(&party, tls)?;

        tracing::trace!(party = %party.identity, "request authenticated");
        Ok(AuthenticatedParty { party, token })
    }

    fn check_tls(&self, party: &RemoteParty, tls: Option<&PeerTlsInfo>) -> Result<(), TrustError> {
        let material = party.tls.as_deref();

        if let (Some(material), Some(info)) = (material, tls)
            && !material.allowed_protocols().contains(&info.protocol)
        {
            tracing::warn!(party = %party.identity, protocol = %info.protocol, "TLS protocol not allowed");
            return Err(TrustError::ProtocolNotAllowed(info.protocol));
        }

        let required = self.require_client_certificates
            || material.is_some_and(|m| m.require_client_certificate);
        let presented = tls.and_then(|info| info.certificate.as_ref().map(|c| (c, info.protocol)));

        match (presented, &self.certificate_validator) {
            (Some((certificate, protocol)), Some(validator)) => {
                let context = material.and_then(|m| m.certificate_context.as_deref());
                let verdict = validator.validate(certificate, context, protocol);
                if verdict.valid {
                    Ok(())
                } else {
                    tracing::warn!(party = %party.identity, reasons = ?verdict.reasons, "client certificate rejected");
                    Err(TrustError::CertificateRejected(verdict.reasons))
                }
            }
            (Some(_), None) if required => Err(TrustError::CertificateRejected(vec![
                "no certificate validator configured".to_string(),
            ])),
            (None, _) if required => Err(TrustError::CertificateRequired),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;

    use super::*;
    use crate::parties::{PartyDraft, PartyIdentity, PartyStatus};
    use crate::security::{
        AccessToken, CertificateVerdict, PeerCertificate, TlsMaterial, TlsProtocol,
    };

    fn identity() -> PartyIdentity {
        "NL*ABC*EMSP".parse().unwrap()
    }

    fn validator_with(draft: PartyDraft) -> TrustValidator {
        let registry = PartyRegistry::in_memory();
        registry.add_or_update(draft).unwrap();
        TrustValidator::new(registry)
    }

    fn draft() -> PartyDraft {
        PartyDraft::new(identity()).local_token(AccessToken::new("their-token"))
    }

    fn tls(protocol: TlsProtocol, cert: bool) -> PeerTlsInfo {
        PeerTlsInfo {
            protocol,
            certificate: cert.then(|| PeerCertificate {
                der: vec![0x30, 0x82],
                chain: Vec::new(),
            }),
        }
    }

    #[test]
    fn accepts_plain_and_base64_tokens() {
        let trust = validator_with(draft());
        let now = Utc::now();
        let plain = trust.authenticate(Some("Token their-token"), None, now).unwrap();
        assert_eq!(plain.party.identity, identity());

        let encoded = base64::engine::general_purpose::STANDARD.encode("their-token");
        let decoded = trust
            .authenticate(Some(&format!("Token {encoded}")), None, now)
            .unwrap();
        assert_eq!(decoded.token, "their-token");
    }

    #[test]
    fn rejects_missing_and_unknown_tokens() {
        let trust = validator_with(draft());
        let now = Utc::now();
        assert_eq!(
            trust.authenticate(None, None, now).unwrap_err(),
            TrustError::MissingToken
        );
        assert_eq!(
            trust.authenticate(Some("Token nope"), None, now).unwrap_err(),
            TrustError::UnknownToken
        );
    }

    #[test]
    fn disabled_party_is_rejected() {
        let trust = validator_with(draft().status(PartyStatus::Disabled));
        let err = trust
            .authenticate(Some("Token their-token"), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, TrustError::PartyDisabled(_)));
    }

    #[test]
    fn enforces_party_tls_protocols() {
        let trust = validator_with(draft().tls(TlsMaterial::restricted_to(&[TlsProtocol::Tls12])));
        let now = Utc::now();
        let err = trust
            .authenticate(Some("Token their-token"), Some(&tls(TlsProtocol::Tls13, false)), now)
            .unwrap_err();
        assert_eq!(err, TrustError::ProtocolNotAllowed(TlsProtocol::Tls13));
        assert!(
            trust
                .authenticate(Some("Token their-token"), Some(&tls(TlsProtocol::Tls12, false)), now)
                .is_ok()
        );
    }

    #[test]
    fn certificate_checks_combine_with_token() {
        let material = Arc::new(TlsMaterial {
            require_client_certificate: true,
            certificate_context: Some("partner-ca".to_string()),
            ..TlsMaterial::default()
        });
        let trust = validator_with(draft().tls(material)).with_certificate_validator(Arc::new(
            |_cert: &PeerCertificate, context: Option<&str>, protocol: TlsProtocol| {
                if context == Some("partner-ca") && protocol == TlsProtocol::Tls13 {
                    CertificateVerdict::accept()
                } else {
                    CertificateVerdict::reject("untrusted chain")
                }
            },
        ));
        let now = Utc::now();

        assert_eq!(
            trust
                .authenticate(Some("Token their-token"), None, now)
                .unwrap_err(),
            TrustError::CertificateRequired
        );
        assert_eq!(
            trust
                .authenticate(Some("Token their-token"), Some(&tls(TlsProtocol::Tls12, true)), now)
                .unwrap_err(),
            TrustError::CertificateRejected(vec!["untrusted chain".to_string()])
        );
        assert!(
            trust
                .authenticate(Some("Token their-token"), Some(&tls(TlsProtocol::Tls13, true)), now)
                .is_ok()
        );
        // A valid certificate never substitutes for the token
        assert_eq!(
            trust
                .authenticate(Some("Token wrong"), Some(&tls(TlsProtocol::Tls13, true)), now)
                .unwrap_err(),
            TrustError::UnknownToken
        );
    }
}
