//! Access tokens, TLS material and inbound trust validation

pub mod tls;
pub mod token;
pub mod totp;
pub mod trust;

pub use tls::{
    CertificateVerdict, PeerCertificate, PeerTlsInfo, RemoteCertificateValidator, TlsMaterial,
    TlsProtocol, all_protocols,
};
pub use token::{AccessToken, encode_header, header_candidates};
pub use totp::TotpConfig;
pub use trust::{AuthenticatedParty, TrustError, TrustValidator};
