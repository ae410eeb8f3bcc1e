//! Remote party records and their identity

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ocpi::{CredentialsRole, Endpoint, VersionId};
use crate::security::{AccessToken, TlsMaterial, TotpConfig};
use crate::{Error, Result};

/// Business role of an OCPI party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Cpo,
    Emsp,
    Hub,
    Nap,
    Nsp,
    Other,
    Scsp,
    Ptp,
}

impl Role {
    /// Wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cpo => "CPO",
            Self::Emsp => "EMSP",
            Self::Hub => "HUB",
            Self::Nap => "NAP",
            Self::Nsp => "NSP",
            Self::Other => "OTHER",
            Self::Scsp => "SCSP",
            Self::Ptp => "PTP",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "CPO" => Ok(Self::Cpo),
            "EMSP" => Ok(Self::Emsp),
            "HUB" => Ok(Self::Hub),
            "NAP" => Ok(Self::Nap),
            "NSP" => Ok(Self::Nsp),
            "OTHER" => Ok(Self::Other),
            "SCSP" => Ok(Self::Scsp),
            "PTP" => Ok(Self::Ptp),
            _ => Err(Error::InvalidArgument(format!("unknown role '{s}'"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (country code, party id, role), unique per registry
///
/// Canonical text form is `DE*GEF*CPO`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyIdentity {
    pub country_code: String,
    pub party_id: String,
    pub role: Role,
}

impl PartyIdentity {
    /// Build and validate an identity
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` unless the country code is two ASCII letters
    /// and the party id three ASCII alphanumerics
    pub fn new(country_code: &str, party_id: &str, role: Role) -> Result<Self> {
        if country_code.len() != 2 || !country_code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::InvalidArgument(format!(
                "country code '{country_code}' must be two letters"
            )));
        }
        if party_id.len() != 3 || !party_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidArgument(format!(
                "party id '{party_id}' must be three alphanumerics"
            )));
        }

        Ok(Self {
            country_code: country_code.to_uppercase(),
            party_id: party_id.to_uppercase(),
            role,
        })
    }
}

impl FromStr for PartyIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(['*', '-', '/']);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(cc), Some(pid), Some(role), None) => Self::new(cc, pid, role.parse()?),
            _ => Err(Error::InvalidArgument(format!(
                "malformed party identity '{s}', expected CC*PID*ROLE"
            ))),
        }
    }
}

impl fmt::Display for PartyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*{}*{}", self.country_code, self.party_id, self.role)
    }
}

/// Whether a party may be used at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyStatus {
    #[default]
    Enabled,
    Disabled,
}

/// Whether the party's local token is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalAccessStatus {
    #[default]
    Allowed,
    Blocked,
}

/// Last known reachability of the party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteAccessStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

/// This node's record of a counterparty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteParty {
    pub identity: PartyIdentity,
    #[serde(default)]
    pub credentials_roles: Vec<CredentialsRole>,

    /// Token the party presents to us
    pub local_access_token: Option<AccessToken>,
    #[serde(default)]
    pub local_totp: Option<TotpConfig>,
    #[serde(default)]
    pub local_access_status: LocalAccessStatus,

    /// Token we present to the party
    pub remote_access_token: Option<AccessToken>,
    #[serde(default)]
    pub remote_totp: Option<TotpConfig>,
    pub remote_versions_url: Option<Url>,
    #[serde(default)]
    pub remote_version_ids: Vec<VersionId>,
    pub selected_version: Option<VersionId>,
    /// Endpoints of `selected_version` as fetched during the last registration
    #[serde(default)]
    pub remote_endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub remote_access_status: RemoteAccessStatus,

    #[serde(default)]
    pub tls: Option<Arc<TlsMaterial>>,
    #[serde(default)]
    pub party_status: PartyStatus,
    #[serde(default)]
    pub allow_downgrades: bool,

    /// Compare-and-swap counter, bumped on every mutation
    pub revision: u64,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl RemoteParty {
    /// Whether protocol traffic with this party is permitted
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.party_status == PartyStatus::Enabled
    }

    /// Whether a credentials handshake has completed
    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.selected_version.is_some()
    }

    /// Token to present to the party at `now`
    #[must_use]
    pub fn outbound_token(&self, now: DateTime<Utc>) -> Option<AccessToken> {
        self.remote_totp
            .as_ref()
            .map(|totp| totp.token_at(now))
            .or_else(|| self.remote_access_token.clone())
    }

    /// Whether `presented` authenticates this party at `now`
    #[must_use]
    pub fn accepts(&self, presented: &str, now: DateTime<Utc>) -> bool {
        if self.local_access_status == LocalAccessStatus::Blocked {
            return false;
        }
        if let Some(totp) = &self.local_totp {
            return totp.verify(presented, now);
        }
        self.local_access_token
            .as_ref()
            .is_some_and(|token| token.matches(presented))
    }

    /// Registration snapshot endpoint for a module
    #[must_use]
    pub fn endpoint(&self, module: &crate::ocpi::ModuleId) -> Option<&Endpoint> {
        self.remote_endpoints
            .iter()
            .find(|e| &e.identifier == module)
    }
}

/// Input for [`super::PartyRegistry::add_or_update`]
#[derive(Debug, Clone)]
pub struct PartyDraft {
    pub identity: PartyIdentity,
    pub credentials_roles: Vec<CredentialsRole>,
    pub local_access_token: Option<AccessToken>,
    pub local_totp: Option<TotpConfig>,
    pub remote_access_token: Option<AccessToken>,
    pub remote_totp: Option<TotpConfig>,
    pub remote_versions_url: Option<Url>,
    pub remote_version_ids: Vec<VersionId>,
    pub tls: Option<Arc<TlsMaterial>>,
    pub party_status: PartyStatus,
    pub allow_downgrades: bool,
}

impl PartyDraft {
    /// A draft with only an identity set
    #[must_use]
    pub const fn new(identity: PartyIdentity) -> Self {
        Self {
            identity,
            credentials_roles: Vec::new(),
            local_access_token: None,
            local_totp: None,
            remote_access_token: None,
            remote_totp: None,
            remote_versions_url: None,
            remote_version_ids: Vec::new(),
            tls: None,
            party_status: PartyStatus::Enabled,
            allow_downgrades: false,
        }
    }

    /// Token the party must present to us
    #[must_use]
    pub fn local_token(mut self, token: AccessToken) -> Self {
        self.local_access_token = Some(token);
        self
    }

    /// Token we present to the party (a bootstrap token before registration)
    #[must_use]
    pub fn remote_token(mut self, token: AccessToken) -> Self {
        self.remote_access_token = Some(token);
        self
    }

    /// TOTP seed for tokens the party presents to us
    #[must_use]
    pub fn local_totp(mut self, totp: TotpConfig) -> Self {
        self.local_totp = Some(totp);
        self
    }

    /// TOTP seed for tokens we present to the party
    #[must_use]
    pub fn remote_totp(mut self, totp: TotpConfig) -> Self {
        self.remote_totp = Some(totp);
        self
    }

    /// The party's `/versions` URL
    #[must_use]
    pub fn versions_url(mut self, url: Url) -> Self {
        self.remote_versions_url = Some(url);
        self
    }

    /// Business roles of the party
    #[must_use]
    pub fn roles(mut self, roles: Vec<CredentialsRole>) -> Self {
        self.credentials_roles = roles;
        self
    }

    /// TLS material for connections with the party
    #[must_use]
    pub fn tls(mut self, tls: Arc<TlsMaterial>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Initial party status
    #[must_use]
    pub const fn status(mut self, status: PartyStatus) -> Self {
        self.party_status = status;
        self
    }

    /// Whether registrations may lower the selected version
    #[must_use]
    pub const fn allow_downgrades(mut self, allow: bool) -> Self {
        self.allow_downgrades = allow;
        self
    }
}
