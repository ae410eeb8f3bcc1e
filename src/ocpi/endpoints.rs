//! Version catalogues and per-version endpoint lists

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use super::version::VersionId;

/// An entry of the `/versions` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: VersionId,
    /// URL of the version details
    pub url: Url,
}

/// Direction of a module interface (2.2 onward)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InterfaceRole {
    Sender,
    Receiver,
}

/// OCPI module identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModuleId {
    Cdrs,
    ChargingProfiles,
    Commands,
    Credentials,
    HubClientInfo,
    Locations,
    Sessions,
    Tariffs,
    Tokens,
    /// Modules this engine does not model
    Other(String),
}

impl ModuleId {
    /// Identifier as it appears on the wire and in URL paths
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Cdrs => "cdrs",
            Self::ChargingProfiles => "chargingprofiles",
            Self::Commands => "commands",
            Self::Credentials => "credentials",
            Self::HubClientInfo => "hubclientinfo",
            Self::Locations => "locations",
            Self::Sessions => "sessions",
            Self::Tariffs => "tariffs",
            Self::Tokens => "tokens",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for ModuleId {
    fn from(value: String) -> Self {
        match value.as_str() {
            "cdrs" => Self::Cdrs,
            "chargingprofiles" => Self::ChargingProfiles,
            "commands" => Self::Commands,
            "credentials" => Self::Credentials,
            "hubclientinfo" => Self::HubClientInfo,
            "locations" => Self::Locations,
            "sessions" => Self::Sessions,
            "tariffs" => Self::Tariffs,
            "tokens" => Self::Tokens,
            _ => Self::Other(value),
        }
    }
}

impl From<ModuleId> for String {
    fn from(value: ModuleId) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One module endpoint of a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub identifier: ModuleId,
    /// Absent before 2.2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<InterfaceRole>,
    pub url: Url,
}

/// Endpoints a party exposes for one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDetails {
    pub version: VersionId,
    pub endpoints: Vec<Endpoint>,
}

impl VersionDetails {
    /// Endpoint for `module`, preferring `role` when the version has roles
    #[must_use]
    pub fn endpoint(&self, module: &ModuleId, role: Option<InterfaceRole>) -> Option<&Endpoint> {
        let mut candidates = self.endpoints.iter().filter(|e| &e.identifier == module);
        match role {
            Some(role) => {
                let all: Vec<&Endpoint> = candidates.collect();
                all.iter()
                    .find(|e| e.role == Some(role))
                    .or_else(|| all.iter().find(|e| e.role.is_none()))
                    .or_else(|| all.first())
                    .copied()
            }
            None => candidates.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(module: ModuleId, role: Option<InterfaceRole>, url: &str) -> Endpoint {
        Endpoint {
            identifier: module,
            role,
            url: url.parse().unwrap(),
        }
    }

    #[test]
    fn unknown_modules_round_trip() {
        let module: ModuleId = serde_json::from_str("\"bookings\"").unwrap();
        assert_eq!(module, ModuleId::Other("bookings".to_string()));
        assert_eq!(serde_json::to_string(&module).unwrap(), "\"bookings\"");
        assert_eq!(
            serde_json::from_str::<ModuleId>("\"commands\"").unwrap(),
            ModuleId::Commands
        );
    }

    #[test]
    fn endpoint_lookup_prefers_role() {
        let details = VersionDetails {
            version: VersionId::parse("2.2.1").unwrap(),
            endpoints: vec![
                endpoint(
                    ModuleId::Credentials,
                    Some(InterfaceRole::Sender),
                    "https://a/sender",
                ),
                endpoint(
                    ModuleId::Credentials,
                    Some(InterfaceRole::Receiver),
                    "https://a/receiver",
                ),
            ],
        };
        let found = details
            .endpoint(&ModuleId::Credentials, Some(InterfaceRole::Receiver))
            .unwrap();
        assert_eq!(found.url.as_str(), "https://a/receiver");
        assert!(details.endpoint(&ModuleId::Commands, None).is_none());
    }

    #[test]
    fn roleless_endpoints_satisfy_role_lookup() {
        let details = VersionDetails {
            version: VersionId::parse("2.1.1").unwrap(),
            endpoints: vec![endpoint(ModuleId::Commands, None, "https://a/commands")],
        };
        assert!(
            details
                .endpoint(&ModuleId::Commands, Some(InterfaceRole::Receiver))
                .is_some()
        );
        let json = serde_json::to_value(&details).unwrap();
        assert!(json["endpoints"][0].get("role").is_none());
    }
}
