//! This node's own OCPI identity and the catalogue it advertises

use url::Url;

use crate::ocpi::{
    BusinessDetails, CommandType, Credentials, CredentialsRole, CredentialsShape, Endpoint,
    InterfaceRole, ModuleId, VersionDetails, VersionId, VersionInfo, descriptor,
};
use crate::parties::{PartyIdentity, Role};
use crate::{Error, Result};

/// Path prefix of every OCPI route
pub const OCPI_PREFIX: &str = "ocpi";

/// Identity, roles and offered versions of the local node
#[derive(Debug, Clone)]
pub struct NodeProfile {
    pub identity: PartyIdentity,
    pub business_details: BusinessDetails,
    /// Additional roles beyond the primary identity
    pub extra_roles: Vec<Role>,
    /// Public base URL, e.g. `http://localhost:3301`
    pub base_url: Url,
    /// Offered versions, every one of which has a descriptor
    pub versions: Vec<VersionId>,
}

impl NodeProfile {
    /// Build a profile
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a version is not supported or the base
    /// URL cannot carry a path
    pub fn new(
        identity: PartyIdentity,
        business_details: BusinessDetails,
        base_url: Url,
        versions: Vec<VersionId>,
    ) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidArgument(format!(
                "base URL '{base_url}' cannot carry a path"
            )));
        }
        if versions.is_empty() {
            return Err(Error::InvalidArgument("no versions offered".to_string()));
        }
        if let Some(unknown) = versions.iter().find(|v| descriptor(v).is_none()) {
            return Err(Error::InvalidArgument(format!(
                "unsupported version '{unknown}'"
            )));
        }

        Ok(Self {
            identity,
            business_details,
            extra_roles: Vec::new(),
            base_url,
            versions,
        })
    }

    /// Add roles the node also acts in
    #[must_use]
    pub fn with_extra_roles(mut self, roles: Vec<Role>) -> Self {
        self.extra_roles = roles;
        self
    }

    /// All roles, primary first
    #[must_use]
    pub fn roles(&self) -> Vec<Role> {
        let mut roles = vec![self.identity.role];
        for role in &self.extra_roles {
            if !roles.contains(role) {
                roles.push(*role);
            }
        }
        roles
    }

    /// Credentials roles advertised in the handshake
    #[must_use]
    pub fn credentials_roles(&self) -> Vec<CredentialsRole> {
        self.roles()
            .into_iter()
            .map(|role| CredentialsRole {
                role,
                party_id: self.identity.party_id.clone(),
                country_code: self.identity.country_code.clone(),
                business_details: self.business_details.clone(),
            })
            .collect()
    }

    /// Our credentials carrying `token`
    #[must_use]
    pub fn credentials(&self, token: &str) -> Credentials {
        Credentials {
            token: token.to_string(),
            url: self.versions_url(),
            roles: self.credentials_roles(),
        }
    }

    /// Whether `version` is offered
    #[must_use]
    pub fn offers(&self, version: &VersionId) -> bool {
        self.versions.contains(version)
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    /// `{base}/ocpi/versions`
    #[must_use]
    pub fn versions_url(&self) -> Url {
        self.url(&[OCPI_PREFIX, "versions"])
    }

    /// `{base}/ocpi/versions/{version}`
    #[must_use]
    pub fn version_url(&self, version: &VersionId) -> Url {
        self.url(&[OCPI_PREFIX, "versions", version.as_str()])
    }

    /// `{base}/ocpi/{version}/{module}`
    #[must_use]
    pub fn module_url(&self, version: &VersionId, module: &ModuleId) -> Url {
        self.url(&[OCPI_PREFIX, version.as_str(), module.as_str()])
    }

    /// Callback URL for one dispatched command
    #[must_use]
    pub fn command_callback_url(
        &self,
        version: &VersionId,
        command: CommandType,
        request_id: &str,
    ) -> Url {
        self.url(&[
            OCPI_PREFIX,
            version.as_str(),
            ModuleId::Commands.as_str(),
            command.as_str(),
            request_id,
        ])
    }

    /// The `/versions` list
    #[must_use]
    pub fn version_infos(&self) -> Vec<VersionInfo> {
        self.versions
            .iter()
            .map(|version| VersionInfo {
                version: version.clone(),
                url: self.version_url(version),
            })
            .collect()
    }

    /// Endpoints advertised for `version`, `None` if not offered
    #[must_use]
    pub fn version_details(&self, version: &VersionId) -> Option<VersionDetails> {
        if !self.offers(version) {
            return None;
        }
        let descriptor = descriptor(version)?;

        let mut endpoints: Vec<Endpoint> = Vec::new();
        for role in self.roles() {
            for (module, interface) in modules_for(role) {
                if descriptor.credentials_shape == CredentialsShape::Flat
                    && module == ModuleId::ChargingProfiles
                {
                    continue;
                }
                let endpoint = Endpoint {
                    url: self.module_url(version, &module),
                    role: descriptor.endpoint_roles.then_some(interface),
                    identifier: module,
                };
                if !endpoints.contains(&endpoint) {
                    endpoints.push(endpoint);
                }
            }
        }

        Some(VersionDetails {
            version: version.clone(),
            endpoints,
        })
    }
}

/// Modules and interface roles implemented per business role
fn modules_for(role: Role) -> Vec<(ModuleId, InterfaceRole)> {
    use InterfaceRole::{Receiver, Sender};

    let mut modules = vec![
        (ModuleId::Credentials, Sender),
        (ModuleId::Credentials, Receiver),
    ];
    match role {
        Role::Cpo => modules.extend([
            (ModuleId::Locations, Sender),
            (ModuleId::Tariffs, Sender),
            (ModuleId::Sessions, Sender),
            (ModuleId::Cdrs, Sender),
            (ModuleId::Commands, Receiver),
            (ModuleId::Tokens, Receiver),
            (ModuleId::ChargingProfiles, Receiver),
        ]),
        Role::Emsp => modules.extend([
            (ModuleId::Locations, Receiver),
            (ModuleId::Tariffs, Receiver),
            (ModuleId::Sessions, Receiver),
            (ModuleId::Cdrs, Receiver),
            (ModuleId::Commands, Sender),
            (ModuleId::Tokens, Sender),
        ]),
        Role::Ptp => modules.extend([
            (ModuleId::Locations, Receiver),
            (ModuleId::Tariffs, Receiver),
            (ModuleId::Sessions, Receiver),
            (ModuleId::Cdrs, Receiver),
        ]),
        _ => {}
    }
    modules
}
