//! The credentials object exchanged during registration

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use super::version::CredentialsShape;
use crate::parties::Role;
use crate::{Error, Result};

/// Business details of a party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessDetails {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// One business role a party acts in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsRole {
    pub role: Role,
    pub party_id: String,
    pub country_code: String,
    pub business_details: BusinessDetails,
}

impl CredentialsRole {
    /// Whether `other` describes the same role for the same party
    #[must_use]
    pub fn same_role(&self, other: &Self) -> bool {
        self.role == other.role
            && self.party_id.eq_ignore_ascii_case(&other.party_id)
            && self.country_code.eq_ignore_ascii_case(&other.country_code)
    }
}

/// Credentials a party hands to its counterparty
///
/// The token is the secret the receiver must present when calling back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    /// The party's `/versions` URL
    pub url: Url,
    pub roles: Vec<CredentialsRole>,
}

#[derive(Serialize, Deserialize)]
struct RolesWire {
    token: String,
    url: Url,
    roles: Vec<CredentialsRole>,
}

#[derive(Serialize, Deserialize)]
struct FlatWire {
    token: String,
    url: Url,
    business_details: BusinessDetails,
    party_id: String,
    country_code: String,
}

impl Credentials {
    /// Render in the payload shape of a protocol revision
    ///
    /// The flat 2.1.1 shape carries a single role; the first one is used.
    #[must_use]
    pub fn to_wire(&self, shape: CredentialsShape) -> Value {
        match (shape, self.roles.first()) {
            (CredentialsShape::Flat, Some(first)) => json!(FlatWire {
                token: self.token.clone(),
                url: self.url.clone(),
                business_details: first.business_details.clone(),
                party_id: first.party_id.clone(),
                country_code: first.country_code.clone(),
            }),
            (CredentialsShape::Flat, None) => json!({
                "token": self.token,
                "url": self.url,
            }),
            (CredentialsShape::Roles, _) => json!(RolesWire {
                token: self.token.clone(),
                url: self.url.clone(),
                roles: self.roles.clone(),
            }),
        }
    }

    /// Parse either payload shape
    ///
    /// A flat payload has no role field, so `flat_role` supplies it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the value matches neither shape
    pub fn from_wire(value: Value, flat_role: Role) -> Result<Self> {
        if value.get("roles").is_some() {
            let wire: RolesWire = serde_json::from_value(value)
                .map_err(|e| Error::InvalidArgument(format!("malformed credentials: {e}")))?;
            return Ok(Self {
                token: wire.token,
                url: wire.url,
                roles: wire.roles,
            });
        }

        let wire: FlatWire = serde_json::from_value(value)
            .map_err(|e| Error::InvalidArgument(format!("malformed credentials: {e}")))?;
        Ok(Self {
            token: wire.token,
            url: wire.url,
            roles: vec![CredentialsRole {
                role: flat_role,
                party_id: wire.party_id,
                country_code: wire.country_code,
                business_details: wire.business_details,
            }],
        })
    }
}
