//! Protocol version identifiers and per-version descriptors
//!
//! Every supported OCPI revision runs through the same engine; the few places
//! where revisions differ on the wire are captured by [`VersionDescriptor`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// OCPI 2.1.1
pub const V2_1_1: &str = "2.1.1";

/// OCPI 2.2.1
pub const V2_2_1: &str = "2.2.1";

/// OCPI 2.3.0
pub const V2_3_0: &str = "2.3.0";

/// A protocol version identifier such as `2.2.1`
///
/// Ordering is numeric per component with missing trailing components treated
/// as zero, so `2.3.0 > 2.2.1 > 2.1.1` and `2.10 > 2.9`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId {
    raw: String,
    parts: Vec<u32>,
}

impl VersionId {
    /// Parse a version identifier
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if any dot-separated component is not numeric
    pub fn parse(raw: &str) -> Result<Self> {
        raw.parse()
    }

    fn from_trusted(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            parts: raw.split('.').map(|p| p.parse().unwrap_or(0)).collect(),
        }
    }

    /// The identifier as it appears on the wire
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for VersionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidArgument("empty version id".to_string()));
        }

        let parts = trimmed
            .split('.')
            .map(|p| {
                p.parse::<u32>()
                    .map_err(|_| Error::InvalidArgument(format!("malformed version id '{s}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: trimmed.to_string(),
            parts,
        })
    }
}

impl TryFrom<String> for VersionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VersionId> for String {
    fn from(value: VersionId) -> Self {
        value.raw
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for VersionId {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        // Numerically equal ids ("2.3" vs "2.3.0") still need a total order
        self.raw.cmp(&other.raw)
    }
}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shape of the credentials object on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsShape {
    /// 2.1.1: `{token, url, business_details, party_id, country_code}`
    Flat,
    /// 2.2 onward: `{token, url, roles: [...]}`
    Roles,
}

/// Wire-level differences between protocol revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionDescriptor {
    pub id: &'static str,
    /// Whether endpoints in the version details carry a SENDER/RECEIVER role
    pub endpoint_roles: bool,
    pub credentials_shape: CredentialsShape,
    /// Whether the `Authorization: Token` value is base64-encoded
    pub base64_tokens: bool,
}

impl VersionDescriptor {
    /// Version identifier for this descriptor
    #[must_use]
    pub fn version_id(&self) -> VersionId {
        VersionId::from_trusted(self.id)
    }
}

/// All protocol revisions this engine speaks, oldest first
pub const DESCRIPTORS: &[VersionDescriptor] = &[
    VersionDescriptor {
        id: V2_1_1,
        endpoint_roles: false,
        credentials_shape: CredentialsShape::Flat,
        base64_tokens: false,
    },
    VersionDescriptor {
        id: V2_2_1,
        endpoint_roles: true,
        credentials_shape: CredentialsShape::Roles,
        base64_tokens: true,
    },
    VersionDescriptor {
        id: V2_3_0,
        endpoint_roles: true,
        credentials_shape: CredentialsShape::Roles,
        base64_tokens: true,
    },
];

/// Look up the descriptor for a version id
#[must_use]
pub fn descriptor(version: &VersionId) -> Option<&'static VersionDescriptor> {
    DESCRIPTORS.iter().find(|d| d.id == version.as_str())
}

/// Every version id the engine supports
#[must_use]
pub fn supported_versions() -> Vec<VersionId> {
    DESCRIPTORS.iter().map(VersionDescriptor::version_id).collect()
}
