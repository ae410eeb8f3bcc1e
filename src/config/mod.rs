//! Configuration management for the OCPI gateway
//!
//! Every value resolves env > TOML file > default. Environment variables use
//! the `OCPI_` prefix.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::node::NodeProfile;
use crate::ocpi::{BusinessDetails, V2_1_1, V2_2_1, V2_3_0, VersionId};
use crate::parties::{PartyIdentity, Role};
use crate::security::{TlsProtocol, all_protocols};
use crate::{Error, Result};

use file::GatewayConfigFile;

/// Default listen port
pub const DEFAULT_PORT: u16 = 3301;

/// SQLite path meaning "keep parties in memory"
pub const MEMORY_DATABASE: &str = ":memory:";

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// This node's identity and catalogue
    pub node: NodeConfig,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,

    /// Party store configuration
    pub storage: StorageConfig,

    /// Outbound request timeout
    pub request_timeout: Duration,

    /// How long a dispatched command waits for its result callback
    pub command_timeout: Duration,

    /// `allow_downgrades` for parties added without an explicit choice
    pub allow_downgrades: bool,

    /// TLS configuration
    pub tls: TlsConfig,
}

/// Node identity configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub identity: PartyIdentity,
    pub extra_roles: Vec<Role>,
    pub business_name: String,
    pub website: Option<String>,
    /// Public base URL, e.g. `https://ocpi.example.com`
    pub base_url: Url,
    pub versions: Vec<VersionId>,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// API key for admin endpoints (from `OCPI_API_KEY` env)
    pub api_key: Option<String>,
}

/// Party store configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to data directory
    pub data_dir: PathBuf,

    /// SQLite database, `None` for the in-memory store
    pub database: Option<PathBuf>,
}

/// TLS configuration
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Protocols allowed on outbound connections
    pub protocols: Vec<TlsProtocol>,

    /// Reject inbound requests without a valid client certificate
    pub require_client_certificates: bool,
}

fn list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns `Config` if a value cannot be parsed
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(&fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns `Config` if a value cannot be parsed
    pub fn resolve(fc: &GatewayConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // API server config (env > toml > default)
        let port = match env("OCPI_PORT").or_else(|| env("PORT")) {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid port '{raw}'")))?,
            None => fc.server.port.unwrap_or(DEFAULT_PORT),
        };
        let api_server = ApiServerConfig {
            port,
            api_key: env("OCPI_API_KEY").or_else(|| fc.server.api_key.clone()),
        };

        let node = Self::resolve_node(fc, &env, port)?;

        // Data directory (~/.local/share/ocpi/gateway on Linux)
        let data_dir = env("OCPI_DATA_DIR")
            .or_else(|| fc.storage.data_dir.clone())
            .map_or_else(
                || {
                    directories::BaseDirs::new().map_or_else(
                        || PathBuf::from(".local/share/ocpi/gateway"),
                        |d| d.data_dir().join("ocpi").join("gateway"),
                    )
                },
                PathBuf::from,
            );
        let database = match env("OCPI_DB_PATH").or_else(|| fc.storage.database.clone()) {
            Some(path) if path == MEMORY_DATABASE => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(data_dir.join("parties.db")),
        };

        let secs = |key: &str, file: Option<u64>, default: u64| -> Result<Duration> {
            let value = match env(key) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid {key} '{raw}'")))?,
                None => file.unwrap_or(default),
            };
            Ok(Duration::from_secs(value))
        };
        let request_timeout = secs(
            "OCPI_REQUEST_TIMEOUT_SECS",
            fc.protocol.request_timeout_secs,
            30,
        )?;
        let command_timeout = secs(
            "OCPI_COMMAND_TIMEOUT_SECS",
            fc.protocol.command_timeout_secs,
            120,
        )?;

        let allow_downgrades = env("OCPI_ALLOW_DOWNGRADES")
            .and_then(|raw| parse_bool(&raw))
            .or(fc.protocol.allow_downgrades)
            .unwrap_or(false);

        let protocols = match env("OCPI_TLS_PROTOCOLS")
            .map(|raw| list(&raw))
            .or_else(|| fc.tls.protocols.clone())
        {
            Some(raw) => raw
                .iter()
                .map(|p| {
                    TlsProtocol::parse(p)
                        .ok_or_else(|| Error::Config(format!("unknown TLS protocol '{p}'")))
                })
                .collect::<Result<Vec<_>>>()?,
            None => all_protocols(),
        };
        let tls = TlsConfig {
            protocols,
            require_client_certificates: env("OCPI_REQUIRE_CLIENT_CERTIFICATES")
                .and_then(|raw| parse_bool(&raw))
                .or(fc.tls.require_client_certificates)
                .unwrap_or(false),
        };

        Ok(Self {
            node,
            api_server,
            storage: StorageConfig { data_dir, database },
            request_timeout,
            command_timeout,
            allow_downgrades,
            tls,
        })
    }

    fn resolve_node(
        fc: &GatewayConfigFile,
        env: &impl Fn(&str) -> Option<String>,
        port: u16,
    ) -> Result<NodeConfig> {
        let identity: PartyIdentity = env("OCPI_IDENTITY")
            .or_else(|| fc.node.identity.clone())
            .unwrap_or_else(|| "NL*GWY*CPO".to_string())
            .parse()
            .map_err(|e| Error::Config(format!("node identity: {e}")))?;

        let extra_roles = env("OCPI_EXTRA_ROLES")
            .map(|raw| list(&raw))
            .or_else(|| fc.node.extra_roles.clone())
            .unwrap_or_default()
            .iter()
            .map(|r| {
                r.parse::<Role>()
                    .map_err(|e| Error::Config(format!("extra role: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let base_url = env("OCPI_BASE_URL")
            .or_else(|| fc.node.base_url.clone())
            .unwrap_or_else(|| format!("http://localhost:{port}"));
        let base_url = Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("base URL '{base_url}': {e}")))?;

        let versions = env("OCPI_VERSIONS")
            .map(|raw| list(&raw))
            .or_else(|| fc.node.versions.clone())
            .unwrap_or_else(|| {
                [V2_3_0, V2_2_1, V2_1_1]
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            })
            .iter()
            .map(|v| VersionId::parse(v).map_err(|e| Error::Config(format!("version: {e}"))))
            .collect::<Result<Vec<_>>>()?;

        Ok(NodeConfig {
            business_name: env("OCPI_BUSINESS_NAME")
                .or_else(|| fc.node.business_name.clone())
                .unwrap_or_else(|| identity.party_id.clone()),
            website: env("OCPI_WEBSITE").or_else(|| fc.node.website.clone()),
            identity,
            extra_roles,
            base_url,
            versions,
        })
    }

    /// The node profile described by this configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the base URL or versions are unusable
    pub fn node_profile(&self) -> Result<NodeProfile> {
        let profile = NodeProfile::new(
            self.node.identity.clone(),
            BusinessDetails {
                name: self.node.business_name.clone(),
                website: self.node.website.clone(),
            },
            self.node.base_url.clone(),
            self.node.versions.clone(),
        )?;
        Ok(profile.with_extra_roles(self.node.extra_roles.clone()))
    }
}
