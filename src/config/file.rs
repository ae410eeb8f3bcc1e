//! TOML configuration file loading
//!
//! Supports `~/.config/ocpi/gateway/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct GatewayConfigFile {
    /// Identity and catalogue of this node
    #[serde(default)]
    pub node: NodeFileConfig,

    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Party store location
    #[serde(default)]
    pub storage: StorageFileConfig,

    /// Handshake and command behaviour
    #[serde(default)]
    pub protocol: ProtocolFileConfig,

    /// TLS restrictions for outbound and inbound connections
    #[serde(default)]
    pub tls: TlsFileConfig,
}

/// Node identity configuration
#[derive(Debug, Default, Deserialize)]
pub struct NodeFileConfig {
    /// Identity in `CC*PID*ROLE` form (e.g. "DE*GEF*CPO")
    pub identity: Option<String>,

    /// Roles beyond the primary one (e.g. ["EMSP"])
    pub extra_roles: Option<Vec<String>>,

    /// Business name advertised in credentials
    pub business_name: Option<String>,

    pub website: Option<String>,

    /// Public base URL other parties reach us at
    pub base_url: Option<String>,

    /// Offered versions (e.g. ["2.2.1", "2.1.1"])
    pub versions: Option<Vec<String>>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Bearer key for the admin API
    pub api_key: Option<String>,
}

/// Storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    pub data_dir: Option<String>,

    /// SQLite database path, or ":memory:" for an ephemeral store
    pub database: Option<String>,
}

/// Protocol behaviour
#[derive(Debug, Default, Deserialize)]
pub struct ProtocolFileConfig {
    /// Outbound request timeout in seconds
    pub request_timeout_secs: Option<u64>,

    /// Seconds to wait for a command result callback
    pub command_timeout_secs: Option<u64>,

    /// `allow_downgrades` for newly added parties
    pub allow_downgrades: Option<bool>,
}

/// TLS configuration
#[derive(Debug, Default, Deserialize)]
pub struct TlsFileConfig {
    /// Protocols allowed on outbound connections (e.g. ["1.2", "1.3"])
    pub protocols: Option<Vec<String>>,

    /// Reject inbound requests without a valid client certificate
    pub require_client_certificates: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `GatewayConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> GatewayConfigFile {
    config_file_path().map_or_else(GatewayConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from `path`
pub fn load_from(path: &Path) -> GatewayConfigFile {
    if !path.exists() {
        return GatewayConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                GatewayConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            GatewayConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/ocpi/gateway/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("ocpi")
            .join("gateway")
            .join("config.toml")
    })
}
