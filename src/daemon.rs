//! Daemon - the main gateway service
//!
//! Wires the party store, registration protocol, command dispatcher and
//! trust validator together and serves the HTTP API

use std::sync::Arc;

use crate::api::{ApiServerBuilder, ApiState};
use crate::client::{OcpiClient, ReqwestTransport};
use crate::commands::CommandDispatcher;
use crate::db::{self, SqlitePartyStore};
use crate::hooks::ExchangeHooks;
use crate::parties::{MemoryPartyStore, PartyRegistry, PartyStore};
use crate::registration::RegistrationProtocol;
use crate::security::TrustValidator;
use crate::{Config, Error, Result};

/// The gateway daemon
pub struct Daemon {
    config: Config,
    registration: RegistrationProtocol,
    dispatcher: CommandDispatcher,
    trust: TrustValidator,
    hooks: Arc<ExchangeHooks>,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if the party store or HTTP client cannot be initialized
    pub fn new(config: Config) -> Result<Self> {
        let node = Arc::new(config.node_profile()?);
        let registry = PartyRegistry::new(open_store(&config)?);

        let transport = ReqwestTransport::new(config.request_timeout)?
            .with_default_protocols(&config.tls.protocols)?;
        let hooks = Arc::new(ExchangeHooks::with_tracing());
        let client = OcpiClient::new(Arc::new(transport), hooks.clone());

        let registration = RegistrationProtocol::new(node.clone(), registry.clone(), client.clone());
        let dispatcher =
            CommandDispatcher::new(node, registry.clone(), client, config.command_timeout);
        let trust = TrustValidator::new(registry)
            .require_client_certificates(config.tls.require_client_certificates);

        Ok(Self {
            config,
            registration,
            dispatcher,
            trust,
            hooks,
        })
    }

    /// The party registry
    #[must_use]
    pub const fn registry(&self) -> &PartyRegistry {
        self.registration.registry()
    }

    /// The registration protocol
    #[must_use]
    pub const fn registration(&self) -> &RegistrationProtocol {
        &self.registration
    }

    /// The command dispatcher
    #[must_use]
    pub const fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    fn api(&self) -> ApiServerBuilder {
        ApiServerBuilder::new(
            self.registration.clone(),
            self.dispatcher.clone(),
            self.trust.clone(),
            self.hooks.clone(),
            self.config.api_server.port,
        )
        .api_key(self.config.api_server.api_key.clone())
        .allow_downgrades_default(self.config.allow_downgrades)
    }

    /// Shared API state, for serving the routes on a custom listener
    #[must_use]
    pub fn api_state(&self) -> Arc<ApiState> {
        self.api().state()
    }

    /// Start the API server in the background
    ///
    /// Counterparties call back into `/ocpi` while a handshake runs, so
    /// one-shot registrations need the server up too.
    #[must_use]
    pub fn spawn_api(&self) -> tokio::task::JoinHandle<Result<()>> {
        self.api().build().spawn()
    }

    /// Run the gateway until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails
    pub async fn run(self) -> Result<()> {
        let parties = self.registry().list()?.len();
        tracing::info!(
            node = %self.registration.node().identity,
            parties,
            "gateway started"
        );

        let server = self.spawn_api();

        tokio::select! {
            result = server => {
                result.map_err(|e| Error::Config(format!("API server task failed: {e}")))??;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(
                    pending_commands = self.dispatcher.pending_count(),
                    "shutting down"
                );
            }
        }

        Ok(())
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn PartyStore>> {
    let Some(path) = &config.storage.database else {
        tracing::warn!("using in-memory party store, parties are lost on exit");
        return Ok(Arc::new(MemoryPartyStore::new()));
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let pool = db::init(path)?;
    tracing::info!(path = %path.display(), "party store opened");
    Ok(Arc::new(SqlitePartyStore::new(pool)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::file::GatewayConfigFile;
    use crate::parties::{PartyDraft, PartyIdentity};

    fn config(vars: &[(&str, String)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        Config::resolve(&GatewayConfigFile::default(), |key| vars.get(key).cloned()).unwrap()
    }

    #[tokio::test]
    async fn memory_store_daemon() {
        let daemon = Daemon::new(config(&[("OCPI_DB_PATH", ":memory:".to_string())])).unwrap();
        assert!(daemon.registry().list().unwrap().is_empty());
        assert_eq!(daemon.dispatcher().pending_count(), 0);
        assert_eq!(daemon.api_state().node.identity.to_string(), "NL*GWY*CPO");
    }

    #[tokio::test]
    async fn sqlite_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("parties.db");
        let vars = [("OCPI_DB_PATH", db.display().to_string())];
        let identity: PartyIdentity = "DE*GEF*EMSP".parse().unwrap();

        let daemon = Daemon::new(config(&vars)).unwrap();
        daemon
            .registry()
            .add_or_update(PartyDraft::new(identity.clone()))
            .unwrap();
        drop(daemon);

        let daemon = Daemon::new(config(&vars)).unwrap();
        assert!(daemon.registry().find(&identity).unwrap().is_some());
    }
}
