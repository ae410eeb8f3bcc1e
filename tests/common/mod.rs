//! Shared test utilities: OCPI nodes wired over an in-process network

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use ocpi_gateway::api::{self, ApiServerBuilder, ApiState};
use ocpi_gateway::client::{HttpTransport, LoopbackNetwork, OcpiClient};
use ocpi_gateway::commands::{CommandDispatcher, CommandHandler};
use ocpi_gateway::hooks::ExchangeHooks;
use ocpi_gateway::node::NodeProfile;
use ocpi_gateway::ocpi::{BusinessDetails, V2_1_1, V2_2_1, VersionId};
use ocpi_gateway::parties::{PartyDraft, PartyIdentity, PartyRegistry, RemoteParty};
use ocpi_gateway::registration::RegistrationProtocol;
use ocpi_gateway::security::{AccessToken, TrustValidator};
use url::Url;

/// Token the CPO hands the EMSP out of band before the first handshake
pub const BOOTSTRAP_TOKEN: &str = "bootstrap-token-for-emsp";

pub const CPO: &str = "DE*GEF*CPO";
pub const CPO_AUTHORITY: &str = "localhost:3301";
pub const EMSP: &str = "NL*EMS*EMSP";
pub const EMSP_AUTHORITY: &str = "emsp.test:80";

pub fn identity(raw: &str) -> PartyIdentity {
    raw.parse().expect("valid identity")
}

pub fn version(raw: &str) -> VersionId {
    VersionId::parse(raw).expect("valid version")
}

/// One gateway instance
pub struct TestNode {
    pub node: Arc<NodeProfile>,
    pub registry: PartyRegistry,
    pub registration: RegistrationProtocol,
    pub dispatcher: CommandDispatcher,
    pub state: Arc<ApiState>,
}

impl TestNode {
    pub fn new(
        network: &Arc<LoopbackNetwork>,
        id: &str,
        base_url: &str,
        handler: Option<Arc<dyn CommandHandler>>,
    ) -> Self {
        let identity = identity(id);
        let node = Arc::new(
            NodeProfile::new(
                identity.clone(),
                BusinessDetails {
                    name: format!("{} operator", identity.party_id),
                    website: None,
                },
                Url::parse(base_url).expect("valid base URL"),
                vec![version(V2_2_1), version(V2_1_1)],
            )
            .expect("valid node profile"),
        );

        let registry = PartyRegistry::in_memory();
        let hooks = Arc::new(ExchangeHooks::new());
        let transport: Arc<dyn HttpTransport> = network.clone();
        let client = OcpiClient::new(transport, hooks.clone());

        let registration = RegistrationProtocol::new(node.clone(), registry.clone(), client.clone());
        let dispatcher = CommandDispatcher::new(
            node.clone(),
            registry.clone(),
            client,
            Duration::from_secs(30),
        );
        let trust = TrustValidator::new(registry.clone());

        let mut builder =
            ApiServerBuilder::new(registration.clone(), dispatcher.clone(), trust, hooks, 0)
                .api_key(Some("test-api-key".to_string()));
        if let Some(handler) = handler {
            builder = builder.command_handler(handler);
        }

        Self {
            node,
            registry,
            registration,
            dispatcher,
            state: builder.state(),
        }
    }

    pub fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    pub fn party(&self, id: &str) -> RemoteParty {
        self.registry.get(&identity(id)).expect("party exists")
    }
}

/// A CPO and an EMSP that know each other only by the bootstrap token
pub struct Pair {
    pub network: Arc<LoopbackNetwork>,
    pub cpo: TestNode,
    pub emsp: TestNode,
}

impl Pair {
    pub fn new() -> Self {
        Self::with_cpo_handler(None)
    }

    pub fn with_cpo_handler(handler: Option<Arc<dyn CommandHandler>>) -> Self {
        let network = Arc::new(LoopbackNetwork::new());
        let cpo = TestNode::new(&network, CPO, "http://localhost:3301", handler);
        let emsp = TestNode::new(&network, EMSP, "http://emsp.test", None);

        network.bind(CPO_AUTHORITY, cpo.router());
        network.bind(EMSP_AUTHORITY, emsp.router());

        cpo.registry
            .add_or_update(PartyDraft::new(identity(EMSP)).local_token(AccessToken::new(BOOTSTRAP_TOKEN)))
            .expect("add EMSP to CPO");
        emsp.registry
            .add_or_update(
                PartyDraft::new(identity(CPO))
                    .remote_token(AccessToken::new(BOOTSTRAP_TOKEN))
                    .versions_url(cpo.node.versions_url()),
            )
            .expect("add CPO to EMSP");

        Self { network, cpo, emsp }
    }

    /// The EMSP registers with the CPO
    pub async fn register(&self) -> RemoteParty {
        let response = self
            .emsp
            .registration
            .register(&identity(CPO), Default::default())
            .await;
        assert!(
            response.is_success(),
            "registration failed: {} {:?}",
            response.status_code,
            response.status_message
        );
        response.data.expect("registered party")
    }

    /// Both sides hold matching token pairs
    pub fn assert_tokens_aligned(&self) {
        let at_emsp = self.emsp.party(CPO);
        let at_cpo = self.cpo.party(EMSP);
        assert_eq!(at_emsp.remote_access_token, at_cpo.local_access_token);
        assert_eq!(at_emsp.local_access_token, at_cpo.remote_access_token);
        assert!(at_emsp.remote_access_token.is_some());
        assert!(at_emsp.local_access_token.is_some());
    }
}
