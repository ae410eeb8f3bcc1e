//! HTTP API server: the OCPI surface plus admin and health routes

pub mod admin;
mod auth;
pub mod commands;
pub mod credentials;
pub mod health;
pub mod versions;

pub use auth::{require_api_key, require_party};

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::commands::{CommandDispatcher, CommandHandler, UnsupportedCommands};
use crate::hooks::ExchangeHooks;
use crate::node::{NodeProfile, OCPI_PREFIX};
use crate::ocpi::OcpiResponse;
use crate::parties::PartyRegistry;
use crate::registration::RegistrationProtocol;
use crate::security::TrustValidator;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<NodeProfile>,
    pub registry: PartyRegistry,
    pub registration: RegistrationProtocol,
    pub dispatcher: CommandDispatcher,
    pub trust: TrustValidator,
    pub command_handler: Arc<dyn CommandHandler>,
    pub hooks: Arc<ExchangeHooks>,
    /// Bearer key for `/api`; unset leaves the admin API open
    pub api_key: Option<String>,
    /// `allow_downgrades` for parties added without an explicit choice
    pub allow_downgrades_default: bool,
}

/// An OCPI envelope with its HTTP status
#[derive(Debug)]
pub struct OcpiReply<T>(pub StatusCode, pub OcpiResponse<T>);

impl<T> OcpiReply<T> {
    /// HTTP 200 carrying `response`
    pub const fn ok(response: OcpiResponse<T>) -> Self {
        Self(StatusCode::OK, response)
    }
}

impl<T: Serialize> IntoResponse for OcpiReply<T> {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

/// Every route, with token checks on `/ocpi` and the api key on `/api`
pub fn router(state: Arc<ApiState>) -> Router {
    let ocpi = Router::new()
        .merge(versions::router())
        .merge(credentials::router())
        .merge(commands::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_party,
        ))
        .with_state(state.clone());

    Router::new()
        .nest(&format!("/{OCPI_PREFIX}"), ocpi)
        .nest("/api", admin::router(state.clone()))
        .merge(health::router())
        .merge(health::ready_router(state))
        .layer(TraceLayer::new_for_http())
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    node: Arc<NodeProfile>,
    registration: RegistrationProtocol,
    dispatcher: CommandDispatcher,
    trust: TrustValidator,
    hooks: Arc<ExchangeHooks>,
    port: u16,
    api_key: Option<String>,
    allow_downgrades_default: bool,
    command_handler: Option<Arc<dyn CommandHandler>>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(
        registration: RegistrationProtocol,
        dispatcher: CommandDispatcher,
        trust: TrustValidator,
        hooks: Arc<ExchangeHooks>,
        port: u16,
    ) -> Self {
        Self {
            node: Arc::new(registration.node().clone()),
            registration,
            dispatcher,
            trust,
            hooks,
            port,
            api_key: None,
            allow_downgrades_default: false,
            command_handler: None,
        }
    }

    /// Set API key for admin authentication
    #[must_use]
    pub fn api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    /// Default `allow_downgrades` for parties added through the admin API
    #[must_use]
    pub const fn allow_downgrades_default(mut self, allow: bool) -> Self {
        self.allow_downgrades_default = allow;
        self
    }

    /// Handle inbound commands with `handler`
    #[must_use]
    pub fn command_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.command_handler = Some(handler);
        self
    }

    /// Build the shared state without binding a socket
    #[must_use]
    pub fn state(self) -> Arc<ApiState> {
        Arc::new(ApiState {
            node: self.node,
            registry: self.registration.registry().clone(),
            registration: self.registration,
            dispatcher: self.dispatcher,
            trust: self.trust,
            command_handler: self
                .command_handler
                .unwrap_or_else(|| Arc::new(UnsupportedCommands)),
            hooks: self.hooks,
            api_key: self.api_key,
            allow_downgrades_default: self.allow_downgrades_default,
        })
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let port = self.port;
        ApiServer {
            state: self.state(),
            port,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        if self.state.api_key.is_none() {
            tracing::warn!("no API key configured, admin API is unauthenticated");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(
            port = self.port,
            node = %self.state.node.identity,
            versions_url = %self.state.node.versions_url(),
            "API server listening"
        );

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
