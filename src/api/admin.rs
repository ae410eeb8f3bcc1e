//! Admin API: party management, registration and command dispatch

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{ApiState, auth::require_api_key};
use crate::Error;
use crate::commands::{CommandOutcome, CommandState};
use crate::ocpi::{
    Command, CommandResponse, CommandResult, CommandType, CredentialsRole, Endpoint, OcpiResponse,
    VersionId,
};
use crate::parties::{
    LocalAccessStatus, PartyDraft, PartyIdentity, PartyStatus, RemoteAccessStatus, RemoteParty,
};
use crate::registration::RegisterOptions;
use crate::security::{AccessToken, TlsMaterial, TlsProtocol, TotpConfig};

// --- Request/Response types ---

/// A party record without its secrets
#[derive(Debug, Serialize)]
pub struct PartyView {
    pub identity: String,
    pub roles: Vec<CredentialsRole>,
    pub party_status: PartyStatus,
    pub local_access_status: LocalAccessStatus,
    pub remote_access_status: RemoteAccessStatus,
    pub versions_url: Option<Url>,
    pub version_ids: Vec<VersionId>,
    pub selected_version: Option<VersionId>,
    pub endpoints: Vec<Endpoint>,
    pub has_local_token: bool,
    pub has_remote_token: bool,
    pub totp: bool,
    pub tls_protocols: Vec<TlsProtocol>,
    pub allow_downgrades: bool,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RemoteParty> for PartyView {
    fn from(p: RemoteParty) -> Self {
        Self {
            identity: p.identity.to_string(),
            has_local_token: p.local_access_token.is_some(),
            has_remote_token: p.remote_access_token.is_some(),
            totp: p.local_totp.is_some() || p.remote_totp.is_some(),
            tls_protocols: p.tls.as_ref().map(|t| t.protocols.clone()).unwrap_or_default(),
            roles: p.credentials_roles,
            party_status: p.party_status,
            local_access_status: p.local_access_status,
            remote_access_status: p.remote_access_status,
            versions_url: p.remote_versions_url,
            version_ids: p.remote_version_ids,
            selected_version: p.selected_version,
            endpoints: p.remote_endpoints,
            allow_downgrades: p.allow_downgrades,
            revision: p.revision,
            created_at: p.created,
            updated_at: p.last_updated,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpsertPartyRequest {
    pub identity: String,
    #[serde(default)]
    pub versions_url: Option<Url>,
    /// Token the party must present to us
    #[serde(default)]
    pub local_token: Option<String>,
    /// Bootstrap token we present to the party
    #[serde(default)]
    pub remote_token: Option<String>,
    #[serde(default)]
    pub local_totp: Option<TotpConfig>,
    #[serde(default)]
    pub remote_totp: Option<TotpConfig>,
    #[serde(default)]
    pub roles: Vec<CredentialsRole>,
    #[serde(default)]
    pub tls: Option<TlsMaterial>,
    #[serde(default)]
    pub status: Option<PartyStatus>,
    #[serde(default)]
    pub allow_downgrades: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: PartyStatus,
    /// Expected revision, defaults to the current one
    #[serde(default)]
    pub revision: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    /// Pin the version instead of selecting the highest common one
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: CommandType,
    /// Command payload; `response_url` is filled in by the dispatcher
    pub payload: Value,
    /// Wait for the asynchronous result before answering
    #[serde(default)]
    pub wait: bool,
    /// Deadline in seconds, defaults to the configured command timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CommandDispatchResponse {
    pub request_id: String,
    pub correlation_id: String,
    pub response: OcpiResponse<CommandResponse>,
    pub state: Option<CommandState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
}

#[derive(Debug, Serialize)]
pub struct CommandStateResponse {
    pub request_id: String,
    pub state: CommandState,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, code: &str, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
            },
        }),
    )
}

fn map_error(e: &Error) -> ApiError {
    let message = e.to_string();
    match e {
        Error::NotFound(_) => error_response(StatusCode::NOT_FOUND, "not_found", &message),
        Error::InvalidArgument(_) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_argument", &message)
        }
        Error::DuplicateParty(_) => {
            error_response(StatusCode::CONFLICT, "duplicate_party", &message)
        }
        Error::ConcurrentModification { .. } => {
            error_response(StatusCode::CONFLICT, "concurrent_modification", &message)
        }
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_error", &message),
    }
}

fn parse_identity(raw: &str) -> Result<PartyIdentity, ApiError> {
    raw.parse().map_err(|e: Error| map_error(&e))
}

/// HTTP status for an envelope produced by the engine
fn envelope_status<T>(response: &OcpiResponse<T>) -> StatusCode {
    if response.is_success() {
        StatusCode::OK
    } else if response
        .local_error
        .as_ref()
        .is_some_and(crate::ocpi::LocalError::is_retryable)
    {
        StatusCode::CONFLICT
    } else if response.is_local_error() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::BAD_GATEWAY
    }
}

// --- Handlers ---

/// Filter for the party listing
#[derive(Debug, Default, Deserialize)]
struct ListPartiesQuery {
    status: Option<PartyStatus>,
}

/// List parties, optionally only those with one status
async fn list_parties(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListPartiesQuery>,
) -> Result<Json<Vec<PartyView>>, ApiError> {
    let parties = match query.status {
        Some(status) => state.registry.list_by_status(status),
        None => state.registry.list(),
    }
    .map_err(|e| map_error(&e))?;
    Ok(Json(parties.into_iter().map(PartyView::from).collect()))
}

/// Get one party
async fn get_party(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Result<Json<PartyView>, ApiError> {
    let identity = parse_identity(&identity)?;
    let party = state.registry.get(&identity).map_err(|e| map_error(&e))?;
    Ok(Json(party.into()))
}

/// Add a party or update its configuration
async fn upsert_party(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<UpsertPartyRequest>,
) -> Result<(StatusCode, Json<PartyView>), ApiError> {
    let identity = parse_identity(&req.identity)?;
    let existing = state.registry.find(&identity).map_err(|e| map_error(&e))?;

    let mut draft = PartyDraft::new(identity)
        .roles(req.roles)
        .status(
            req.status
                .or(existing.as_ref().map(|p| p.party_status))
                .unwrap_or(PartyStatus::Enabled),
        )
        .allow_downgrades(
            req.allow_downgrades
                .or(existing.as_ref().map(|p| p.allow_downgrades))
                .unwrap_or(state.allow_downgrades_default),
        );
    if let Some(url) = req.versions_url {
        draft = draft.versions_url(url);
    }
    if let Some(token) = req.local_token {
        draft = draft.local_token(AccessToken::new(token));
    }
    if let Some(token) = req.remote_token {
        draft = draft.remote_token(AccessToken::new(token));
    }
    if let Some(totp) = req.local_totp {
        draft = draft.local_totp(totp);
    }
    if let Some(totp) = req.remote_totp {
        draft = draft.remote_totp(totp);
    }
    if let Some(tls) = req.tls {
        draft = draft.tls(Arc::new(tls));
    }

    let party = state
        .registry
        .add_or_update(draft)
        .map_err(|e| map_error(&e))?;
    let status = if existing.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(party.into())))
}

/// Remove a party
async fn delete_party(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = parse_identity(&identity)?;
    state
        .registry
        .remove(&identity)
        .map_err(|e| map_error(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Enable or disable a party
async fn set_status(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<PartyView>, ApiError> {
    let identity = parse_identity(&identity)?;
    let revision = match req.revision {
        Some(revision) => revision,
        None => {
            state
                .registry
                .get(&identity)
                .map_err(|e| map_error(&e))?
                .revision
        }
    };
    let party = state
        .registry
        .set_party_status(&identity, revision, req.status)
        .map_err(|e| map_error(&e))?;
    Ok(Json(party.into()))
}

/// Run the credentials handshake with a party
async fn register(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OcpiResponse<PartyView>>), ApiError> {
    let identity = parse_identity(&identity)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let options = match req.version {
        Some(version) => RegisterOptions::version(
            VersionId::parse(&version).map_err(|e| map_error(&e))?,
        ),
        None => RegisterOptions::default(),
    };

    let response = state.registration.register(&identity, options).await;
    let status = envelope_status(&response);
    Ok((status, Json(response.map(PartyView::from))))
}

/// End the registration with a party
async fn unregister(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Result<(StatusCode, Json<OcpiResponse<PartyView>>), ApiError> {
    let identity = parse_identity(&identity)?;
    let response = state.registration.unregister(&identity).await;
    let status = envelope_status(&response);
    Ok((status, Json(response.map(PartyView::from))))
}

/// Send a command to a party
async fn send_command(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
    Json(req): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandDispatchResponse>), ApiError> {
    let identity = parse_identity(&identity)?;

    let mut payload = req.payload;
    if let Some(object) = payload.as_object_mut() {
        object
            .entry("response_url")
            .or_insert_with(|| Value::String(state.node.versions_url().to_string()));
    }
    let command = Command::from_body(req.command, payload).map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, "invalid_payload", &e.to_string())
    })?;

    let timeout = req
        .timeout_secs
        .map_or_else(|| state.dispatcher.timeout(), Duration::from_secs);
    let dispatched = state
        .dispatcher
        .send_command_with_timeout(&identity, command, timeout)
        .await;

    let request_id = dispatched.request_id.clone();
    let correlation_id = dispatched.correlation_id.clone();
    let response = dispatched.response.clone();
    let status = envelope_status(&response);

    let (state_now, result) = if req.wait {
        let CommandOutcome {
            state: resolved,
            result,
            ..
        } = dispatched.outcome().await;
        (Some(resolved), Some(result))
    } else {
        (state.dispatcher.state(&request_id), None)
    };

    Ok((
        status,
        Json(CommandDispatchResponse {
            request_id,
            correlation_id,
            response,
            state: state_now,
            result,
        }),
    ))
}

/// State of a dispatched command
async fn command_state(
    State(state): State<Arc<ApiState>>,
    Path(request_id): Path<String>,
) -> Result<Json<CommandStateResponse>, ApiError> {
    let current = state.dispatcher.state(&request_id).ok_or_else(|| {
        error_response(StatusCode::NOT_FOUND, "not_found", "Unknown request id")
    })?;
    Ok(Json(CommandStateResponse {
        request_id,
        state: current,
    }))
}

/// Build admin router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/parties", get(list_parties).post(upsert_party))
        .route("/parties/{identity}", get(get_party).delete(delete_party))
        .route("/parties/{identity}/status", put(set_status))
        .route("/parties/{identity}/register", post(register))
        .route("/parties/{identity}/unregister", post(unregister))
        .route("/parties/{identity}/commands", post(send_command))
        .route("/commands/{request_id}", get(command_state))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .with_state(state)
}
