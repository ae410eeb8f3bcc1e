//! `/ocpi/{version}/credentials`

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::get,
};
use serde_json::Value;

use super::{ApiState, OcpiReply};
use crate::ocpi::{OcpiResponse, status};
use crate::registration::ReceiverReply;
use crate::security::AuthenticatedParty;

impl From<ReceiverReply> for OcpiReply<Value> {
    fn from(reply: ReceiverReply) -> Self {
        Self(reply.status, reply.body)
    }
}

fn invalid_body() -> OcpiReply<Value> {
    OcpiReply(
        StatusCode::BAD_REQUEST,
        OcpiResponse::error(status::INVALID_PARAMETERS, "Request body is not JSON"),
    )
}

async fn get_credentials(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<AuthenticatedParty>,
    Path(version): Path<String>,
) -> OcpiReply<Value> {
    state.registration.handle_get(&caller, &version).into()
}

async fn post_credentials(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<AuthenticatedParty>,
    Path(version): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> OcpiReply<Value> {
    let Ok(Json(body)) = body else {
        return invalid_body();
    };
    tracing::info!(party = %caller.party.identity, %version, "credentials POST");
    state
        .registration
        .handle_post(&caller, &version, body)
        .await
        .into()
}

async fn put_credentials(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<AuthenticatedParty>,
    Path(version): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> OcpiReply<Value> {
    let Ok(Json(body)) = body else {
        return invalid_body();
    };
    tracing::info!(party = %caller.party.identity, %version, "credentials PUT");
    state
        .registration
        .handle_put(&caller, &version, body)
        .await
        .into()
}

async fn delete_credentials(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<AuthenticatedParty>,
    Path(version): Path<String>,
) -> OcpiReply<Value> {
    tracing::info!(party = %caller.party.identity, %version, "credentials DELETE");
    state.registration.handle_delete(&caller, &version).into()
}

/// Credentials module routes
pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route(
        "/{version}/credentials",
        get(get_credentials)
            .post(post_credentials)
            .put(put_credentials)
            .delete(delete_credentials),
    )
}
