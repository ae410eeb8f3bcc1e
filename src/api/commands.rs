//! `/ocpi/{version}/commands`: inbound commands and result callbacks

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::post,
};
use serde_json::Value;

use super::{ApiState, OcpiReply};
use crate::commands::CallbackOutcome;
use crate::ocpi::{Command, CommandResponse, CommandResult, CommandType, OcpiResponse, status};
use crate::security::AuthenticatedParty;

fn client_error<T>(http: StatusCode, code: i32, message: impl Into<String>) -> OcpiReply<T> {
    OcpiReply(http, OcpiResponse::error(code, message))
}

/// A command sent to us by a registered party
async fn receive_command(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<AuthenticatedParty>,
    Path((version, command)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> OcpiReply<CommandResponse> {
    if !caller.party.is_registered() {
        return client_error(
            StatusCode::FORBIDDEN,
            status::GENERIC_CLIENT_ERROR,
            "Party is not registered",
        );
    }
    let Ok(kind) = command.parse::<CommandType>() else {
        return client_error(
            StatusCode::NOT_FOUND,
            status::GENERIC_CLIENT_ERROR,
            format!("Unknown command '{command}'"),
        );
    };
    let command = match body
        .map_err(|e| e.body_text())
        .and_then(|Json(body)| Command::from_body(kind, body).map_err(|e| e.to_string()))
    {
        Ok(command) => command,
        Err(e) => {
            return client_error(
                StatusCode::BAD_REQUEST,
                status::INVALID_PARAMETERS,
                format!("Invalid {kind} request: {e}"),
            );
        }
    };

    tracing::info!(party = %caller.party.identity, %version, command = %kind, response_url = %command.response_url(), "command received");
    let response = state.command_handler.handle(&caller.party, command).await;
    OcpiReply::ok(OcpiResponse::success(response))
}

/// Asynchronous result of a command we sent
async fn receive_result(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<AuthenticatedParty>,
    Path((_version, command, request_id)): Path<(String, String, String)>,
    body: Result<Json<CommandResult>, JsonRejection>,
) -> OcpiReply<()> {
    let Ok(Json(result)) = body else {
        return client_error(
            StatusCode::BAD_REQUEST,
            status::INVALID_PARAMETERS,
            format!("Invalid {command} result"),
        );
    };

    match state
        .dispatcher
        .on_callback(&caller.party.identity, &request_id, result)
    {
        CallbackOutcome::Resolved | CallbackOutcome::AlreadyResolved(_) => {
            OcpiReply::ok(OcpiResponse::success(()))
        }
        CallbackOutcome::Unknown | CallbackOutcome::WrongParty => client_error(
            StatusCode::NOT_FOUND,
            status::GENERIC_CLIENT_ERROR,
            format!("Unknown request id '{request_id}'"),
        ),
    }
}

/// Commands module routes
pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/{version}/commands/{command}", post(receive_command))
        .route(
            "/{version}/commands/{command}/{request_id}",
            post(receive_result),
        )
}
