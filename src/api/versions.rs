//! `GET /ocpi/versions` and `GET /ocpi/versions/{version}`

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    routing::get,
};

use super::{ApiState, OcpiReply};
use crate::ocpi::{OcpiResponse, VersionDetails, VersionId, VersionInfo, status};

async fn list_versions(State(state): State<Arc<ApiState>>) -> OcpiReply<Vec<VersionInfo>> {
    OcpiReply::ok(OcpiResponse::success(state.node.version_infos()))
}

async fn version_details(
    State(state): State<Arc<ApiState>>,
    Path(version): Path<String>,
) -> OcpiReply<VersionDetails> {
    let details = VersionId::parse(&version)
        .ok()
        .and_then(|v| state.node.version_details(&v));
    match details {
        Some(details) => OcpiReply::ok(OcpiResponse::success(details)),
        None => OcpiReply::ok(OcpiResponse::error(
            status::UNSUPPORTED_VERSION,
            format!("Unsupported version '{version}'"),
        )),
    }
}

/// Version discovery routes
pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/versions", get(list_versions))
        .route("/versions/{version}", get(version_details))
}
