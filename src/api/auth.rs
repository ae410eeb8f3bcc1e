//! Authentication middleware: party tokens for OCPI, an API key for admin

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use super::{ApiState, OcpiReply};
use crate::client::{CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
use crate::hooks::ExchangeEvent;
use crate::ocpi::{OcpiResponse, status};
use crate::security::{PeerTlsInfo, TrustError};

/// Extract API key from Authorization header
fn extract_api_key(req: &Request) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Middleware to verify API key
pub async fn require_api_key(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // If no API key configured, allow all requests (development mode)
    let Some(expected_key) = &state.api_key else {
        return Ok(next.run(req).await);
    };

    match extract_api_key(&req) {
        Some(key) if key == expected_key => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("invalid API key provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::debug!("no API key provided");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn rejection(error: &TrustError) -> Response {
    let (http, code, message) = match error {
        TrustError::Store(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            status::GENERIC_SERVER_ERROR,
            "Internal error".to_string(),
        ),
        TrustError::MissingToken | TrustError::UnknownToken => (
            StatusCode::UNAUTHORIZED,
            status::GENERIC_CLIENT_ERROR,
            "Invalid or missing token".to_string(),
        ),
        other => (
            StatusCode::UNAUTHORIZED,
            status::GENERIC_CLIENT_ERROR,
            other.to_string(),
        ),
    };
    OcpiReply::<()>(http, OcpiResponse::error(code, message)).into_response()
}

/// Middleware authenticating OCPI callers
///
/// Inserts the [`AuthenticatedParty`](crate::security::AuthenticatedParty)
/// for handlers, echoes `X-Request-ID` and `X-Correlation-ID`, and reports the
/// exchange to the hooks. TLS facts are read from a [`PeerTlsInfo`] extension
/// attached by whatever terminated the connection.
pub async fn require_party(
    State(state): State<Arc<ApiState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = header_str(req.headers(), REQUEST_ID_HEADER)
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);
    let correlation_id = header_str(req.headers(), CORRELATION_ID_HEADER)
        .map_or_else(|| request_id.clone(), String::from);

    let event = ExchangeEvent::inbound(req.method().as_str(), &req.uri().to_string())
        .with_ids(Some(&request_id), Some(&correlation_id));
    state.hooks.request(&event);

    let authorization = header_str(req.headers(), header::AUTHORIZATION.as_str()).map(String::from);
    let tls = req.extensions().get::<PeerTlsInfo>().cloned();

    let mut response =
        match state
            .trust
            .authenticate(authorization.as_deref(), tls.as_ref(), Utc::now())
        {
            Ok(caller) => {
                req.extensions_mut().insert(caller);
                next.run(req).await
            }
            Err(e) => {
                tracing::warn!(uri = %event.url, error = %e, "rejected OCPI request");
                rejection(&e)
            }
        };

    for (name, value) in [
        (REQUEST_ID_HEADER, &request_id),
        (CORRELATION_ID_HEADER, &correlation_id),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            response.headers_mut().insert(name, value);
        }
    }

    state
        .hooks
        .response(&event.completed(Some(response.status().as_u16()), None));
    response
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_extract_api_key() {
        let mut req = Request::builder().body(Body::empty()).unwrap();

        // No header
        assert_eq!(extract_api_key(&req), None);

        // With Bearer token
        req.headers_mut().insert(
            "authorization",
            HeaderValue::from_static("Bearer test-key-123"),
        );
        assert_eq!(extract_api_key(&req), Some("test-key-123"));
    }

    #[test]
    fn unknown_tokens_are_401_with_client_error() {
        let response = rejection(&TrustError::UnknownToken);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = rejection(&TrustError::Store("down".to_string()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
