//! API endpoint integration tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use ocpi_gateway::client::LoopbackNetwork;
use ocpi_gateway::parties::PartyDraft;
use ocpi_gateway::security::{AccessToken, encode_header};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{CPO, EMSP, TestNode, identity};

const PARTY_TOKEN: &str = "emsp-presents-this";

/// A CPO node that knows the EMSP by `PARTY_TOKEN`
fn build_test_router() -> axum::Router {
    let network = Arc::new(LoopbackNetwork::new());
    let node = TestNode::new(&network, CPO, "http://localhost:3301", None);
    node.registry
        .add_or_update(PartyDraft::new(identity(EMSP)).local_token(AccessToken::new(PARTY_TOKEN)))
        .unwrap();
    node.router()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn ocpi_get(uri: &str, base64: bool) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", encode_header(PARTY_TOKEN, base64))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = build_test_router();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_ready_endpoint() {
    let app = build_test_router();

    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["checks"]["party_store"]["status"], "ok");
    assert_eq!(json["checks"]["pending_commands"], 0);
}

#[tokio::test]
async fn test_versions_require_token() {
    let app = build_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/ocpi/versions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = json_body(response).await;
    assert_eq!(json["status_code"], 2000);
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_versions_accept_plain_and_base64_tokens() {
    for base64 in [false, true] {
        let app = build_test_router();
        let response = app.oneshot(ocpi_get("/ocpi/versions", base64)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status_code"], 1000);
        let versions = json["data"].as_array().unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().any(|v| v["version"] == "2.2.1"
            && v["url"] == "http://localhost:3301/ocpi/versions/2.2.1"));
    }
}

#[tokio::test]
async fn test_version_details() {
    let app = build_test_router();

    let response = app
        .oneshot(ocpi_get("/ocpi/versions/2.2.1", true))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["version"], "2.2.1");
    let endpoints = json["data"]["endpoints"].as_array().unwrap();
    assert_eq!(endpoints.len(), 9);
    assert!(endpoints.iter().any(|e| e["identifier"] == "commands"
        && e["role"] == "RECEIVER"
        && e["url"] == "http://localhost:3301/ocpi/2.2.1/commands"));
}

#[tokio::test]
async fn test_version_details_2_1_1_have_no_roles() {
    let app = build_test_router();

    let response = app
        .oneshot(ocpi_get("/ocpi/versions/2.1.1", false))
        .await
        .unwrap();

    let json = json_body(response).await;
    let endpoints = json["data"]["endpoints"].as_array().unwrap();
    assert!(endpoints.iter().all(|e| e.get("role").is_none_or(Value::is_null)));
    assert!(!endpoints.iter().any(|e| e["identifier"] == "chargingprofiles"));
}

#[tokio::test]
async fn test_unsupported_version() {
    let app = build_test_router();

    let response = app
        .oneshot(ocpi_get("/ocpi/versions/9.9", true))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status_code"], 3002);
}

#[tokio::test]
async fn test_request_ids_are_echoed() {
    let app = build_test_router();

    let request = Request::builder()
        .uri("/ocpi/versions")
        .header("Authorization", encode_header(PARTY_TOKEN, true))
        .header("X-Request-ID", "req-1")
        .header("X-Correlation-ID", "corr-1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-1");
    assert_eq!(response.headers()["x-correlation-id"], "corr-1");
}

#[tokio::test]
async fn test_get_credentials_returns_caller_token() {
    let app = build_test_router();

    let response = app
        .oneshot(ocpi_get("/ocpi/2.2.1/credentials", true))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["token"], PARTY_TOKEN);
    assert_eq!(json["data"]["url"], "http://localhost:3301/ocpi/versions");
    assert_eq!(json["data"]["roles"][0]["role"], "CPO");
    assert_eq!(json["data"]["roles"][0]["party_id"], "GEF");
}

#[tokio::test]
async fn test_post_credentials_with_invalid_body() {
    let app = build_test_router();

    let request = Request::builder()
        .method("POST")
        .uri("/ocpi/2.2.1/credentials")
        .header("Authorization", encode_header(PARTY_TOKEN, true))
        .header("Content-Type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["status_code"], 2001);
}

#[tokio::test]
async fn test_commands_from_unregistered_party_are_forbidden() {
    let app = build_test_router();

    let request = Request::builder()
        .method("POST")
        .uri("/ocpi/2.2.1/commands/START_SESSION")
        .header("Authorization", encode_header(PARTY_TOKEN, true))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({
                "response_url": "http://emsp.test/cb",
                "token": {"uid": "1"},
                "location_id": "LOC1"
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_requires_auth() {
    let app = build_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/parties")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_lists_parties_without_secrets() {
    let app = build_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/parties")
                .header("Authorization", "Bearer test-api-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(!String::from_utf8_lossy(&body).contains(PARTY_TOKEN));

    let json: Value = serde_json::from_slice(&body).unwrap();
    let parties = json.as_array().unwrap();
    assert_eq!(parties.len(), 1);
    assert_eq!(parties[0]["identity"], EMSP);
    assert_eq!(parties[0]["has_local_token"], true);
    assert_eq!(parties[0]["has_remote_token"], false);
}

#[tokio::test]
async fn test_admin_lists_parties_by_status() {
    let app = build_test_router();
    let list = |uri: &str| {
        Request::builder()
            .uri(uri)
            .header("Authorization", "Bearer test-api-key")
            .body(Body::empty())
            .unwrap()
    };

    let response = app
        .clone()
        .oneshot(list("/api/parties?status=ENABLED"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(list("/api/parties?status=DISABLED"))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert!(json.as_array().unwrap().is_empty());

    let response = app
        .oneshot(list("/api/parties?status=SOMETIMES"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_upsert_party() {
    let app = build_test_router();
    let upsert = |body: Value| {
        Request::builder()
            .method("POST")
            .uri("/api/parties")
            .header("Authorization", "Bearer test-api-key")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let response = app
        .clone()
        .oneshot(upsert(json!({
            "identity": "BE*ABC*CPO",
            "versions_url": "https://abc.test/ocpi/versions",
            "remote_token": "abc-bootstrap"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    assert_eq!(json["party_status"], "ENABLED");
    assert_eq!(json["has_remote_token"], true);

    let response = app
        .clone()
        .oneshot(upsert(json!({
            "identity": "BE*ABC*CPO",
            "status": "DISABLED"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["party_status"], "DISABLED");

    let response = app
        .oneshot(upsert(json!({"identity": "not an identity"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_register_unknown_party() {
    let app = build_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/parties/BE*XYZ*CPO/register")
                .header("Authorization", "Bearer test-api-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = json_body(response).await;
    assert_eq!(json["status_code"], -1);
}

#[tokio::test]
async fn test_admin_unknown_command_state() {
    let app = build_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/commands/nope")
                .header("Authorization", "Bearer test-api-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
