//! Credentials handshake between two gateways

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use ocpi_gateway::client::{CallAuth, HttpTransport, OcpiClient};
use ocpi_gateway::hooks::ExchangeHooks;
use ocpi_gateway::ocpi::{
    CredentialsShape, InterfaceRole, ModuleId, V2_1_1, V2_2_1, VersionId, status,
};
use ocpi_gateway::parties::{RemoteAccessStatus, Role};
use ocpi_gateway::registration::RegisterOptions;
use ocpi_gateway::security::{AccessToken, TlsMaterial, TlsProtocol, TotpConfig};

mod common;
use common::{BOOTSTRAP_TOKEN, CPO, CPO_AUTHORITY, EMSP, Pair, identity, version};

#[tokio::test]
async fn emsp_registers_with_cpo() {
    let pair = Pair::new();
    let cpo = pair.register().await;

    assert_eq!(cpo.selected_version, Some(version(V2_2_1)));
    assert_eq!(cpo.remote_access_status, RemoteAccessStatus::Online);
    assert_eq!(
        cpo.remote_versions_url.as_ref().map(url::Url::as_str),
        Some("http://localhost:3301/ocpi/versions")
    );
    assert_eq!(
        pair.cpo.node.version_url(&version(V2_2_1)).as_str(),
        "http://localhost:3301/ocpi/versions/2.2.1"
    );
    assert_eq!(cpo.remote_endpoints.len(), 9);
    assert!(
        cpo.remote_endpoints
            .iter()
            .any(|e| e.identifier == ModuleId::Commands && e.role == Some(InterfaceRole::Receiver))
    );
    assert_eq!(cpo.credentials_roles.len(), 1);
    assert_eq!(cpo.credentials_roles[0].role, Role::Cpo);

    let emsp = pair.cpo.party(EMSP);
    assert_eq!(emsp.selected_version, Some(version(V2_2_1)));
    assert_eq!(
        emsp.remote_versions_url.as_ref().map(url::Url::as_str),
        Some("http://emsp.test/ocpi/versions")
    );
    assert!(!emsp.remote_endpoints.is_empty());

    pair.assert_tokens_aligned();
    // The bootstrap token is spent
    assert_ne!(
        emsp.local_access_token,
        Some(AccessToken::new(BOOTSTRAP_TOKEN))
    );
}

#[tokio::test]
async fn reregistration_rotates_both_tokens() {
    let pair = Pair::new();
    pair.register().await;
    let first = pair.emsp.party(CPO);

    let response = pair.emsp.registration.reregister(&identity(CPO)).await;
    assert!(response.is_success(), "{:?}", response.status_message);
    let second = pair.emsp.party(CPO);

    assert_ne!(first.local_access_token, second.local_access_token);
    assert_ne!(first.remote_access_token, second.remote_access_token);
    assert_eq!(second.selected_version, first.selected_version);
    pair.assert_tokens_aligned();

    // Repeating the exchange converges to the same aligned state
    let response = pair.emsp.registration.reregister(&identity(CPO)).await;
    assert!(response.is_success());
    pair.assert_tokens_aligned();

    // The superseded token no longer reaches the CPO
    let stale = CallAuth::token(first.remote_access_token.clone(), true);
    let response = ocpi_client(&pair)
        .get_versions(&pair.cpo.node.versions_url(), &stale)
        .await;
    assert_eq!(response.status_code, status::GENERIC_CLIENT_ERROR);
    assert_eq!(response.http.map(|h| h.status), Some(401));
}

#[tokio::test]
async fn reregister_requires_registration() {
    let pair = Pair::new();
    let response = pair.emsp.registration.reregister(&identity(CPO)).await;
    assert_eq!(response.status_code, status::LOCAL_ERROR);
    assert_eq!(
        response.status_message.as_deref(),
        Some("Party is not registered!")
    );
}

#[tokio::test]
async fn initiator_rejects_downgrade() {
    let pair = Pair::new();
    pair.register().await;
    let before = pair.emsp.party(CPO);

    let response = pair
        .emsp
        .registration
        .register(&identity(CPO), RegisterOptions::version(version(V2_1_1)))
        .await;
    assert_eq!(response.status_code, status::LOCAL_ERROR);
    assert_eq!(
        response.status_message.as_deref(),
        Some("Downgrade from version 2.2.1 to 2.1.1 rejected!")
    );
    assert!(response.http.is_none());
    assert_eq!(pair.emsp.party(CPO), before);
}

#[tokio::test]
async fn receiver_rejects_downgrade_and_initiator_rolls_back() {
    let pair = Pair::new();
    pair.register().await;
    let cpo_id = identity(CPO);
    let current = pair.emsp.party(CPO);
    pair.emsp
        .registry
        .update(&cpo_id, current.revision, |p| p.allow_downgrades = true)
        .unwrap();
    let before = pair.emsp.party(CPO);

    let response = pair
        .emsp
        .registration
        .register(&cpo_id, RegisterOptions::version(version(V2_1_1)))
        .await;
    assert_eq!(response.status_code, status::UNSUPPORTED_VERSION);
    assert_eq!(
        response.status_message.as_deref(),
        Some("Downgrade from version 2.2.1 to 2.1.1 rejected!")
    );

    let after = pair.emsp.party(CPO);
    assert_eq!(after.local_access_token, before.local_access_token);
    assert_eq!(after.selected_version, Some(version(V2_2_1)));
    pair.assert_tokens_aligned();
}

#[tokio::test]
async fn tls_protocol_mismatch_is_local_error() {
    let pair = Pair::new();
    pair.network
        .bind_tls(CPO_AUTHORITY, pair.cpo.router(), &[TlsProtocol::Tls13]);

    let cpo_id = identity(CPO);
    let party = pair.emsp.party(CPO);
    pair.emsp
        .registry
        .update(&cpo_id, party.revision, |p| {
            p.tls = Some(TlsMaterial::restricted_to(&[TlsProtocol::Tls12]));
        })
        .unwrap();

    let response = pair
        .emsp
        .registration
        .register(&cpo_id, RegisterOptions::default())
        .await;
    assert_eq!(response.status_code, -1);
    assert_eq!(
        response.status_message.as_deref(),
        Some("No remote URL available!")
    );
    assert!(response.http.is_none());

    let party = pair.emsp.party(CPO);
    assert_eq!(party.remote_access_status, RemoteAccessStatus::Offline);
    assert!(party.selected_version.is_none());
    assert_eq!(
        party.remote_access_token,
        Some(AccessToken::new(BOOTSTRAP_TOKEN))
    );
}

#[tokio::test]
async fn shared_tls_protocol_registers() {
    let pair = Pair::new();
    pair.network
        .bind_tls(CPO_AUTHORITY, pair.cpo.router(), &[TlsProtocol::Tls12, TlsProtocol::Tls13]);

    let cpo_id = identity(CPO);
    let party = pair.emsp.party(CPO);
    pair.emsp
        .registry
        .update(&cpo_id, party.revision, |p| {
            p.tls = Some(TlsMaterial::restricted_to(&[TlsProtocol::Tls12]));
        })
        .unwrap();

    pair.register().await;
    pair.assert_tokens_aligned();
}

#[tokio::test]
async fn post_from_registered_party_is_not_allowed() {
    let pair = Pair::new();
    pair.register().await;

    let at_emsp = pair.emsp.party(CPO);
    let auth = CallAuth::token(at_emsp.remote_access_token.clone(), true);
    let url = pair
        .cpo
        .node
        .module_url(&version(V2_2_1), &ModuleId::Credentials);
    let ours = pair.emsp.node.credentials("unused-token");

    let response = ocpi_client(&pair)
        .post_credentials(&url, &auth, &ours, CredentialsShape::Roles, Role::Cpo)
        .await;
    assert_eq!(
        response.http.map(|h| h.status),
        Some(StatusCode::METHOD_NOT_ALLOWED.as_u16())
    );
    assert_eq!(response.status_code, status::GENERIC_CLIENT_ERROR);
    pair.assert_tokens_aligned();
}

#[tokio::test]
async fn put_and_delete_from_unregistered_party_are_not_allowed() {
    let pair = Pair::new();
    let auth = CallAuth::token(Some(AccessToken::new(BOOTSTRAP_TOKEN)), true);
    let url = pair
        .cpo
        .node
        .module_url(&version(V2_2_1), &ModuleId::Credentials);
    let ours = pair.emsp.node.credentials("unused-token");
    let client = ocpi_client(&pair);

    let response = client
        .put_credentials(&url, &auth, &ours, CredentialsShape::Roles, Role::Cpo)
        .await;
    assert_eq!(response.http.map(|h| h.status), Some(405));

    let response = client.delete_credentials(&url, &auth).await;
    assert_eq!(response.http.map(|h| h.status), Some(405));
}

#[tokio::test]
async fn unregister_clears_both_sides() {
    let pair = Pair::new();
    pair.register().await;

    let response = pair.emsp.registration.unregister(&identity(CPO)).await;
    assert!(response.is_success(), "{:?}", response.status_message);

    let at_emsp = pair.emsp.party(CPO);
    assert!(at_emsp.selected_version.is_none());
    assert!(at_emsp.remote_access_token.is_none());
    assert!(at_emsp.local_access_token.is_none());
    assert!(at_emsp.remote_endpoints.is_empty());

    let at_cpo = pair.cpo.party(EMSP);
    assert!(at_cpo.selected_version.is_none());
    assert!(at_cpo.local_access_token.is_none());
}

#[tokio::test]
async fn unsupported_version_pin_is_local_error() {
    let pair = Pair::new();
    let response = pair
        .emsp
        .registration
        .register(
            &identity(CPO),
            RegisterOptions::version(VersionId::parse("2.3.0").unwrap()),
        )
        .await;
    assert_eq!(response.status_code, status::LOCAL_ERROR);
    assert!(pair.emsp.party(CPO).selected_version.is_none());
}

#[tokio::test]
async fn write_during_exchange_still_lands_both_tokens() {
    let pair = Pair::new();

    // Another writer touches the EMSP's record while the CPO handles the POST
    let registry = pair.emsp.registry.clone();
    let touch = middleware::from_fn(move |request: Request, next: Next| {
        let registry = registry.clone();
        async move {
            if request.method() == Method::POST && request.uri().path().ends_with("/credentials") {
                let cpo = registry.get(&identity(CPO)).unwrap();
                registry
                    .set_remote_access_status(&cpo.identity, cpo.revision, RemoteAccessStatus::Online)
                    .unwrap();
            }
            next.run(request).await
        }
    });
    pair.network.bind(CPO_AUTHORITY, pair.cpo.router().layer(touch));

    let response = pair
        .emsp
        .registration
        .register(&identity(CPO), RegisterOptions::default())
        .await;
    assert!(response.is_success(), "{:?}", response.status_message);

    let at_emsp = pair.emsp.party(CPO);
    assert_eq!(at_emsp.selected_version, Some(version(V2_2_1)));
    assert_ne!(
        at_emsp.remote_access_token,
        Some(AccessToken::new(BOOTSTRAP_TOKEN))
    );
    pair.assert_tokens_aligned();
}

#[tokio::test]
async fn totp_direction_is_never_rotated() {
    let pair = Pair::new();
    let totp = TotpConfig::new("shared-emsp-seed", Duration::from_secs(30));

    // The EMSP presents TOTP tokens to the CPO instead of a static token
    let at_cpo = pair.cpo.party(EMSP);
    pair.cpo
        .registry
        .update(&identity(EMSP), at_cpo.revision, |p| {
            p.local_access_token = None;
            p.local_totp = Some(totp.clone());
        })
        .unwrap();
    let at_emsp = pair.emsp.party(CPO);
    pair.emsp
        .registry
        .update(&identity(CPO), at_emsp.revision, |p| {
            p.remote_access_token = None;
            p.remote_totp = Some(totp.clone());
        })
        .unwrap();

    pair.register().await;
    let response = pair.emsp.registration.reregister(&identity(CPO)).await;
    assert!(response.is_success(), "{:?}", response.status_message);

    let at_emsp = pair.emsp.party(CPO);
    let at_cpo = pair.cpo.party(EMSP);
    assert!(at_emsp.remote_access_token.is_none());
    assert_eq!(at_emsp.remote_totp, Some(totp.clone()));
    assert!(at_cpo.local_access_token.is_none());
    assert_eq!(at_cpo.local_totp, Some(totp));

    // The static direction still rotates and stays aligned
    assert!(at_emsp.local_access_token.is_some());
    assert_eq!(at_emsp.local_access_token, at_cpo.remote_access_token);
    assert_eq!(at_cpo.selected_version, Some(version(V2_2_1)));
}

/// A bare client, for requests the registration protocol would never send
fn ocpi_client(pair: &Pair) -> OcpiClient {
    let transport: Arc<dyn HttpTransport> = pair.network.clone();
    OcpiClient::new(transport, Arc::new(ExchangeHooks::new()))
}
