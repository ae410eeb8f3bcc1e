//! Typed OCPI calls over an [`HttpTransport`]
//!
//! Every call returns an [`OcpiResponse`]: the counterparty's envelope when
//! one arrived, otherwise a local envelope with `status_code = -1`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderValue, Method, header};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::transport::{HttpTransport, OutboundRequest};
use crate::hooks::{ExchangeEvent, ExchangeHooks};
use crate::ocpi::{
    Command, CommandResponse, CommandResult, Credentials, CredentialsShape, HttpMeta, LocalError,
    OcpiResponse, VersionDetails, VersionInfo,
};
use crate::parties::Role;
use crate::security::{AccessToken, TlsMaterial};

/// Header carrying a per-request unique id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying an id shared by related requests
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// How to authenticate and secure a call to one party
#[derive(Debug, Clone, Default)]
pub struct CallAuth {
    pub token: Option<AccessToken>,
    /// Base64-encode the token in the `Authorization` header
    pub base64: bool,
    pub tls: Option<Arc<TlsMaterial>>,
}

impl CallAuth {
    /// Authenticate with `token`
    #[must_use]
    pub fn token(token: Option<AccessToken>, base64: bool) -> Self {
        Self {
            token,
            base64,
            tls: None,
        }
    }

    /// Restrict the connection with the party's TLS material
    #[must_use]
    pub fn with_tls(mut self, tls: Option<Arc<TlsMaterial>>) -> Self {
        self.tls = tls;
        self
    }
}

/// Ids sent with a request
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub correlation_id: String,
}

impl Default for RequestIds {
    fn default() -> Self {
        let request_id = uuid::Uuid::new_v4().to_string();
        Self {
            correlation_id: request_id.clone(),
            request_id,
        }
    }
}

/// OCPI client
#[derive(Clone)]
pub struct OcpiClient {
    transport: Arc<dyn HttpTransport>,
    hooks: Arc<ExchangeHooks>,
}

impl std::fmt::Debug for OcpiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcpiClient")
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl OcpiClient {
    /// Create a client
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, hooks: Arc<ExchangeHooks>) -> Self {
        Self { transport, hooks }
    }

    /// `GET /versions`
    ///
    /// Entries we cannot parse, such as non-numeric version ids, are skipped.
    pub async fn get_versions(&self, url: &Url, auth: &CallAuth) -> OcpiResponse<Vec<VersionInfo>> {
        let response: OcpiResponse<Value> = self
            .call(Method::GET, url, auth, None, &RequestIds::default())
            .await;
        parse_versions(response)
    }

    /// `GET /versions/{id}`
    pub async fn get_version_details(
        &self,
        url: &Url,
        auth: &CallAuth,
    ) -> OcpiResponse<VersionDetails> {
        self.call(Method::GET, url, auth, None, &RequestIds::default())
            .await
    }

    /// `POST /credentials`, first registration
    pub async fn post_credentials(
        &self,
        url: &Url,
        auth: &CallAuth,
        credentials: &Credentials,
        shape: CredentialsShape,
        flat_role: Role,
    ) -> OcpiResponse<Credentials> {
        let body = credentials.to_wire(shape);
        let response: OcpiResponse<Value> = self
            .call(Method::POST, url, auth, Some(&body), &RequestIds::default())
            .await;
        parse_credentials(response, flat_role)
    }

    /// `PUT /credentials`, re-registration
    pub async fn put_credentials(
        &self,
        url: &Url,
        auth: &CallAuth,
        credentials: &Credentials,
        shape: CredentialsShape,
        flat_role: Role,
    ) -> OcpiResponse<Credentials> {
        let body = credentials.to_wire(shape);
        let response: OcpiResponse<Value> = self
            .call(Method::PUT, url, auth, Some(&body), &RequestIds::default())
            .await;
        parse_credentials(response, flat_role)
    }

    /// `DELETE /credentials`
    pub async fn delete_credentials(&self, url: &Url, auth: &CallAuth) -> OcpiResponse<Value> {
        self.call(Method::DELETE, url, auth, None, &RequestIds::default())
            .await
    }

    /// `POST {commands}/{COMMAND}`
    pub async fn post_command(
        &self,
        commands_url: &Url,
        auth: &CallAuth,
        command: &Command,
        ids: &RequestIds,
    ) -> OcpiResponse<CommandResponse> {
        let url = match join_segment(commands_url, command.kind().as_str()) {
            Ok(url) => url,
            Err(e) => return OcpiResponse::local(e),
        };
        let body = match command.to_body() {
            Ok(body) => body,
            Err(e) => return OcpiResponse::local(LocalError::MalformedResponse(e.to_string())),
        };
        self.call(Method::POST, &url, auth, Some(&body), ids).await
    }

    /// `POST {response_url}` with the asynchronous command result
    pub async fn post_command_result(
        &self,
        response_url: &Url,
        auth: &CallAuth,
        result: &CommandResult,
    ) -> OcpiResponse<Value> {
        let body = match serde_json::to_value(result) {
            Ok(body) => body,
            Err(e) => return OcpiResponse::local(LocalError::MalformedResponse(e.to_string())),
        };
        self.call(
            Method::POST,
            response_url,
            auth,
            Some(&body),
            &RequestIds::default(),
        )
        .await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &Url,
        auth: &CallAuth,
        body: Option<&Value>,
        ids: &RequestIds,
    ) -> OcpiResponse<T> {
        let event = ExchangeEvent::outbound(method.as_str(), url.as_str())
            .with_ids(Some(&ids.request_id), Some(&ids.correlation_id));
        self.hooks.request(&event);

        let response = self.exchange(method, url, auth, body, ids).await;

        self.hooks.response(
            &event.completed(
                response.http.as_ref().map(|h| h.status),
                Some(response.status_code),
            ),
        );
        response
    }

    async fn exchange<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &Url,
        auth: &CallAuth,
        body: Option<&Value>,
        ids: &RequestIds,
    ) -> OcpiResponse<T> {
        let mut request = OutboundRequest::new(method, url.clone());
        request.tls.clone_from(&auth.tls);

        if let Some(token) = &auth.token {
            match HeaderValue::from_str(&token.to_header(auth.base64)) {
                Ok(value) => {
                    request.headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => {
                    return OcpiResponse::local(LocalError::Transport(
                        "token is not a valid header value".to_string(),
                    ));
                }
            }
        }
        for (name, value) in [
            (REQUEST_ID_HEADER, &ids.request_id),
            (CORRELATION_ID_HEADER, &ids.correlation_id),
        ] {
            if let Ok(value) = HeaderValue::from_str(value) {
                request.headers.insert(name, value);
            }
        }
        if let Some(body) = body {
            match serde_json::to_vec(body) {
                Ok(bytes) => {
                    request.headers.insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("application/json"),
                    );
                    request.body = Some(Bytes::from(bytes));
                }
                Err(e) => return OcpiResponse::local(LocalError::MalformedResponse(e.to_string())),
            }
        }

        let response = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "transport failure");
                return OcpiResponse::local(LocalError::Transport(e.to_string()));
            }
        };

        let meta = HttpMeta {
            status: response.status,
            request_id: response.header(REQUEST_ID_HEADER),
            correlation_id: response.header(CORRELATION_ID_HEADER),
        };

        match serde_json::from_slice::<OcpiResponse<T>>(&response.body) {
            Ok(envelope) => envelope.with_http(meta),
            Err(e) => {
                tracing::debug!(url = %url, http_status = response.status, error = %e, "response is not an OCPI envelope");
                let mut local = OcpiResponse::local(LocalError::MalformedResponse(format!(
                    "HTTP {}: {e}",
                    response.status
                )));
                local.http = Some(meta);
                local
            }
        }
    }
}

fn parse_credentials(response: OcpiResponse<Value>, flat_role: Role) -> OcpiResponse<Credentials> {
    if !response.is_success() {
        return response.cast();
    }
    let Some(data) = response.data.clone() else {
        return response.cast();
    };
    match Credentials::from_wire(data, flat_role) {
        Ok(credentials) => response.map(|_| credentials),
        Err(e) => {
            let mut local = OcpiResponse::local(LocalError::MalformedResponse(e.to_string()));
            local.http = response.http;
            local
        }
    }
}

fn parse_versions(response: OcpiResponse<Value>) -> OcpiResponse<Vec<VersionInfo>> {
    if !response.is_success() {
        return response.cast();
    }
    let entries = match response.data.clone() {
        Some(Value::Array(entries)) => entries,
        None => return response.cast(),
        Some(_) => {
            let mut local = OcpiResponse::local(LocalError::MalformedResponse(
                "versions data is not a list".to_string(),
            ));
            local.http = response.http;
            return local;
        }
    };

    let versions = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<VersionInfo>(entry) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unusable versions entry");
                None
            }
        })
        .collect();
    response.map(|_| versions)
}

/// Append a path segment, keeping any trailing-slash convention
fn join_segment(base: &Url, segment: &str) -> Result<Url, LocalError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| LocalError::NoEndpoint(base.to_string()))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}
