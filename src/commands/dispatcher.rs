//! Outbound commands and their asynchronous results

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use url::Url;

use super::pending::{CallbackOutcome, PendingTable};
use super::{CommandOutcome, CommandState};
use crate::client::{CallAuth, OcpiClient, RequestIds};
use crate::node::NodeProfile;
use crate::ocpi::{
    Command, CommandResponse, CommandResponseType, CommandResult, CommandResultType,
    DisplayText, InterfaceRole, LocalError, ModuleId, OcpiResponse, VersionId, descriptor,
};
use crate::parties::{PartyIdentity, PartyRegistry, RemoteParty};
use crate::registration::local_error;
use crate::versions::VersionNegotiator;

/// Handle to a dispatched command
#[derive(Debug)]
pub struct DispatchedCommand {
    pub request_id: String,
    pub correlation_id: String,
    /// The synchronous response, or a local error if nothing was sent
    pub response: OcpiResponse<CommandResponse>,
    outcome: oneshot::Receiver<CommandOutcome>,
}

impl DispatchedCommand {
    /// Wait for the final outcome: callback, rejection or timeout
    pub async fn outcome(self) -> CommandOutcome {
        let request_id = self.request_id;
        self.outcome.await.unwrap_or_else(|_| CommandOutcome {
            request_id,
            state: CommandState::TimedOut,
            result: CommandResult::new(CommandResultType::Timeout),
        })
    }
}

/// Sends commands and correlates their callbacks
#[derive(Clone)]
pub struct CommandDispatcher {
    node: Arc<NodeProfile>,
    pub(super) registry: PartyRegistry,
    pub(super) client: OcpiClient,
    negotiator: VersionNegotiator,
    timeout: Duration,
    pending: Arc<PendingTable>,
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("timeout", &self.timeout)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

fn failure(message: impl Into<String>) -> CommandResult {
    CommandResult {
        result: CommandResultType::Failed,
        message: Some(DisplayText {
            language: "en".to_string(),
            text: message.into(),
        }),
    }
}

impl CommandDispatcher {
    /// Create a dispatcher whose commands time out after `timeout`
    #[must_use]
    pub fn new(
        node: Arc<NodeProfile>,
        registry: PartyRegistry,
        client: OcpiClient,
        timeout: Duration,
    ) -> Self {
        let negotiator = VersionNegotiator::new(client.clone());
        Self {
            node,
            registry,
            client,
            negotiator,
            timeout,
            pending: Arc::new(PendingTable::default()),
        }
    }

    /// Default deadline for callbacks
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `command` to `target` with the default deadline
    pub async fn send_command(&self, target: &PartyIdentity, command: Command) -> DispatchedCommand {
        self.send_command_with_timeout(target, command, self.timeout)
            .await
    }

    /// Send `command` to `target`, resolving to `TIMED_OUT` after `timeout`
    ///
    /// The pending entry and its deadline exist before the command leaves,
    /// so a callback racing the synchronous response is never lost.
    pub async fn send_command_with_timeout(
        &self,
        target: &PartyIdentity,
        mut command: Command,
        timeout: Duration,
    ) -> DispatchedCommand {
        let request_id = uuid::Uuid::new_v4().to_string();
        let ids = RequestIds {
            request_id: request_id.clone(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        };
        let kind = command.kind();
        let outcome = self.pending.insert(&request_id, target.clone(), kind);

        // Armed before any await so a dropped send still resolves the entry
        let pending = Arc::clone(&self.pending);
        let expiring = request_id.clone();
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if pending.expire(&expiring) {
                tracing::warn!(request_id = %expiring, "command timed out");
            }
        });
        self.pending.set_deadline(&request_id, deadline);

        let prepared = match self.resolve_target(target).await {
            Ok(prepared) => prepared,
            Err(error) => {
                tracing::warn!(party = %target, command = %kind, error = %error.message(), "command not sent");
                self.pending.complete(&request_id, failure(error.message()));
                return DispatchedCommand {
                    request_id,
                    correlation_id: ids.correlation_id,
                    response: OcpiResponse::local(error),
                    outcome,
                };
            }
        };

        let version = prepared.version;
        command.set_response_url(self.node.command_callback_url(&version, kind, &request_id));

        tracing::info!(party = %target, command = %kind, %request_id, "sending command");
        let response = self
            .client
            .post_command(&prepared.commands_url, &prepared.auth, &command, &ids)
            .await;

        match (response.is_success(), response.data.as_ref().map(|r| r.result)) {
            (true, Some(CommandResponseType::Accepted)) => self.pending.mark_acked(&request_id),
            (true, Some(result)) => {
                let mapped = match result {
                    CommandResponseType::NotSupported => CommandResultType::NotSupported,
                    CommandResponseType::UnknownSession => CommandResultType::Failed,
                    _ => CommandResultType::Rejected,
                };
                let message = response.data.as_ref().and_then(|r| r.message.clone());
                self.pending.complete(
                    &request_id,
                    CommandResult {
                        result: mapped,
                        message,
                    },
                );
            }
            _ => {
                let message = response
                    .status_message
                    .clone()
                    .unwrap_or_else(|| format!("status {}", response.status_code));
                tracing::warn!(party = %target, command = %kind, %request_id, status_code = response.status_code, "command failed");
                self.pending.complete(&request_id, failure(message));
            }
        }

        DispatchedCommand {
            request_id,
            correlation_id: ids.correlation_id,
            response,
            outcome,
        }
    }

    /// Deliver a callback received on our response URL
    pub fn on_callback(
        &self,
        from: &PartyIdentity,
        request_id: &str,
        result: CommandResult,
    ) -> CallbackOutcome {
        let outcome = self.pending.resolve_callback(from, request_id, result);
        match outcome {
            CallbackOutcome::Resolved => {
                tracing::info!(party = %from, request_id, "command result received");
            }
            CallbackOutcome::AlreadyResolved(state) => {
                tracing::info!(party = %from, request_id, ?state, "discarding duplicate or late command result");
            }
            CallbackOutcome::Unknown => {
                tracing::warn!(party = %from, request_id, "command result for unknown request");
            }
            CallbackOutcome::WrongParty => {
                tracing::warn!(party = %from, request_id, "command result from a party that was not asked");
            }
        }
        outcome
    }

    /// Current state of a command, while pending or recently resolved
    #[must_use]
    pub fn state(&self, request_id: &str) -> Option<CommandState> {
        self.pending.state(request_id)
    }

    /// Number of commands awaiting a result
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    async fn resolve_target(&self, target: &PartyIdentity) -> Result<Prepared, LocalError> {
        let party = self.registry.get(target).map_err(|e| local_error(&e))?;
        if !party.is_enabled() {
            return Err(LocalError::PartyDisabled);
        }
        let version = party
            .selected_version
            .clone()
            .ok_or(LocalError::NotRegistered)?;
        let base64 = descriptor(&version).is_some_and(|d| d.base64_tokens);
        let auth = CallAuth::token(party.outbound_token(Utc::now()), base64)
            .with_tls(party.tls.clone());

        let commands_url = match party.endpoint(&ModuleId::Commands) {
            Some(endpoint) => endpoint.url.clone(),
            None => self.fetch_commands_endpoint(&party, &auth).await?,
        };

        Ok(Prepared {
            version,
            commands_url,
            auth,
        })
    }

    /// Look the endpoint up in freshly fetched version details
    async fn fetch_commands_endpoint(
        &self,
        party: &RemoteParty,
        auth: &CallAuth,
    ) -> Result<Url, LocalError> {
        let versions_url = party
            .remote_versions_url
            .as_ref()
            .ok_or(LocalError::NoRemoteUrl)?;
        let version = party
            .selected_version
            .as_ref()
            .ok_or(LocalError::NotRegistered)?;

        let versions = self
            .negotiator
            .fetch_versions(versions_url, auth)
            .await
            .map_err(|_| LocalError::NoRemoteUrl)?;
        let info = versions
            .iter()
            .find(|v| &v.version == version)
            .ok_or_else(|| LocalError::UnknownVersion(version.to_string()))?;
        let details = self
            .negotiator
            .fetch_version_details(&info.url, auth)
            .await
            .map_err(|_| LocalError::NoRemoteUrl)?;

        details
            .endpoint(&ModuleId::Commands, Some(InterfaceRole::Receiver))
            .map(|e| e.url.clone())
            .ok_or_else(|| LocalError::NoEndpoint(ModuleId::Commands.to_string()))
    }
}

struct Prepared {
    version: VersionId,
    commands_url: Url,
    auth: CallAuth,
}
