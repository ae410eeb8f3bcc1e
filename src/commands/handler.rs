//! Receiving commands and reporting their results

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use url::Url;

use super::CommandDispatcher;
use crate::client::CallAuth;
use crate::ocpi::{
    Command, CommandResponse, CommandResponseType, CommandResult, LocalError, OcpiResponse,
    descriptor,
};
use crate::parties::{PartyIdentity, RemoteParty};
use crate::registration::local_error;

/// Executes commands received from registered parties
///
/// The handler answers synchronously; the final result is reported later
/// with [`CommandDispatcher::report_result`] to the command's response URL.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, from: &RemoteParty, command: Command) -> CommandResponse;
}

/// Answers every command with `NOT_SUPPORTED`
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedCommands;

#[async_trait]
impl CommandHandler for UnsupportedCommands {
    async fn handle(&self, from: &RemoteParty, command: Command) -> CommandResponse {
        tracing::debug!(party = %from.identity, command = %command.kind(), "no command handler installed");
        CommandResponse::new(CommandResponseType::NotSupported, 0)
    }
}

impl CommandDispatcher {
    /// POST the asynchronous result of a command `to` sent us
    pub async fn report_result(
        &self,
        to: &PartyIdentity,
        response_url: &Url,
        result: &CommandResult,
    ) -> OcpiResponse<Value> {
        let party = match self.registry.get(to) {
            Ok(party) => party,
            Err(e) => return OcpiResponse::local(local_error(&e)),
        };
        if !party.is_enabled() {
            return OcpiResponse::local(LocalError::PartyDisabled);
        }
        let Some(version) = party.selected_version.as_ref() else {
            return OcpiResponse::local(LocalError::NotRegistered);
        };
        let base64 = descriptor(version).is_some_and(|d| d.base64_tokens);
        let auth = CallAuth::token(party.outbound_token(Utc::now()), base64)
            .with_tls(party.tls.clone());

        let response = self
            .client
            .post_command_result(response_url, &auth, result)
            .await;
        if !response.is_success() {
            tracing::warn!(party = %to, url = %response_url, status_code = response.status_code, "command result not delivered");
        }
        response
    }
}
