//! The credentials handshake
//!
//! Each direction of a partnership is a separate, asymmetric run: the
//! initiator POSTs (first registration) or PUTs (re-registration) its
//! credentials to the receiver's `credentials` endpoint and persists the
//! credentials it gets back. [`initiator`] drives that side, [`receiver`]
//! answers it.

pub mod initiator;
pub mod receiver;

use std::sync::Arc;

use chrono::Utc;

use crate::Error;
use crate::client::{CallAuth, OcpiClient};
use crate::node::NodeProfile;
use crate::ocpi::{LocalError, VersionId, descriptor};
use crate::parties::{PartyRegistry, RemoteParty};
use crate::versions::VersionNegotiator;

pub use initiator::RegisterOptions;
pub use receiver::ReceiverReply;

/// Runs both sides of the credentials handshake for one node
#[derive(Debug, Clone)]
pub struct RegistrationProtocol {
    node: Arc<NodeProfile>,
    registry: PartyRegistry,
    client: OcpiClient,
    negotiator: VersionNegotiator,
}

impl RegistrationProtocol {
    /// Create the protocol driver
    #[must_use]
    pub fn new(node: Arc<NodeProfile>, registry: PartyRegistry, client: OcpiClient) -> Self {
        let negotiator = VersionNegotiator::new(client.clone());
        Self {
            node,
            registry,
            client,
            negotiator,
        }
    }

    /// The local node
    #[must_use]
    pub fn node(&self) -> &NodeProfile {
        &self.node
    }

    /// The party registry
    #[must_use]
    pub const fn registry(&self) -> &PartyRegistry {
        &self.registry
    }

    /// How to call `party`, encoding the token for `version` when known
    ///
    /// Before a version is agreed the encoding of our newest offered version
    /// is used; receivers accept either form.
    fn call_auth(&self, party: &RemoteParty, version: Option<&VersionId>) -> CallAuth {
        let version = version
            .or(party.selected_version.as_ref())
            .or_else(|| self.node.versions.iter().max());
        let base64 = version
            .and_then(descriptor)
            .is_some_and(|d| d.base64_tokens);
        CallAuth::token(party.outbound_token(Utc::now()), base64).with_tls(party.tls.clone())
    }
}

/// Map a registry failure to the local error carried in responses
pub(crate) fn local_error(error: &Error) -> LocalError {
    match error {
        Error::ConcurrentModification { .. } => LocalError::ConcurrentModification,
        Error::NotFound(identity) => LocalError::UnknownParty(identity.clone()),
        other => LocalError::Store(other.to_string()),
    }
}
