//! Known counterparties and their trust state

pub mod registry;
pub mod store;
pub mod types;

pub use registry::PartyRegistry;
pub use store::{MemoryPartyStore, PartyStore};
pub use types::{
    LocalAccessStatus, PartyDraft, PartyIdentity, PartyStatus, RemoteAccessStatus, RemoteParty,
    Role,
};
