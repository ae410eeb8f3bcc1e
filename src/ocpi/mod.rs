//! OCPI wire types shared by every protocol revision

pub mod commands;
pub mod credentials;
pub mod endpoints;
pub mod envelope;
pub mod version;

pub use commands::{
    CancelReservation, Command, CommandResponse, CommandResponseType, CommandResult,
    CommandResultType, CommandType, DisplayText, ReserveNow, StartSession, StopSession,
    UnlockConnector,
};
pub use credentials::{BusinessDetails, Credentials, CredentialsRole};
pub use endpoints::{Endpoint, InterfaceRole, ModuleId, VersionDetails, VersionInfo};
pub use envelope::{HttpMeta, LocalError, OcpiResponse, status};
pub use version::{
    CredentialsShape, DESCRIPTORS, V2_1_1, V2_2_1, V2_3_0, VersionDescriptor, VersionId,
    descriptor, supported_versions,
};
