//! Command payloads and their synchronous and asynchronous responses

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{Error, Result};

/// Remote commands a CPO accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    CancelReservation,
    ReserveNow,
    StartSession,
    StopSession,
    UnlockConnector,
}

impl CommandType {
    /// Path segment used in command and callback URLs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CancelReservation => "CANCEL_RESERVATION",
            Self::ReserveNow => "RESERVE_NOW",
            Self::StartSession => "START_SESSION",
            Self::StopSession => "STOP_SESSION",
            Self::UnlockConnector => "UNLOCK_CONNECTOR",
        }
    }
}

impl FromStr for CommandType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "CANCEL_RESERVATION" => Ok(Self::CancelReservation),
            "RESERVE_NOW" => Ok(Self::ReserveNow),
            "START_SESSION" => Ok(Self::StartSession),
            "STOP_SESSION" => Ok(Self::StopSession),
            "UNLOCK_CONNECTOR" => Ok(Self::UnlockConnector),
            _ => Err(Error::InvalidArgument(format!("unknown command '{s}'"))),
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous answer to a command POST
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandResponseType {
    Accepted,
    NotSupported,
    Rejected,
    UnknownSession,
}

/// Final outcome delivered on the response URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandResultType {
    Accepted,
    CanceledReservation,
    EvseOccupied,
    EvseInoperative,
    Failed,
    NotSupported,
    Rejected,
    Timeout,
    UnknownReservation,
}

/// Localized text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayText {
    pub language: String,
    pub text: String,
}

/// Body of the synchronous command response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub result: CommandResponseType,
    /// Seconds the receiver expects to need before the asynchronous result
    #[serde(default)]
    pub timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<DisplayText>,
}

impl CommandResponse {
    /// A response with no message
    #[must_use]
    pub const fn new(result: CommandResponseType, timeout: u64) -> Self {
        Self {
            result,
            timeout,
            message: None,
        }
    }
}

/// Body of the asynchronous command result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub result: CommandResultType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<DisplayText>,
}

impl CommandResult {
    /// A result with no message
    #[must_use]
    pub const fn new(result: CommandResultType) -> Self {
        Self {
            result,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveNow {
    pub response_url: Url,
    /// Token object of the tokens module, passed through untouched
    pub token: Value,
    pub expiry_date: DateTime<Utc>,
    pub reservation_id: String,
    pub location_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSession {
    pub response_url: Url,
    pub token: Value,
    pub location_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopSession {
    pub response_url: Url,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockConnector {
    pub response_url: Url,
    pub location_id: String,
    pub evse_uid: String,
    pub connector_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReservation {
    pub response_url: Url,
    pub reservation_id: String,
}

/// A command together with its payload
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ReserveNow(ReserveNow),
    StartSession(StartSession),
    StopSession(StopSession),
    UnlockConnector(UnlockConnector),
    CancelReservation(CancelReservation),
}

impl Command {
    /// Command type, used as the URL path segment
    #[must_use]
    pub const fn kind(&self) -> CommandType {
        match self {
            Self::ReserveNow(_) => CommandType::ReserveNow,
            Self::StartSession(_) => CommandType::StartSession,
            Self::StopSession(_) => CommandType::StopSession,
            Self::UnlockConnector(_) => CommandType::UnlockConnector,
            Self::CancelReservation(_) => CommandType::CancelReservation,
        }
    }

    /// Where the receiver must deliver the asynchronous result
    #[must_use]
    pub const fn response_url(&self) -> &Url {
        match self {
            Self::ReserveNow(c) => &c.response_url,
            Self::StartSession(c) => &c.response_url,
            Self::StopSession(c) => &c.response_url,
            Self::UnlockConnector(c) => &c.response_url,
            Self::CancelReservation(c) => &c.response_url,
        }
    }

    /// Overwrite the response URL
    pub fn set_response_url(&mut self, url: Url) {
        match self {
            Self::ReserveNow(c) => c.response_url = url,
            Self::StartSession(c) => c.response_url = url,
            Self::StopSession(c) => c.response_url = url,
            Self::UnlockConnector(c) => c.response_url = url,
            Self::CancelReservation(c) => c.response_url = url,
        }
    }

    /// JSON body of the command POST
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the payload cannot be encoded
    pub fn to_body(&self) -> Result<Value> {
        let value = match self {
            Self::ReserveNow(c) => serde_json::to_value(c)?,
            Self::StartSession(c) => serde_json::to_value(c)?,
            Self::StopSession(c) => serde_json::to_value(c)?,
            Self::UnlockConnector(c) => serde_json::to_value(c)?,
            Self::CancelReservation(c) => serde_json::to_value(c)?,
        };
        Ok(value)
    }

    /// Parse a command POST body for a given command type
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the body does not match the command's payload
    pub fn from_body(kind: CommandType, body: Value) -> Result<Self> {
        let command = match kind {
            CommandType::ReserveNow => Self::ReserveNow(serde_json::from_value(body)?),
            CommandType::StartSession => Self::StartSession(serde_json::from_value(body)?),
            CommandType::StopSession => Self::StopSession(serde_json::from_value(body)?),
            CommandType::UnlockConnector => Self::UnlockConnector(serde_json::from_value(body)?),
            CommandType::CancelReservation => {
                Self::CancelReservation(serde_json::from_value(body)?)
            }
        };
        Ok(command)
    }
}
