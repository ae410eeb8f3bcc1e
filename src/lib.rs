//! OCPI Gateway - credentials exchange, trust and command correlation
//!
//! This library provides the core of an OCPI 2.x node:
//! - Registration of counterparties through the credentials handshake
//! - Token and client-certificate validation of inbound requests
//! - Command dispatch with asynchronous result correlation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     HTTP API                         │
//! │   /ocpi (versions, credentials, commands)  │  /api   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   Trust  │  Registration  │  Commands  │  Versions  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │      Party registry (SQLite)  │  OCPI client        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod hooks;
pub mod node;
pub mod ocpi;
pub mod parties;
pub mod registration;
pub mod security;
pub mod versions;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
