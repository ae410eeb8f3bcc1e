//! Hook event types

use std::fmt;
use std::time::{Duration, Instant};

/// Which side initiated the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We called the counterparty
    Outbound,
    /// The counterparty called us
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => write!(f, "outbound"),
            Self::Inbound => write!(f, "inbound"),
        }
    }
}

/// Metadata of one request/response exchange
#[derive(Debug, Clone)]
pub struct ExchangeEvent {
    pub direction: Direction,
    pub method: String,
    pub url: String,
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    /// HTTP status, absent for local failures
    pub http_status: Option<u16>,
    /// OCPI status code of the envelope
    pub status_code: Option<i32>,
    pub elapsed: Option<Duration>,
    started: Instant,
}

impl ExchangeEvent {
    fn new(direction: Direction, method: &str, url: &str) -> Self {
        Self {
            direction,
            method: method.to_string(),
            url: url.to_string(),
            request_id: None,
            correlation_id: None,
            http_status: None,
            status_code: None,
            elapsed: None,
            started: Instant::now(),
        }
    }

    /// An outbound exchange starting now
    #[must_use]
    pub fn outbound(method: &str, url: &str) -> Self {
        Self::new(Direction::Outbound, method, url)
    }

    /// An inbound exchange starting now
    #[must_use]
    pub fn inbound(method: &str, url: &str) -> Self {
        Self::new(Direction::Inbound, method, url)
    }

    /// Attach request and correlation ids
    #[must_use]
    pub fn with_ids(mut self, request_id: Option<&str>, correlation_id: Option<&str>) -> Self {
        self.request_id = request_id.map(String::from);
        self.correlation_id = correlation_id.map(String::from);
        self
    }

    /// Record the outcome and elapsed time
    #[must_use]
    pub fn completed(mut self, http_status: Option<u16>, status_code: Option<i32>) -> Self {
        self.http_status = http_status;
        self.status_code = status_code;
        self.elapsed = Some(self.started.elapsed());
        self
    }
}
