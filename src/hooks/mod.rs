//! Observer hooks for OCPI request/response exchanges
//!
//! Observers are registered explicitly and called synchronously in
//! registration order. They see metadata only, never tokens or bodies.

mod types;

pub use types::{Direction, ExchangeEvent};

use std::sync::Arc;

use parking_lot::RwLock;

/// Receives exchange events
pub trait ExchangeObserver: Send + Sync {
    /// Called before a request is sent or after one is received
    fn on_request(&self, _event: &ExchangeEvent) {}

    /// Called once the exchange has an outcome
    fn on_response(&self, _event: &ExchangeEvent) {}
}

/// Ordered list of exchange observers
#[derive(Default)]
pub struct ExchangeHooks {
    observers: RwLock<Vec<Arc<dyn ExchangeObserver>>>,
}

impl std::fmt::Debug for ExchangeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeHooks")
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl ExchangeHooks {
    /// An empty hook list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A hook list with the tracing observer installed
    #[must_use]
    pub fn with_tracing() -> Self {
        let hooks = Self::new();
        hooks.register(Arc::new(TracingObserver));
        hooks
    }

    /// Append an observer
    pub fn register(&self, observer: Arc<dyn ExchangeObserver>) {
        self.observers.write().push(observer);
    }

    /// Number of registered observers
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Whether no observer is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Notify every observer of a request
    pub fn request(&self, event: &ExchangeEvent) {
        // Snapshot so observers may register further observers
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_request(event);
        }
    }

    /// Notify every observer of a response
    pub fn response(&self, event: &ExchangeEvent) {
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_response(event);
        }
    }
}

/// Logs exchanges through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ExchangeObserver for TracingObserver {
    fn on_request(&self, event: &ExchangeEvent) {
        tracing::debug!(
            direction = %event.direction,
            method = %event.method,
            url = %event.url,
            request_id = event.request_id.as_deref().unwrap_or("-"),
            correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
            "ocpi request"
        );
    }

    fn on_response(&self, event: &ExchangeEvent) {
        tracing::debug!(
            direction = %event.direction,
            method = %event.method,
            url = %event.url,
            http_status = ?event.http_status,
            status_code = ?event.status_code,
            elapsed_ms = event.elapsed.map(|d| d.as_millis()),
            "ocpi response"
        );
    }
}
