//! Request/response observer hooks
//!
//! A [`Telemetry`] registry belongs to one client. Observers are plain
//! closures registered for request, response or error events. A panicking
//! observer is caught and ignored; it never reaches the request path.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

/// Header names whose values are masked in telemetry
const SENSITIVE_HEADERS: [&str; 3] = ["authorization", "x-api-key", "api-key"];

/// An outgoing request attempt
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub request_id: String,
    pub method: String,
    pub url: String,
    /// Already redacted
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// A received response, successful or not
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub request_id: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Parsed JSON, or the raw text as a JSON string when it does not parse
    pub body: Option<Value>,
    pub elapsed: Duration,
}

/// A network-level failure of one attempt
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub request_id: String,
    pub message: String,
    pub elapsed: Duration,
}

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Default)]
struct Observers {
    request: Vec<Observer<RequestInfo>>,
    response: Vec<Observer<ResponseInfo>>,
    error: Vec<Observer<ErrorInfo>>,
}

/// Per-client observer registry
#[derive(Default)]
pub struct Telemetry {
    observers: Mutex<Observers>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Observers> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_request(&self, observer: impl Fn(&RequestInfo) + Send + Sync + 'static) {
        debug!("Telemetry::on_request: registered");
        self.lock().request.push(Arc::new(observer));
    }

    pub fn on_response(&self, observer: impl Fn(&ResponseInfo) + Send + Sync + 'static) {
        debug!("Telemetry::on_response: registered");
        self.lock().response.push(Arc::new(observer));
    }

    pub fn on_error(&self, observer: impl Fn(&ErrorInfo) + Send + Sync + 'static) {
        debug!("Telemetry::on_error: registered");
        self.lock().error.push(Arc::new(observer));
    }

    /// Remove every registered observer
    pub fn clear(&self) {
        *self.lock() = Observers::default();
    }

    pub fn has_observers(&self) -> bool {
        let observers = self.lock();
        !(observers.request.is_empty() && observers.response.is_empty() && observers.error.is_empty())
    }

    pub fn emit_request(&self, info: &RequestInfo) {
        let observers = self.lock().request.clone();
        dispatch(&observers, info, "request");
    }

    pub fn emit_response(&self, info: &ResponseInfo) {
        let observers = self.lock().response.clone();
        dispatch(&observers, info, "response");
    }

    pub fn emit_error(&self, info: &ErrorInfo) {
        let observers = self.lock().error.clone();
        dispatch(&observers, info, "error");
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let observers = self.lock();
        f.debug_struct("Telemetry")
            .field("request", &observers.request.len())
            .field("response", &observers.response.len())
            .field("error", &observers.error.len())
            .finish()
    }
}

// Observers run outside the registry lock so they may register others
fn dispatch<T>(observers: &[Observer<T>], info: &T, event: &str) {
    for observer in observers {
        if panic::catch_unwind(AssertUnwindSafe(|| observer(info))).is_err() {
            warn!(event, "Telemetry::dispatch: observer panicked");
        }
    }
}

/// Fresh unique request id
pub fn generate_request_id() -> String {
    Uuid::now_v7().to_string()
}

/// Mask credential-bearing header values
pub fn redact_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.to_ascii_lowercase();
            if !SENSITIVE_HEADERS.contains(&lower.as_str()) {
                return (name.clone(), value.clone());
            }
            let masked = if value.to_ascii_lowercase().starts_with("bearer ") {
                "Bearer [REDACTED]"
            } else {
                "[REDACTED]"
            };
            (name.clone(), masked.to_string())
        })
        .collect()
}
