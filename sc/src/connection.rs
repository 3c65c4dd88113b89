//! Authenticated HTTP connection with retries
//!
//! One logical call becomes up to `max_retries + 1` attempts. Each attempt
//! asks the [`TokenManager`] for a token (normally a cache hit), sends the
//! request, and classifies the outcome:
//!
//! - status < 400: the body is parsed as JSON and returned
//! - 429/500/502/503/504 with attempts left: wait (`Retry-After` or backoff) and retry
//! - any other status >= 400, or no attempts left: fail with a classified [`ApiError`]
//! - connect failure or timeout: retry with backoff, then fail as `Connection`/`Timeout`
//!
//! Token acquisition failures are returned immediately.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::error::{ApiError, Result, ScopeError};
use crate::retry::{RetryPolicy, is_retryable_status, parse_retry_after};
use crate::telemetry::{ErrorInfo, RequestInfo, ResponseInfo, Telemetry, generate_request_id, redact_headers};
use crate::token::TokenManager;
use crate::transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TransportError};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("scope-client-rust/", env!("CARGO_PKG_VERSION"));

/// Blocks the calling thread between attempts
pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

pub struct Connection {
    config: Arc<Configuration>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    token_manager: TokenManager,
    telemetry: Arc<Telemetry>,
    policy: RetryPolicy,
    sleeper: Sleeper,
}

impl Connection {
    /// Connection over the blocking reqwest transport
    pub fn new(config: Arc<Configuration>, telemetry: Arc<Telemetry>) -> Self {
        let transport = Arc::new(ReqwestTransport::new(config.open_timeout(), USER_AGENT));
        Self::with_transport(config, transport, telemetry)
    }

    /// Connection over a caller-supplied transport
    pub fn with_transport(config: Arc<Configuration>, transport: Arc<dyn Transport>, telemetry: Arc<Telemetry>) -> Self {
        debug!(api_url = %config.api_url(), "Connection::with_transport: called");
        let token_manager = TokenManager::new(Arc::clone(&config), Arc::clone(&transport));
        let policy = RetryPolicy::from_config(&config);
        Self {
            config,
            transport: Mutex::new(Some(transport)),
            token_manager,
            telemetry,
            policy,
            sleeper: Arc::new(std::thread::sleep),
        }
    }

    /// Replace the function used to wait between attempts
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.token_manager
    }

    pub fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        self.request(Method::Get, path, query, None)
    }

    pub fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        self.request(Method::Post, path, &[], body)
    }

    pub fn put(&self, path: &str, body: Option<Value>) -> Result<Value> {
        self.request(Method::Put, path, &[], body)
    }

    pub fn delete(&self, path: &str) -> Result<Value> {
        self.request(Method::Delete, path, &[], None)
    }

    /// Release the transport; later requests fail with a connection error
    pub fn close(&self) {
        info!("Connection::close: called");
        self.transport.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_closed(&self) -> bool {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ScopeError::connection("connection is closed"))
    }

    /// Execute one logical request with retries
    pub fn request(&self, method: Method, path: &str, query: &[(String, String)], body: Option<Value>) -> Result<Value> {
        let request_id = generate_request_id();
        let url = format!("{}/{}", self.config.api_url(), path.trim_start_matches('/'));
        let max_attempts = self.policy.max_attempts();
        debug!(%request_id, %method, %url, max_attempts, "Connection::request: called");

        let mut attempt = 0;
        loop {
            attempt += 1;
            let transport = self.transport()?;
            let token = self.token_manager.get_access_token()?;
            let request = self.build_request(method, &url, &request_id, &token, query, body.clone());

            if self.config.telemetry_enabled {
                self.telemetry.emit_request(&RequestInfo {
                    request_id: request_id.clone(),
                    method: method.to_string(),
                    url: url.clone(),
                    headers: redact_headers(&request.headers),
                    body: request.body.clone(),
                });
            }

            let started = Instant::now();
            let retries_left = attempt < max_attempts;
            match transport.send(request) {
                Ok(response) => {
                    let elapsed = started.elapsed();
                    debug!(%request_id, attempt, status = response.status, ?elapsed, "Connection::request: response");
                    if self.config.telemetry_enabled {
                        self.emit_response(&request_id, &response, elapsed);
                    }

                    if response.is_success() {
                        return parse_body(&response);
                    }

                    if is_retryable_status(response.status) && retries_left {
                        let wait = response
                            .header("retry-after")
                            .and_then(parse_retry_after)
                            .unwrap_or_else(|| self.policy.delay_for(attempt));
                        warn!(%request_id, attempt, status = response.status, ?wait, "Connection::request: retrying");
                        (self.sleeper)(wait);
                        continue;
                    }

                    return Err(ScopeError::Api(classify_response(&response, &request_id)));
                }
                Err(e) => {
                    let elapsed = started.elapsed();
                    let retryable = matches!(e, TransportError::Connect(_) | TransportError::Timeout(_));
                    let error = self.transport_error(e, &url);
                    if self.config.telemetry_enabled {
                        self.telemetry.emit_error(&ErrorInfo {
                            request_id: request_id.clone(),
                            message: error.to_string(),
                            elapsed,
                        });
                    }

                    if retryable && retries_left {
                        let wait = self.policy.delay_for(attempt);
                        warn!(%request_id, attempt, error = %error, ?wait, "Connection::request: retrying");
                        (self.sleeper)(wait);
                        continue;
                    }

                    warn!(%request_id, attempt, error = %error, "Connection::request: giving up");
                    return Err(error);
                }
            }
        }
    }

    fn build_request(
        &self,
        method: Method,
        url: &str,
        request_id: &str,
        token: &str,
        query: &[(String, String)],
        body: Option<Value>,
    ) -> HttpRequest {
        let mut request = HttpRequest::new(method, url, self.config.timeout());
        request.headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
            ("X-Request-ID".to_string(), request_id.to_string()),
            ("Authorization".to_string(), format!("Bearer {}", token)),
        ];
        if !self.config.environment.is_empty() {
            request
                .headers
                .push(("X-Scope-Environment".to_string(), self.config.environment.clone()));
        }
        request.query = query.to_vec();
        request.body = body;
        request
    }

    fn transport_error(&self, error: TransportError, url: &str) -> ScopeError {
        match error {
            TransportError::Timeout(_) => ScopeError::Timeout {
                message: format!("Request timed out after {}s", self.config.timeout_secs),
                source: Some(error),
            },
            TransportError::Connect(_) => ScopeError::Connection {
                message: format!("Failed to connect to {}", self.config.base_url),
                source: Some(error),
            },
            TransportError::Other(_) => ScopeError::Connection {
                message: format!("Request to {} failed", url),
                source: Some(error),
            },
        }
    }

    fn emit_response(&self, request_id: &str, response: &HttpResponse, elapsed: Duration) {
        let body = if response.body.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&response.body).unwrap_or_else(|_| Value::String(response.body.clone())))
        };
        self.telemetry.emit_response(&ResponseInfo {
            request_id: request_id.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            body,
            elapsed,
        });
    }
}

fn parse_body(response: &HttpResponse) -> Result<Value> {
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&response.body).map_err(|e| ScopeError::InvalidResponse(format!("body is not valid JSON: {}", e)))
}

/// Build an [`ApiError`] from an error response
///
/// Reads `{"error": {"code", "message"}}` from the body when present. The
/// request id is taken from the response header, else the one we sent.
pub fn classify_response(response: &HttpResponse, request_id: &str) -> ApiError {
    let detail = serde_json::from_str::<Value>(&response.body)
        .ok()
        .and_then(|data| data.get("error").cloned())
        .filter(Value::is_object);
    let field = |name: &str| {
        detail
            .as_ref()
            .and_then(|d| d.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    ApiError::from_status(response.status, field("message"))
        .with_body(response.body.clone())
        .with_error_code(field("code"))
        .with_request_id(response.header("x-request-id").unwrap_or(request_id))
        .with_retry_after(response.header("retry-after").and_then(parse_retry_after))
}
