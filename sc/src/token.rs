//! Bearer token lifecycle
//!
//! The [`TokenManager`] exchanges the configured credentials for a short-lived
//! bearer token and keeps it until it is within the refresh buffer of expiry.
//! The refresh check and the refresh itself run under one lock, so concurrent
//! callers never issue more than one token request at a time.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::error::{Result, ScopeError};
use crate::transport::{HttpRequest, HttpResponse, Method, Transport, TransportError};

/// Token lifetime assumed when the auth API omits `expires_in`
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(300);

/// Longest token lifetime trusted from the auth API (24 hours)
pub const MAX_EXPIRES_IN: Duration = Duration::from_secs(86_400);

/// A bearer token and the instant it expires
#[derive(Clone)]
pub struct TokenInfo {
    pub access_token: String,
    pub expires_at: Instant,
}

impl std::fmt::Debug for TokenInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenInfo")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct TokenManager {
    config: Arc<Configuration>,
    transport: Arc<dyn Transport>,
    token: Mutex<Option<TokenInfo>>,
}

impl TokenManager {
    pub fn new(config: Arc<Configuration>, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            token: Mutex::new(None),
        }
    }

    /// Return a valid access token, fetching a new one when needed
    pub fn get_access_token(&self) -> Result<String> {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if Self::is_stale(token.as_ref(), self.config.token_refresh_buffer()) {
            *token = Some(self.fetch_token()?);
        }
        token
            .as_ref()
            .map(|info| info.access_token.clone())
            .ok_or_else(|| ScopeError::TokenRefresh {
                message: "No token available after refresh".to_string(),
                source: None,
            })
    }

    /// True when no token is held or it expires within the refresh buffer
    pub fn needs_refresh(&self) -> bool {
        let token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        Self::is_stale(token.as_ref(), self.config.token_refresh_buffer())
    }

    /// Drop the held token so the next call fetches a fresh one
    pub fn invalidate(&self) {
        debug!("TokenManager::invalidate: called");
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn is_stale(token: Option<&TokenInfo>, buffer: Duration) -> bool {
        match token {
            None => true,
            Some(info) => match info.expires_at.checked_sub(buffer) {
                Some(refresh_at) => Instant::now() >= refresh_at,
                None => true,
            },
        }
    }

    fn fetch_token(&self) -> Result<TokenInfo> {
        let credentials = self.config.credentials.as_ref().ok_or_else(|| ScopeError::MissingCredential {
            field: "credentials".to_string(),
        })?;
        credentials.validate()?;

        let url = self.config.token_url();
        debug!(%url, auth_type = credentials.auth_type(), "TokenManager::fetch_token: called");

        let mut request = HttpRequest::new(Method::Post, url, self.config.timeout());
        request.headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        request.body = Some(credentials.token_request_body());

        let response = self.transport.send(request).map_err(|e| {
            warn!(error = %e, "TokenManager::fetch_token: transport failure");
            let message = match &e {
                TransportError::Timeout(_) => format!("Auth API request timed out: {}", e),
                _ => format!("Failed to connect to auth API: {}", e),
            };
            ScopeError::TokenRefresh {
                message,
                source: Some(e),
            }
        })?;

        Self::handle_token_response(response)
    }

    fn handle_token_response(response: HttpResponse) -> Result<TokenInfo> {
        match response.status {
            200 => {
                let data: Value = serde_json::from_str(&response.body).map_err(|e| ScopeError::TokenRefresh {
                    message: format!("Invalid token response: {}", e),
                    source: None,
                })?;
                let access_token = data
                    .get("access_token")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ScopeError::TokenRefresh {
                        message: "Token response missing access_token".to_string(),
                        source: None,
                    })?
                    .to_string();
                let expires_in = data
                    .get("expires_in")
                    .and_then(Value::as_f64)
                    .map(token_lifetime)
                    .unwrap_or(DEFAULT_EXPIRES_IN);

                info!(?expires_in, "TokenManager::fetch_token: token refreshed");
                let now = Instant::now();
                Ok(TokenInfo {
                    access_token,
                    expires_at: now.checked_add(expires_in).unwrap_or(now),
                })
            }
            401 => Err(ScopeError::InvalidCredentials("Invalid SDK credentials".to_string())),
            403 => Err(ScopeError::InvalidCredentials(
                "SDK credentials are not authorized".to_string(),
            )),
            status => {
                let message = serde_json::from_str::<Value>(&response.body)
                    .ok()
                    .and_then(|data| {
                        ["message", "error"]
                            .iter()
                            .find_map(|key| data.get(*key).and_then(Value::as_str).map(str::to_string))
                    })
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| format!("Token refresh failed (HTTP {})", status));
                warn!(status, %message, "TokenManager::fetch_token: refresh failed");
                Err(ScopeError::TokenRefresh { message, source: None })
            }
        }
    }
}

/// Clamp a server-reported `expires_in` to `[0, MAX_EXPIRES_IN]`
///
/// Negative values count as already expired; NaN falls back to the default.
fn token_lifetime(secs: f64) -> Duration {
    if secs.is_nan() {
        return DEFAULT_EXPIRES_IN;
    }
    Duration::try_from_secs_f64(secs.max(0.0))
        .unwrap_or(MAX_EXPIRES_IN)
        .min(MAX_EXPIRES_IN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use crate::credentials::Credentials;
    use crate::transport::mock::MockTransport;
    use serde_json::json;
    use std::thread;

    const AUTH: &str = "/auth/sdk-token";

    fn config() -> Arc<Configuration> {
        Arc::new(Configuration::default().merge(ConfigOverrides {
            credentials: Some(Credentials::api_key("org", "key", "secret")),
            ..Default::default()
        }))
    }

    fn manager(transport: MockTransport) -> (TokenManager, Arc<MockTransport>) {
        let transport = Arc::new(transport);
        (TokenManager::new(config(), transport.clone()), transport)
    }

    fn token_response(token: &str, expires_in: u64) -> HttpResponse {
        HttpResponse::json(200, json!({"access_token": token, "expires_in": expires_in}))
    }

    #[test]
    fn test_fetches_and_caches_token() {
        let (tm, transport) = manager(MockTransport::new().on(AUTH, token_response("tok-1", 3600)));

        assert!(tm.needs_refresh());
        assert_eq!(tm.get_access_token().unwrap(), "tok-1");
        assert_eq!(tm.get_access_token().unwrap(), "tok-1");
        assert!(!tm.needs_refresh());
        assert_eq!(transport.request_count(AUTH), 1);

        let request = &transport.requests()[0];
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.url, "https://auth.scope.io/v1/auth/sdk-token");
        let body = request.body.as_ref().unwrap();
        assert_eq!(body["account_id"], "org");
        assert_eq!(body["key_id"], "key");
        assert_eq!(body["key_secret"], "secret");
    }

    #[test]
    fn test_concurrent_callers_share_one_refresh() {
        let (tm, transport) = manager(
            MockTransport::new()
                .with_delay(Duration::from_millis(50))
                .on(AUTH, token_response("shared", 3600)),
        );
        let tm = Arc::new(tm);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tm = Arc::clone(&tm);
                thread::spawn(move || tm.get_access_token())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), "shared");
        }
        assert_eq!(transport.request_count(AUTH), 1);
    }

    #[test]
    fn test_token_inside_buffer_refreshes_once() {
        // 30s lifetime is inside the 60s refresh buffer
        let (tm, transport) = manager(
            MockTransport::new()
                .on(AUTH, token_response("short", 30))
                .on(AUTH, token_response("long", 3600)),
        );

        assert_eq!(tm.get_access_token().unwrap(), "short");
        assert!(tm.needs_refresh());
        assert_eq!(tm.get_access_token().unwrap(), "long");
        assert_eq!(tm.get_access_token().unwrap(), "long");
        assert_eq!(transport.request_count(AUTH), 2);
    }

    #[test]
    fn test_missing_expires_in_defaults() {
        let (tm, _) = manager(MockTransport::new().on(AUTH, HttpResponse::json(200, json!({"access_token": "t"}))));
        tm.get_access_token().unwrap();

        let held = tm.token.lock().unwrap().clone().unwrap();
        let remaining = held.expires_at - Instant::now();
        assert!(remaining > Duration::from_secs(290));
        assert!(remaining <= DEFAULT_EXPIRES_IN);
    }

    #[test]
    fn test_huge_expires_in_is_capped() {
        let (tm, transport) = manager(
            MockTransport::new().on(AUTH, HttpResponse::json(200, json!({"access_token": "t", "expires_in": 1e20}))),
        );
        assert_eq!(tm.get_access_token().unwrap(), "t");

        let held = tm.token.lock().unwrap().clone().unwrap();
        assert!(held.expires_at - Instant::now() <= MAX_EXPIRES_IN);
        assert!(!tm.needs_refresh());
        tm.get_access_token().unwrap();
        assert_eq!(transport.request_count(AUTH), 1);
    }

    #[test]
    fn test_token_lifetime_bounds() {
        assert_eq!(token_lifetime(900.0), Duration::from_secs(900));
        assert_eq!(token_lifetime(1e19), MAX_EXPIRES_IN);
        assert_eq!(token_lifetime(f64::INFINITY), MAX_EXPIRES_IN);
        assert_eq!(token_lifetime(-5.0), Duration::ZERO);
        assert_eq!(token_lifetime(f64::NAN), DEFAULT_EXPIRES_IN);
    }

    #[test]
    fn test_invalid_credentials() {
        let (tm, _) = manager(MockTransport::new().on(AUTH, HttpResponse::new(401, "")));
        let err = tm.get_access_token().unwrap_err();
        assert!(matches!(err, ScopeError::InvalidCredentials(ref m) if m == "Invalid SDK credentials"));

        let (tm, _) = manager(MockTransport::new().on(AUTH, HttpResponse::new(403, "")));
        let err = tm.get_access_token().unwrap_err();
        assert!(matches!(err, ScopeError::InvalidCredentials(ref m) if m == "SDK credentials are not authorized"));
    }

    #[test]
    fn test_server_error_uses_body_message() {
        let (tm, _) = manager(
            MockTransport::new().on(AUTH, HttpResponse::json(500, json!({"message": "auth backend down"}))),
        );
        let err = tm.get_access_token().unwrap_err();
        assert!(matches!(err, ScopeError::TokenRefresh { ref message, .. } if message == "auth backend down"));

        let (tm, _) = manager(MockTransport::new().on(AUTH, HttpResponse::new(502, "<html>")));
        let err = tm.get_access_token().unwrap_err();
        assert_eq!(err.to_string(), "Token refresh failed (HTTP 502)");
    }

    #[test]
    fn test_transport_failure_wraps_cause() {
        let (tm, _) = manager(MockTransport::new().on_error(AUTH, TransportError::Connect("refused".to_string())));
        let err = tm.get_access_token().unwrap_err();
        match err {
            ScopeError::TokenRefresh { message, source } => {
                assert!(message.starts_with("Failed to connect to auth API"));
                assert_eq!(source, Some(TransportError::Connect("refused".to_string())));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let (tm, _) = manager(MockTransport::new().on_error(AUTH, TransportError::Timeout("slow".to_string())));
        let err = tm.get_access_token().unwrap_err();
        assert!(err.to_string().starts_with("Auth API request timed out"));
    }

    #[test]
    fn test_failed_refresh_is_not_retried_internally() {
        let (tm, transport) = manager(MockTransport::new().on(AUTH, HttpResponse::new(503, "")));
        assert!(tm.get_access_token().is_err());
        assert_eq!(transport.request_count(AUTH), 1);
    }

    #[test]
    fn test_missing_credentials() {
        let transport = Arc::new(MockTransport::new());
        let tm = TokenManager::new(Arc::new(Configuration::default()), transport.clone());
        assert!(matches!(tm.get_access_token(), Err(ScopeError::MissingCredential { .. })));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_invalidate_forces_refetch() {
        let (tm, transport) = manager(MockTransport::new().on(AUTH, token_response("t", 3600)));
        tm.get_access_token().unwrap();
        tm.invalidate();
        assert!(tm.needs_refresh());
        tm.get_access_token().unwrap();
        assert_eq!(transport.request_count(AUTH), 2);
    }
}
