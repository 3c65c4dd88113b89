//! HTTP transport abstraction
//!
//! The connection layer and the token manager speak to the network only
//! through [`Transport`]. The production implementation wraps a blocking
//! reqwest client; tests substitute a scripted double.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::debug;

/// HTTP methods used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A fully-resolved outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            timeout,
        }
    }

    /// Look up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response; header names are lower-cased
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Build a response with a JSON body
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Network-level failures, before any HTTP status is available
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Sends a single HTTP request and returns the raw response
///
/// Implementations must not retry; retry policy lives in the caller.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Blocking reqwest transport with a lazily-built client
pub struct ReqwestTransport {
    connect_timeout: Duration,
    user_agent: String,
    client: OnceLock<Client>,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self {
            connect_timeout,
            user_agent: user_agent.into(),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&Client, TransportError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        debug!(connect_timeout = ?self.connect_timeout, "ReqwestTransport::client: building client");
        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "ReqwestTransport::send: called");
        let client = self.client()?;

        let mut builder = client
            .request(request.method.into(), &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().map_err(TransportError::from_reqwest)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().map_err(TransportError::from_reqwest)?;

        debug!(status, body_len = body.len(), "ReqwestTransport::send: received");
        Ok(HttpResponse { status, headers, body })
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Scripted = Result<HttpResponse, TransportError>;

    /// Scripted transport for unit tests
    ///
    /// Responses are registered per URL fragment. Each route replays its
    /// queue in order and keeps repeating the last entry once drained.
    pub struct MockTransport {
        routes: Mutex<Vec<(String, VecDeque<Scripted>)>>,
        requests: Mutex<Vec<HttpRequest>>,
        delay: Option<Duration>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                routes: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        /// Sleep inside every send, to widen race windows
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn on(self, url_fragment: &str, response: HttpResponse) -> Self {
            self.push(url_fragment, Ok(response));
            self
        }

        pub fn on_error(self, url_fragment: &str, error: TransportError) -> Self {
            self.push(url_fragment, Err(error));
            self
        }

        fn push(&self, url_fragment: &str, scripted: Scripted) {
            let mut routes = self.routes.lock().unwrap();
            match routes.iter_mut().find(|(fragment, _)| fragment == url_fragment) {
                Some((_, queue)) => queue.push_back(scripted),
                None => routes.push((url_fragment.to_string(), VecDeque::from([scripted]))),
            }
        }

        /// Every request sent so far, in order
        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn request_count(&self, url_fragment: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url.contains(url_fragment))
                .count()
        }
    }

    impl Transport for MockTransport {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            debug!(url = %request.url, "MockTransport::send: called");
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }

            let mut routes = self.routes.lock().unwrap();
            let queue = routes
                .iter_mut()
                .find(|(fragment, _)| request.url.contains(fragment.as_str()))
                .map(|(_, queue)| queue);
            match queue {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue.front().cloned().unwrap(),
                None => Err(TransportError::Other(format!("no mock route for {}", request.url))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    #[test]
    fn test_response_headers_case_insensitive() {
        let response = HttpResponse::new(429, "").with_header("Retry-After", "2");
        assert_eq!(response.header("retry-after"), Some("2"));
        assert_eq!(response.header("RETRY-AFTER"), Some("2"));
        assert!(!response.is_success());
    }

    #[test]
    fn test_request_header_lookup() {
        let mut request = HttpRequest::new(Method::Get, "https://api.scope.io/v1/prompts", Duration::from_secs(1));
        request.headers.push(("X-Request-ID".to_string(), "abc".to_string()));
        assert_eq!(request.header("x-request-id"), Some("abc"));
        assert_eq!(request.header("authorization"), None);
    }

    #[test]
    fn test_method_display() {
        assert_eq!(Method::Get.to_string(), "GET");
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_mock_replays_then_repeats_last() {
        let transport = MockTransport::new()
            .on("/prompts", HttpResponse::new(500, ""))
            .on("/prompts", HttpResponse::new(200, "ok"));

        let request = HttpRequest::new(Method::Get, "https://x/v1/prompts", Duration::from_secs(1));
        assert_eq!(transport.send(request.clone()).unwrap().status, 500);
        assert_eq!(transport.send(request.clone()).unwrap().status, 200);
        assert_eq!(transport.send(request.clone()).unwrap().status, 200);
        assert_eq!(transport.request_count("/prompts"), 3);
    }

    #[test]
    fn test_mock_unrouted_request_fails() {
        let transport = MockTransport::new();
        let request = HttpRequest::new(Method::Get, "https://x/v1/other", Duration::from_secs(1));
        assert!(matches!(transport.send(request), Err(TransportError::Other(_))));
    }
}
