//! High-level client for the Scope API
//!
//! [`ScopeClient`] resolves prompt and version lookups to API paths, wraps
//! each lookup in the TTL cache, and decodes payloads into typed resources.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::config::Configuration;
use crate::connection::Connection;
use crate::error::{Result, ScopeError};
use crate::resources::{ListParams, Prompt, PromptPage, PromptVersion, from_json};
use crate::telemetry::Telemetry;
use crate::transport::Transport;

/// Per-call cache control
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchOptions {
    /// Read from and write to the cache; ignored when caching is disabled
    pub use_cache: bool,
    /// Lifetime of the entry written by this call
    pub cache_ttl: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            cache_ttl: None,
        }
    }
}

impl FetchOptions {
    /// Always go to the API
    pub fn no_cache() -> Self {
        Self {
            use_cache: false,
            cache_ttl: None,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            use_cache: true,
            cache_ttl: Some(ttl),
        }
    }
}

/// Which version of a prompt to fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VersionRef {
    #[default]
    Production,
    Latest,
    Id(String),
}

impl FromStr for VersionRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "production" => VersionRef::Production,
            "latest" => VersionRef::Latest,
            id => VersionRef::Id(id.to_string()),
        })
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRef::Production => f.write_str("production"),
            VersionRef::Latest => f.write_str("latest"),
            VersionRef::Id(id) => f.write_str(id),
        }
    }
}

pub struct ScopeClient {
    config: Arc<Configuration>,
    connection: Connection,
    telemetry: Arc<Telemetry>,
    prompts: Option<TtlCache<Prompt>>,
    versions: Option<TtlCache<PromptVersion>>,
}

impl ScopeClient {
    /// Create a client over HTTPS
    pub fn new(config: Configuration) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let telemetry = Arc::new(Telemetry::new());
        let connection = Connection::new(Arc::clone(&config), Arc::clone(&telemetry));
        Ok(Self::assemble(config, connection, telemetry))
    }

    /// Create a client over a caller-supplied transport
    pub fn with_transport(config: Configuration, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let telemetry = Arc::new(Telemetry::new());
        let connection = Connection::with_transport(Arc::clone(&config), transport, Arc::clone(&telemetry));
        Ok(Self::assemble(config, connection, telemetry))
    }

    fn assemble(config: Arc<Configuration>, connection: Connection, telemetry: Arc<Telemetry>) -> Self {
        info!(
            api_url = %config.api_url(),
            environment = %config.environment,
            cache_enabled = config.cache_enabled,
            "ScopeClient: created"
        );
        let (prompts, versions) = if config.cache_enabled {
            (
                Some(TtlCache::new(config.cache_ttl())),
                Some(TtlCache::new(config.cache_ttl())),
            )
        } else {
            (None, None)
        };
        Self {
            config,
            connection,
            telemetry,
            prompts,
            versions,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Observer registry for this client's requests
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Fetch a prompt by id or name
    pub fn get_prompt(&self, prompt_id: &str, options: &FetchOptions) -> Result<Prompt> {
        debug!(%prompt_id, "ScopeClient::get_prompt: called");
        let key = format!("prompt:{}", prompt_id);
        cached(self.prompts.as_ref(), &key, options, || {
            let data = self.connection.get(&format!("prompts/{}", prompt_id), &[])?;
            from_json(data, "prompt")
        })
    }

    /// Fetch the most recent version of a prompt
    pub fn get_prompt_latest(&self, prompt_id: &str, options: &FetchOptions) -> Result<PromptVersion> {
        debug!(%prompt_id, "ScopeClient::get_prompt_latest: called");
        self.fetch_version(
            &format!("prompt:{}:latest", prompt_id),
            &format!("prompts/{}/latest", prompt_id),
            options,
        )
    }

    /// Fetch the version labelled production
    ///
    /// A 404 here becomes [`ScopeError::NoProductionVersion`].
    pub fn get_prompt_production(&self, prompt_id: &str, options: &FetchOptions) -> Result<PromptVersion> {
        debug!(%prompt_id, "ScopeClient::get_prompt_production: called");
        self.fetch_version(
            &format!("prompt:{}:production", prompt_id),
            &format!("prompts/{}/production", prompt_id),
            options,
        )
        .map_err(|e| {
            if e.is_not_found() {
                ScopeError::NoProductionVersion {
                    prompt_id: prompt_id.to_string(),
                }
            } else {
                e
            }
        })
    }

    /// Fetch a specific version by id
    pub fn get_prompt_version(&self, prompt_id: &str, version_id: &str, options: &FetchOptions) -> Result<PromptVersion> {
        debug!(%prompt_id, %version_id, "ScopeClient::get_prompt_version: called");
        self.fetch_version(
            &format!("prompt:{}:version:{}", prompt_id, version_id),
            &format!("prompts/{}/versions/{}", prompt_id, version_id),
            options,
        )
    }

    /// Fetch whichever version `version` names
    pub fn get_version(&self, prompt_id: &str, version: &VersionRef, options: &FetchOptions) -> Result<PromptVersion> {
        match version {
            VersionRef::Production => self.get_prompt_production(prompt_id, options),
            VersionRef::Latest => self.get_prompt_latest(prompt_id, options),
            VersionRef::Id(version_id) => self.get_prompt_version(prompt_id, version_id, options),
        }
    }

    /// List prompts; listings are never cached
    pub fn list_prompts(&self, params: &ListParams) -> Result<PromptPage> {
        debug!(?params, "ScopeClient::list_prompts: called");
        let data = self.connection.get("prompts", &params.to_query())?;
        if data.is_null() {
            return Ok(PromptPage::default());
        }
        from_json(data, "prompt list")
    }

    /// Fetch a version and render it with `values`
    pub fn render_prompt<I, K, V>(
        &self,
        prompt_id: &str,
        values: I,
        version: &VersionRef,
        options: &FetchOptions,
    ) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        self.get_version(prompt_id, version, options)?.render(values)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.prompts {
            cache.clear();
        }
        if let Some(cache) = &self.versions {
            cache.clear();
        }
    }

    /// Release the connection; the client cannot be used afterwards
    pub fn close(&self) {
        self.connection.close();
    }

    fn fetch_version(&self, key: &str, path: &str, options: &FetchOptions) -> Result<PromptVersion> {
        cached(self.versions.as_ref(), key, options, || {
            let data = self.connection.get(path, &[])?;
            from_json(data, "prompt version")
        })
    }
}

impl fmt::Debug for ScopeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeClient")
            .field("api_url", &self.config.api_url())
            .field("environment", &self.config.environment)
            .field("cache_enabled", &self.prompts.is_some())
            .finish()
    }
}

fn cached<V, F>(cache: Option<&TtlCache<V>>, key: &str, options: &FetchOptions, loader: F) -> Result<V>
where
    V: Clone,
    F: FnOnce() -> Result<V>,
{
    match cache {
        Some(cache) if options.use_cache => cache.fetch(key, options.cache_ttl, loader),
        _ => loader(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use crate::credentials::Credentials;
    use crate::transport::HttpResponse;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    const AUTH: &str = "/auth/sdk-token";

    fn config(cache_enabled: bool) -> Configuration {
        Configuration::default().merge(ConfigOverrides {
            credentials: Some(Credentials::api_key("org", "key", "secret")),
            cache_enabled: Some(cache_enabled),
            ..Default::default()
        })
    }

    fn client_with(transport: MockTransport, cache_enabled: bool) -> (ScopeClient, Arc<MockTransport>) {
        let transport = Arc::new(
            transport.on(AUTH, HttpResponse::json(200, json!({"access_token": "tok", "expires_in": 3600}))),
        );
        let client = ScopeClient::with_transport(config(cache_enabled), transport.clone()).unwrap();
        (client, transport)
    }

    fn version(id: &str, number: u32, production: bool) -> HttpResponse {
        HttpResponse::json(
            200,
            json!({
                "id": id,
                "prompt_id": "greeting",
                "version_number": number,
                "content": "Hello, {{name}}!",
                "variables": ["name"],
                "status": "published",
                "is_production": production
            }),
        )
    }

    #[test]
    fn test_requires_valid_config() {
        let err = ScopeClient::with_transport(Configuration::default(), Arc::new(MockTransport::new())).unwrap_err();
        assert!(matches!(err, ScopeError::MissingCredential { .. }));
    }

    #[test]
    fn test_missing_production_version() {
        let (client, _) = client_with(
            MockTransport::new().on(
                "/prompts/greeting/production",
                HttpResponse::json(404, json!({"error": {"code": "not_found", "message": "No production version"}})),
            ),
            true,
        );
        let err = client.get_prompt_production("greeting", &FetchOptions::default()).unwrap_err();
        assert!(matches!(err, ScopeError::NoProductionVersion { ref prompt_id } if prompt_id == "greeting"));
    }

    #[test]
    fn test_other_errors_pass_through_production_lookup() {
        let (client, _) = client_with(
            MockTransport::new().on("/prompts/greeting/production", HttpResponse::new(403, "")),
            true,
        );
        let err = client.get_prompt_production("greeting", &FetchOptions::default()).unwrap_err();
        assert_eq!(err.http_status(), Some(403));
    }

    #[test]
    fn test_cached_lookup_hits_api_once() {
        let (client, transport) = client_with(
            MockTransport::new().on(
                "/prompts/greeting",
                HttpResponse::json(200, json!({"id": "greeting", "name": "Greeting"})),
            ),
            true,
        );
        let opts = FetchOptions::default();
        let first = client.get_prompt("greeting", &opts).unwrap();
        let second = client.get_prompt("greeting", &opts).unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.request_count("/prompts/greeting"), 1);

        client.clear_cache();
        client.get_prompt("greeting", &opts).unwrap();
        assert_eq!(transport.request_count("/prompts/greeting"), 2);
    }

    #[test]
    fn test_cache_bypass() {
        let (client, transport) = client_with(
            MockTransport::new().on("/prompts/greeting/latest", version("v2", 2, false)),
            true,
        );
        client.get_prompt_latest("greeting", &FetchOptions::no_cache()).unwrap();
        client.get_prompt_latest("greeting", &FetchOptions::no_cache()).unwrap();
        assert_eq!(transport.request_count("/latest"), 2);

        client.get_prompt_latest("greeting", &FetchOptions::with_ttl(Duration::ZERO)).unwrap();
        client.get_prompt_latest("greeting", &FetchOptions::with_ttl(Duration::ZERO)).unwrap();
        assert_eq!(transport.request_count("/latest"), 4);
    }

    #[test]
    fn test_cache_disabled_in_config() {
        let (client, transport) = client_with(
            MockTransport::new().on("/prompts/greeting/versions/v1", version("v1", 1, true)),
            false,
        );
        let opts = FetchOptions::default();
        client.get_prompt_version("greeting", "v1", &opts).unwrap();
        client.get_prompt_version("greeting", "v1", &opts).unwrap();
        assert_eq!(transport.request_count("/versions/v1"), 2);
    }

    #[test]
    fn test_version_ref_dispatch() {
        let (client, transport) = client_with(
            MockTransport::new()
                .on("/prompts/greeting/production", version("v3", 3, true))
                .on("/prompts/greeting/latest", version("v4", 4, false))
                .on("/prompts/greeting/versions/v1", version("v1", 1, false)),
            true,
        );
        let opts = FetchOptions::default();
        assert_eq!(client.get_version("greeting", &VersionRef::Production, &opts).unwrap().id, "v3");
        assert_eq!(client.get_version("greeting", &VersionRef::Latest, &opts).unwrap().id, "v4");
        assert_eq!(
            client.get_version("greeting", &"v1".parse().unwrap(), &opts).unwrap().id,
            "v1"
        );
        assert_eq!(transport.request_count("/prompts/greeting/"), 3);
    }

    #[test]
    fn test_render_prompt() {
        let (client, _) = client_with(
            MockTransport::new().on("/prompts/greeting/production", version("v3", 3, true)),
            true,
        );
        let out = client
            .render_prompt("greeting", [("name", "Alice")], &VersionRef::Production, &FetchOptions::default())
            .unwrap();
        assert_eq!(out, "Hello, Alice!");

        let err = client
            .render_prompt("greeting", [("nme", "Alice")], &VersionRef::Production, &FetchOptions::default())
            .unwrap_err();
        assert!(matches!(err, ScopeError::Validation { .. }));
    }

    #[test]
    fn test_list_prompts_not_cached() {
        let (client, transport) = client_with(
            MockTransport::new().on(
                "/prompts",
                HttpResponse::json(
                    200,
                    json!({
                        "data": [{"id": "p1", "name": "One", "has_production_version": true}],
                        "meta": {"page": 2, "per_page": 1, "total": 5, "total_pages": 5}
                    }),
                ),
            ),
            true,
        );
        let params = ListParams {
            page: Some(2),
            per_page: Some(1),
            ..Default::default()
        };
        let page = client.list_prompts(&params).unwrap();
        assert_eq!(page.data.len(), 1);
        assert!(page.data[0].has_production_version);
        assert_eq!(page.meta.total_pages, 5);

        client.list_prompts(&params).unwrap();
        assert_eq!(transport.request_count("/prompts"), 2);
        let sent = transport.requests().into_iter().find(|r| r.url.ends_with("/prompts")).unwrap();
        assert_eq!(
            sent.query,
            vec![("page".to_string(), "2".to_string()), ("per_page".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn test_unexpected_payload() {
        let (client, _) = client_with(
            MockTransport::new().on("/prompts/greeting", HttpResponse::json(200, json!({"unexpected": true}))),
            true,
        );
        let err = client.get_prompt("greeting", &FetchOptions::default()).unwrap_err();
        assert!(matches!(err, ScopeError::InvalidResponse(_)));
    }

    #[test]
    fn test_closed_client() {
        let (client, _) = client_with(MockTransport::new(), true);
        client.close();
        let err = client.get_prompt("greeting", &FetchOptions::default()).unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn test_version_ref_parse_and_display() {
        assert_eq!("production".parse::<VersionRef>().unwrap(), VersionRef::Production);
        assert_eq!("latest".parse::<VersionRef>().unwrap(), VersionRef::Latest);
        assert_eq!("ver_9".parse::<VersionRef>().unwrap(), VersionRef::Id("ver_9".to_string()));
        assert_eq!(VersionRef::Id("ver_9".to_string()).to_string(), "ver_9");
        assert_eq!(VersionRef::default(), VersionRef::Production);
    }
}
