//! scope-client - Rust client for the Scope prompt-management API
//!
//! Fetches prompts and prompt versions over HTTPS, caches them with a TTL,
//! retries transient failures, and renders `{{variable}}` templates.
//!
//! # Architecture
//!
//! ```text
//! ScopeClient ──► TtlCache::fetch(key, loader)
//!                      │ miss
//!                      ▼
//!                 Connection ──► TokenManager (bearer token, single-flight refresh)
//!                      │
//!                      ▼
//!                 Transport (reqwest, blocking) ──► retry / backoff / classify
//! ```
//!
//! # Example
//!
//! ```ignore
//! use scope_client::{Configuration, FetchOptions, ScopeClient, VersionRef};
//!
//! let client = ScopeClient::new(Configuration::load(None)?.with_env())?;
//! let text = client.render_prompt(
//!     "greeting",
//!     [("name", "Alice")],
//!     &VersionRef::Production,
//!     &FetchOptions::default(),
//! )?;
//! ```

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod renderer;
pub mod resources;
pub mod retry;
pub mod telemetry;
pub mod token;
pub mod transport;

pub use cache::TtlCache;
pub use client::{FetchOptions, ScopeClient, VersionRef};
pub use config::{ConfigOverrides, Configuration};
pub use credentials::{ApiKeyCredentials, Credentials};
pub use error::{ApiError, ApiErrorKind, Result, ScopeError};
pub use renderer::{Renderer, extract_variables, render_template};
pub use resources::{ListParams, PageMeta, Prompt, PromptPage, PromptType, PromptVersion, VersionStatus};
pub use telemetry::{ErrorInfo, RequestInfo, ResponseInfo, Telemetry};
pub use transport::{HttpRequest, HttpResponse, Method, Transport, TransportError};
