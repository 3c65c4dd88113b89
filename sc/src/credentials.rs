//! Credentials for SDK authentication
//!
//! Long-lived credentials are exchanged for short-lived bearer tokens by the
//! [`TokenManager`](crate::token::TokenManager). Only the API-key scheme is
//! implemented; [`Credentials`] is an enum so further schemes slot in beside it.

use std::fmt;

use serde_json::json;

use crate::error::{Result, ScopeError};

/// Environment variable holding the organization/account id
pub const ENV_ORG_ID: &str = "SCOPE_ORG_ID";
/// Environment variable holding the API key id
pub const ENV_API_KEY: &str = "SCOPE_API_KEY";
/// Environment variable holding the API key secret
pub const ENV_API_SECRET: &str = "SCOPE_API_SECRET";

/// Organization id, key id and key secret
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKeyCredentials {
    pub org_id: String,
    pub api_key: String,
    pub api_secret: String,
}

impl ApiKeyCredentials {
    pub fn new(org_id: impl Into<String>, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read credentials from `SCOPE_ORG_ID`, `SCOPE_API_KEY` and `SCOPE_API_SECRET`
    ///
    /// Returns `None` when none of the three variables is set. Partially set
    /// credentials are returned as-is and rejected later by [`validate`](Self::validate).
    pub fn from_env() -> Option<Self> {
        let org_id = std::env::var(ENV_ORG_ID).ok();
        let api_key = std::env::var(ENV_API_KEY).ok();
        let api_secret = std::env::var(ENV_API_SECRET).ok();
        if org_id.is_none() && api_key.is_none() && api_secret.is_none() {
            return None;
        }
        Some(Self::new(
            org_id.unwrap_or_default(),
            api_key.unwrap_or_default(),
            api_secret.unwrap_or_default(),
        ))
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("org_id", &self.org_id),
            ("api_key", &self.api_key),
            ("api_secret", &self.api_secret),
        ] {
            if value.trim().is_empty() {
                return Err(ScopeError::MissingCredential {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ApiKeyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyCredentials")
            .field("org_id", &self.org_id)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Supported credential schemes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(ApiKeyCredentials),
}

impl Credentials {
    pub fn api_key(org_id: impl Into<String>, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Credentials::ApiKey(ApiKeyCredentials::new(org_id, api_key, api_secret))
    }

    /// Identifier of the authentication scheme
    pub fn auth_type(&self) -> &'static str {
        match self {
            Credentials::ApiKey(_) => "api_key",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Credentials::ApiKey(creds) => creds.validate(),
        }
    }

    /// JSON body for the token exchange request
    pub fn token_request_body(&self) -> serde_json::Value {
        match self {
            Credentials::ApiKey(creds) => json!({
                "account_id": creds.org_id,
                "key_id": creds.api_key,
                "key_secret": creds.api_secret,
            }),
        }
    }

    /// Printable summary with the secret masked
    pub fn redacted(&self) -> serde_json::Value {
        match self {
            Credentials::ApiKey(creds) => json!({
                "auth_type": self.auth_type(),
                "org_id": creds.org_id,
                "api_key": creds.api_key,
                "api_secret": "[REDACTED]",
            }),
        }
    }
}

impl From<ApiKeyCredentials> for Credentials {
    fn from(creds: ApiKeyCredentials) -> Self {
        Credentials::ApiKey(creds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        // SAFETY: env-mutating tests are serialized
        unsafe {
            std::env::remove_var(ENV_ORG_ID);
            std::env::remove_var(ENV_API_KEY);
            std::env::remove_var(ENV_API_SECRET);
        }
    }

    #[test]
    fn test_validate_requires_all_fields() {
        assert!(ApiKeyCredentials::new("org", "key", "secret").validate().is_ok());

        let err = ApiKeyCredentials::new("", "key", "secret").validate().unwrap_err();
        assert!(matches!(err, ScopeError::MissingCredential { ref field } if field == "org_id"));

        let err = ApiKeyCredentials::new("org", " ", "secret").validate().unwrap_err();
        assert!(matches!(err, ScopeError::MissingCredential { ref field } if field == "api_key"));

        let err = ApiKeyCredentials::new("org", "key", "").validate().unwrap_err();
        assert!(matches!(err, ScopeError::MissingCredential { ref field } if field == "api_secret"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = ApiKeyCredentials::new("org", "key", "super-secret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("org"));
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_token_request_body() {
        let creds = Credentials::api_key("acct", "key_1", "secret_1");
        let body = creds.token_request_body();
        assert_eq!(body["account_id"], "acct");
        assert_eq!(body["key_id"], "key_1");
        assert_eq!(body["key_secret"], "secret_1");
        assert_eq!(creds.auth_type(), "api_key");
    }

    #[test]
    fn test_redacted_summary() {
        let creds = Credentials::api_key("acct", "key_1", "secret_1");
        let summary = creds.redacted();
        assert_eq!(summary["api_secret"], "[REDACTED]");
        assert!(!summary.to_string().contains("secret_1"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        assert!(ApiKeyCredentials::from_env().is_none());

        // SAFETY: env-mutating tests are serialized
        unsafe {
            std::env::set_var(ENV_ORG_ID, "my-org");
            std::env::set_var(ENV_API_KEY, "key_abc");
        }
        let creds = ApiKeyCredentials::from_env().unwrap();
        clear_env();

        assert_eq!(creds.org_id, "my-org");
        assert_eq!(creds.api_key, "key_abc");
        assert!(creds.api_secret.is_empty());
        assert!(creds.validate().is_err());
    }
}
