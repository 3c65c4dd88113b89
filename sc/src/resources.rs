//! Typed API resources
//!
//! Known fields are explicit; anything else the API sends is kept in `extra`
//! so newer server fields survive a round trip.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, ScopeError};
use crate::renderer::Renderer;

/// Treat an explicit JSON `null` like an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept RFC 3339, offset-less ISO 8601 (read as UTC) or Unix seconds
///
/// Anything else becomes `None` instead of rejecting the whole resource.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => parse_timestamp(&s),
        Some(Value::Number(n)) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    })
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Decode an API payload into a resource type
pub(crate) fn from_json<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ScopeError::InvalidResponse(format!("unexpected {} payload: {}", what, e)))
}

/// A named, versioned template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_production_version: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Draft,
    Published,
    Archived,
    /// A status this client does not know about
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptType {
    #[default]
    Text,
    Chat,
    /// A prompt type this client does not know about
    #[serde(other)]
    Unknown,
}

/// One immutable revision of a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: String,
    pub prompt_id: String,
    pub version_number: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    /// Declared variable names; rendering accepts exactly these
    #[serde(default, deserialize_with = "null_as_default")]
    pub variables: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: VersionStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_production: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt_type: PromptType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: HashMap<String, Value>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PromptVersion {
    /// Render the content against the declared variables
    pub fn render<I, K, V>(&self, values: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        self.renderer().render(values)
    }

    pub fn renderer(&self) -> Renderer {
        Renderer::with_declared(self.content.clone(), self.variables.iter().cloned())
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn is_draft(&self) -> bool {
        self.status == VersionStatus::Draft
    }

    pub fn is_published(&self) -> bool {
        self.status == VersionStatus::Published
    }

    pub fn is_archived(&self) -> bool {
        self.status == VersionStatus::Archived
    }
}

impl fmt::Display for PromptVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version_number)?;
        if self.is_production {
            write!(f, " (production)")?;
        }
        Ok(())
    }
}

/// Paging and sorting for prompt listings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Sort field, e.g. `name` or `created_at`
    pub sort: Option<String>,
    /// `asc` or `desc`
    pub order: Option<String>,
}

impl ListParams {
    /// Query pairs for the set fields only
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(page) = self.page {
            query.push(("page".to_string(), page.to_string()));
        }
        if let Some(per_page) = self.per_page {
            query.push(("per_page".to_string(), per_page.to_string()));
        }
        if let Some(sort) = &self.sort {
            query.push(("sort".to_string(), sort.clone()));
        }
        if let Some(order) = &self.order {
            query.push(("order".to_string(), order.clone()));
        }
        query
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageMeta {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

/// One page of prompts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptPage {
    #[serde(deserialize_with = "null_as_default")]
    pub data: Vec<Prompt>,
    #[serde(deserialize_with = "null_as_default")]
    pub meta: PageMeta,
}
