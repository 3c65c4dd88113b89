//! `{{name}}` template rendering
//!
//! Rendering is a pure function of the template, the optional declared
//! variable set and the supplied values:
//!
//! 1. With a declared set, any supplied name outside it is a `Validation` error.
//! 2. Every `{{key}}` for a supplied key is replaced in a single pass; inserted
//!    values are never scanned again.
//! 3. Any `{{identifier}}` left in the output is a `MissingVariable` error.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::{Result, ScopeError};

static VARIABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("Invalid variable regex"));

/// Unique placeholder names in order of first appearance
pub fn extract_variables(content: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    VARIABLE_PATTERN
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

/// Render `content` in one call
pub fn render_template<I, K, V>(content: &str, declared: Option<&[String]>, values: I) -> Result<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
{
    let renderer = match declared {
        Some(declared) => Renderer::with_declared(content, declared.iter().cloned()),
        None => Renderer::new(content),
    };
    renderer.render(values)
}

/// A template plus its optional closed set of variable names
#[derive(Debug, Clone, PartialEq)]
pub struct Renderer {
    content: String,
    declared: Option<BTreeSet<String>>,
}

impl Renderer {
    /// Renderer that accepts any variable name
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            declared: None,
        }
    }

    /// Renderer that rejects names outside `declared` (which may be empty)
    pub fn with_declared<I, S>(content: impl Into<String>, declared: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            content: content.into(),
            declared: Some(declared.into_iter().map(Into::into).collect()),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Declared variable names, sorted
    pub fn declared(&self) -> Option<Vec<&str>> {
        self.declared.as_ref().map(|d| d.iter().map(String::as_str).collect())
    }

    /// Placeholder names found in the template
    pub fn variables(&self) -> Vec<String> {
        extract_variables(&self.content)
    }

    pub fn render<I, K, V>(&self, values: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let values: HashMap<String, String> = values.into_iter().map(|(k, v)| (k.into(), v.to_string())).collect();
        debug!(value_count = values.len(), "Renderer::render: called");

        self.validate(&values)?;
        let result = self.substitute(&values)?;

        let missing = extract_variables(&result);
        if !missing.is_empty() {
            debug!(?missing, "Renderer::render: unrendered placeholders");
            return Err(ScopeError::MissingVariable {
                missing,
                template: self.content.clone(),
            });
        }
        Ok(result)
    }

    fn validate(&self, values: &HashMap<String, String>) -> Result<()> {
        let Some(declared) = &self.declared else {
            return Ok(());
        };

        let unknown: BTreeSet<&str> = values
            .keys()
            .map(String::as_str)
            .filter(|key| !declared.contains(*key))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }

        let unknown = unknown.into_iter().collect::<Vec<_>>().join(", ");
        let declared = declared.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
        Err(ScopeError::Validation {
            message: format!("Unknown variables: {}. Declared variables are: {}", unknown, declared),
            field: Some("variables".to_string()),
            value: Some(unknown),
        })
    }

    fn substitute(&self, values: &HashMap<String, String>) -> Result<String> {
        if values.is_empty() {
            return Ok(self.content.clone());
        }

        // Longest key first so a key never shadows one it is a prefix of
        let mut keys: Vec<&str> = values.keys().map(String::as_str).collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        let alternation = keys.iter().map(|k| regex::escape(k)).collect::<Vec<_>>().join("|");

        let pattern = Regex::new(&format!(r"\{{\{{({})\}}\}}", alternation)).map_err(|e| ScopeError::Render {
            message: format!("Failed to compile substitution pattern: {}", e),
            template: self.content.clone(),
        })?;

        Ok(pattern
            .replace_all(&self.content, |caps: &regex::Captures<'_>| {
                values.get(&caps[1]).cloned().unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned())
    }
}
