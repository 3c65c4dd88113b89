//! CLI argument parsing for the `scope` binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "scope")]
#[command(author, version, about = "Fetch and render prompts from the Scope API", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show a prompt
    Get {
        /// Prompt id or name
        #[arg(required = true)]
        prompt: String,
    },

    /// Show a prompt version
    Version {
        /// Prompt id or name
        #[arg(required = true)]
        prompt: String,

        /// production, latest, or a version id
        #[arg(long, default_value = "production")]
        version: String,
    },

    /// List prompts
    List {
        #[arg(long)]
        page: Option<u32>,

        #[arg(long)]
        per_page: Option<u32>,

        /// Sort field (e.g. name, created_at)
        #[arg(long)]
        sort: Option<String>,

        /// asc or desc
        #[arg(long)]
        order: Option<String>,
    },

    /// Fetch a prompt version and render it
    Render {
        /// Prompt id or name
        #[arg(required = true)]
        prompt: String,

        /// production, latest, or a version id
        #[arg(long, default_value = "production")]
        version: String,

        /// Variable value, repeatable
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },

    /// Render a local template file without contacting the API
    RenderFile {
        /// Template file
        #[arg(required = true)]
        path: PathBuf,

        /// Variable value, repeatable
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Declared variable name, repeatable; enables unknown-variable checks
        #[arg(long = "declare", value_name = "NAME")]
        declare: Vec<String>,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}

/// Output format for command results
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Parse a `KEY=VALUE` pair; the value may itself contain `=`
pub fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid variable '{}': expected KEY=VALUE", s)),
    }
}
