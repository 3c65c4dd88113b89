use std::fs;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::debug;

use scope_client::cli::{Cli, Command, OutputFormat};
use scope_client::{Configuration, FetchOptions, ListParams, Prompt, PromptVersion, Renderer, ScopeClient, VersionRef};

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

fn print_prompt(prompt: &Prompt) {
    println!("{} {}", prompt.name.cyan().bold(), prompt.id.dimmed());
    if let Some(description) = &prompt.description {
        println!("  {}", description);
    }
    let production = if prompt.has_production_version {
        "yes".green()
    } else {
        "no".yellow()
    };
    println!("  Production version: {}", production);
}

fn print_version(version: &PromptVersion) {
    println!("{} {}", version.to_string().cyan().bold(), version.id.dimmed());
    if !version.variables.is_empty() {
        println!("  Variables: {}", version.variables.join(", "));
    }
    println!();
    println!("{}", version.content);
}

fn connect(cli: &Cli) -> Result<ScopeClient> {
    let config = Configuration::load(cli.config.as_deref())
        .context("Failed to load configuration")?
        .with_env();
    ScopeClient::new(config).context("Failed to create client")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose).context("Failed to setup logging")?;
    debug!(format = %cli.format, "scope: starting");

    match &cli.command {
        Command::Get { prompt } => {
            let client = connect(&cli)?;
            let prompt = client.get_prompt(prompt, &FetchOptions::default())?;
            match cli.format {
                OutputFormat::Json => print_json(&prompt)?,
                OutputFormat::Text => print_prompt(&prompt),
            }
        }
        Command::Version { prompt, version } => {
            let client = connect(&cli)?;
            let version: VersionRef = version.parse()?;
            let version = client.get_version(prompt, &version, &FetchOptions::default())?;
            match cli.format {
                OutputFormat::Json => print_json(&version)?,
                OutputFormat::Text => print_version(&version),
            }
        }
        Command::List {
            page,
            per_page,
            sort,
            order,
        } => {
            let client = connect(&cli)?;
            let result = client.list_prompts(&ListParams {
                page: *page,
                per_page: *per_page,
                sort: sort.clone(),
                order: order.clone(),
            })?;
            match cli.format {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Text => {
                    if result.data.is_empty() {
                        println!("No prompts found");
                    }
                    for prompt in &result.data {
                        println!("{}  {}", prompt.id.yellow(), prompt.name);
                    }
                    println!(
                        "{}",
                        format!(
                            "Page {}/{} ({} total)",
                            result.meta.page, result.meta.total_pages, result.meta.total
                        )
                        .dimmed()
                    );
                }
            }
        }
        Command::Render { prompt, version, vars } => {
            let client = connect(&cli)?;
            let version: VersionRef = version.parse()?;
            let rendered = client.render_prompt(prompt, vars.iter().cloned(), &version, &FetchOptions::default())?;
            println!("{}", rendered);
        }
        Command::RenderFile { path, vars, declare } => {
            let content =
                fs::read_to_string(path).with_context(|| format!("Failed to read template {}", path.display()))?;
            let renderer = if declare.is_empty() {
                Renderer::new(content)
            } else {
                Renderer::with_declared(content, declare.iter().cloned())
            };
            let rendered = renderer.render(vars.iter().cloned())?;
            match cli.format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "variables": renderer.variables(),
                    "rendered": rendered,
                }))?,
                OutputFormat::Text => println!("{}", rendered),
            }
        }
        Command::Config => {
            let config = Configuration::load(cli.config.as_deref())
                .context("Failed to load configuration")?
                .with_env();
            match cli.format {
                OutputFormat::Json => print_json(&config.to_redacted_json())?,
                OutputFormat::Text => {
                    print!("{}", serde_yaml::to_string(&config.to_redacted_json()).context("Failed to format config")?);
                }
            }
        }
    }

    Ok(())
}
