#![deny(unsafe_code)]

//! ctxpack CLI — assemble bounded context payloads from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ctxpack_config::AppConfig;
use ctxpack_core::context::token;
use ctxpack_core::{
    AssemblyRequest, ContextAssemblyService, ContextTier, FsArtifactProvider,
    TieredContextBuilder, TokenEstimator,
};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// ctxpack — bounded, prioritized context for LLM workflow steps.
#[derive(Parser)]
#[command(name = "ctxpack", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "ctxpack.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a payload from a JSON request file.
    Assemble {
        /// Request file (`consumer_id`, `target`, `prior_artifacts`, `topics`).
        request: PathBuf,

        /// Directory artifact references are resolved against.
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Print the payload as JSON instead of rendered sections.
        #[arg(long)]
        json: bool,
    },

    /// Print the tiered view of one file.
    Outline {
        /// File reference, relative to `--root`.
        reference: String,

        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Detail tier (tier1, tier2, tier3).
        #[arg(long, default_value = "tier2")]
        tier: ContextTier,

        /// Token cap; defaults to the tier ceiling.
        #[arg(long)]
        max_tokens: Option<usize>,
    },

    /// Estimate the token count of a file, or stdin when no file is given.
    Estimate { file: Option<PathBuf> },

    /// Look up documentation through the knowledge cache.
    Lookup {
        library: String,

        topic: Option<String>,

        #[arg(long, default_value_t = 2000)]
        max_tokens: usize,

        #[arg(long)]
        json: bool,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, from_file) = load_config(&cli.config).await?;

    let directive = filter_directive(cli.verbose, &config.logging.level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)),
        )
        .init();

    if from_file {
        debug!(path = %cli.config.display(), "using config file");
    } else {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Assemble {
            request,
            root,
            json,
        } => cmd_assemble(config, &request, root, json).await?,
        Commands::Outline {
            reference,
            root,
            tier,
            max_tokens,
        } => cmd_outline(&config, &reference, root, tier, max_tokens).await?,
        Commands::Estimate { file } => cmd_estimate(&config, file.as_deref()).await?,
        Commands::Lookup {
            library,
            topic,
            max_tokens,
            json,
        } => cmd_lookup(config, &library, topic.as_deref(), max_tokens, json).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

/// `-v` wins over the configured level; `RUST_LOG` wins over both.
fn filter_directive(verbose: u8, configured: &str) -> &str {
    match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    }
}

async fn cmd_assemble(config: AppConfig, request_path: &Path, root: PathBuf, json: bool) -> Result<()> {
    let raw = tokio::fs::read_to_string(request_path)
        .await
        .with_context(|| format!("reading request {}", request_path.display()))?;
    let request: AssemblyRequest =
        serde_json::from_str(&raw).context("request is not a valid assembly request")?;

    let provider = Arc::new(FsArtifactProvider::new(root));
    let service = ContextAssemblyService::from_config(config, provider)?;
    let payload = service.build(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", payload.render());
        eprintln!(
            "{} tokens of {} ({}){}",
            payload.token_estimate,
            payload.budget_tokens,
            payload.tier,
            if payload.degraded { ", degraded" } else { "" }
        );
    }
    Ok(())
}

async fn cmd_outline(
    config: &AppConfig,
    reference: &str,
    root: PathBuf,
    tier: ContextTier,
    max_tokens: Option<usize>,
) -> Result<()> {
    let builder = TieredContextBuilder::new(
        Arc::new(FsArtifactProvider::new(root)),
        token::from_config(&config.estimator),
    );
    let ctx = builder
        .build_capped(reference, tier, max_tokens.unwrap_or(tier.ceiling()))
        .await?;
    println!("{}", ctx.content);
    eprintln!(
        "{} tokens, {}/{} units{}{}",
        ctx.tokens,
        ctx.units_included,
        ctx.units_total,
        if ctx.truncated { ", truncated" } else { "" },
        if ctx.layer_fallback { ", no outline at this tier" } else { "" }
    );
    Ok(())
}

async fn cmd_estimate(config: &AppConfig, file: Option<&Path>) -> Result<()> {
    let text = match file {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            text
        }
    };
    let estimator = token::from_config(&config.estimator);
    println!("{}", estimator.estimate(&text));
    Ok(())
}

async fn cmd_lookup(
    config: AppConfig,
    library: &str,
    topic: Option<&str>,
    max_tokens: usize,
    json: bool,
) -> Result<()> {
    let provider = Arc::new(FsArtifactProvider::new("."));
    let service = ContextAssemblyService::from_config(config, provider)?;
    let result = service.cache().lookup(library, topic, max_tokens).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    if let Some(reason) = &result.reason {
        anyhow::bail!("lookup failed: {reason}");
    }
    println!("{}", result.content);
    eprintln!(
        "{:?}, {} tokens in {} ms{}",
        result.source,
        result.tokens,
        result.latency_ms,
        if result.truncated { ", truncated" } else { "" }
    );
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

/// Load the config file if it exists. The flag says whether it did.
async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    if path.exists() {
        let config = AppConfig::load(path).await.map_err(|e| anyhow::anyhow!(e))?;
        Ok((config, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_verbosity_overrides_config_level() {
        assert_eq!(filter_directive(0, "warn"), "warn");
        assert_eq!(filter_directive(1, "warn"), "debug");
        assert_eq!(filter_directive(3, "warn"), "trace");
    }

    #[test]
    fn test_parse_outline() {
        let cli = Cli::try_parse_from([
            "ctxpack", "outline", "src/lib.rs", "--tier", "tier1", "--max-tokens", "300",
        ])
        .unwrap();
        match cli.command {
            Commands::Outline {
                reference,
                tier,
                max_tokens,
                ..
            } => {
                assert_eq!(reference, "src/lib.rs");
                assert_eq!(tier, ContextTier::Tier1);
                assert_eq!(max_tokens, Some(300));
            }
            _ => panic!("expected outline"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_tier() {
        assert!(Cli::try_parse_from(["ctxpack", "outline", "a.rs", "--tier", "tier9"]).is_err());
    }

    #[test]
    fn test_parse_lookup_defaults() {
        let cli = Cli::try_parse_from(["ctxpack", "-vv", "lookup", "react", "hooks"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("ctxpack.toml"));
        match cli.command {
            Commands::Lookup {
                library,
                topic,
                max_tokens,
                json,
            } => {
                assert_eq!(library, "react");
                assert_eq!(topic.as_deref(), Some("hooks"));
                assert_eq!(max_tokens, 2000);
                assert!(!json);
            }
            _ => panic!("expected lookup"),
        }
    }
}
