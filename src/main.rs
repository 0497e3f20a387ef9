use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use vision_gateway::{
    AnalysisContext, AnalysisRequest, CacheStats, CostStats, Gateway, GatewayConfig, Severity,
};

/// Judge visual regressions with AI vision providers, cheaply:
/// - identical inputs are answered from cache
/// - free local inference is tried before paid APIs
/// - paid APIs stop once the daily or monthly budget is spent
#[derive(Parser, Debug)]
#[command(name = "vgate")]
#[command(about = "🔍 Cost-governed AI judgment of screenshot diffs")]
#[command(long_about = "Compare a baseline and a current screenshot with an AI vision model.
Results are cached by content, spend is tracked per provider, and a budget circuit breaker
keeps paid providers from running past the configured limits.")]
struct Cli {
    /// JSON configuration file; defaults apply to anything it leaves out
    #[arg(short, long, global = true, help = "Path to a JSON configuration file")]
    config: Option<PathBuf>,

    /// SQLite database path, overriding the configuration
    #[arg(long, global = true, help = "Override cache.database_path")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one baseline/current pair and print the outcome as JSON
    Analyze {
        #[arg(short, long)]
        baseline: PathBuf,
        #[arg(short = 'n', long)]
        current: PathBuf,
        #[arg(short, long, help = "Optional diff overlay image")]
        diff: Option<PathBuf>,
        #[arg(long)]
        test_name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, help = "Viewport label, e.g. 1280x720")]
        viewport: Option<String>,
        #[arg(long, help = "Branch name (informational, not part of the cache key)")]
        branch: Option<String>,
        #[arg(long = "extra", value_parser = parse_key_value,
              help = "Extra context as KEY=VALUE; repeatable")]
        extra: Vec<(String, String)>,
        #[arg(long, value_parser = parse_severity,
              help = "Exit with status 2 when severity is at least this: minor, moderate, breaking")]
        fail_on: Option<Severity>,
    },
    /// Print cache and cost statistics
    Stats,
    /// Print the current budget status
    Budget,
    /// Remove expired cache entries
    Purge {
        #[arg(long, help = "Remove every cache entry, not just expired ones")]
        all: bool,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.cache.database_path = Some(db);
    }
    config.validate().map_err(anyhow::Error::msg)?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Analyze {
            baseline,
            current,
            diff,
            test_name,
            url,
            viewport,
            branch,
            extra,
            fail_on,
        } => {
            let gateway = build_gateway(config)?;
            let mut request = AnalysisRequest::new(read_image(&baseline)?, read_image(&current)?)
                .with_context(AnalysisContext {
                    test_name,
                    url,
                    viewport,
                    branch,
                    extra: extra.into_iter().collect::<HashMap<_, _>>(),
                });
            if let Some(diff) = diff {
                request = request.with_diff(read_image(&diff)?);
            }

            let outcome = gateway.analyze(&request).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);

            if fail_on.is_some_and(|threshold| outcome.result.severity >= threshold) {
                std::process::exit(2);
            }
        }
        Command::Stats => {
            let gateway = build_gateway(config)?;
            let report = StatsReport {
                cache: gateway.cache_stats(),
                cost: gateway.cost_stats().await?,
                providers: gateway.provider_ids().collect(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Budget => {
            let gateway = build_gateway(config)?;
            let status = gateway.budget_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Purge { all } => {
            let gateway = build_gateway(config)?;
            if all {
                gateway.clear_cache().await?;
                println!("✓ Cache cleared");
            } else {
                let removed = gateway.purge_expired().await?;
                println!("✓ Removed {} expired cache entries", removed);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StatsReport<'a> {
    cache: CacheStats,
    cost: CostStats,
    providers: Vec<&'a str>,
}

fn build_gateway(config: GatewayConfig) -> Result<Gateway> {
    Gateway::from_config(config).context("failed to build gateway")
}

fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    match path {
        Some(path) => Ok(GatewayConfig::from_json_file(path)?),
        None => Ok(GatewayConfig::default()),
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Parse `KEY=VALUE` into a pair
fn parse_key_value(input: &str) -> Result<(String, String)> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid context entry: {}. Use KEY=VALUE", input))?;
    if key.trim().is_empty() {
        return Err(anyhow::anyhow!("Context key must not be empty: {}", input));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn parse_severity(input: &str) -> Result<Severity> {
    Severity::parse(input).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid severity: {}. Use: none, minor, moderate, breaking",
            input
        )
    })
}
