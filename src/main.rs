//! autopim - Azure PIM self-activation from the command line.
//!
//! Signs in, finds the caller's eligible roles on the requested
//! subscriptions and activates all of them at once.

#![deny(clippy::all)]

mod auth;
mod config;
mod error;
mod pim;

use std::collections::BTreeSet;
use std::env;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use auth::token_cache::TokenCache;
use config::Config;
use error::{AppError, ConfigError, DiscoveryError};
use pim::{DiscoveredRoles, PimClient, RunReport};

/// Self-activate Azure PIM eligible roles on a set of subscriptions.
#[derive(Debug, Parser)]
#[command(name = "autopim")]
struct Cli {
    /// Comma separated subscription names for PIM activation
    #[arg(long, value_delimiter = ',')]
    subs: Vec<String>,

    /// Azure tenant ID (overrides pim.toml)
    #[arg(long)]
    tenant: Option<String>,

    /// Dry run mode, do not activate PIM
    #[arg(long)]
    dryrun: bool,

    /// Do not use the cached authentication record
    #[arg(long)]
    nocache: bool,

    /// Debug logging
    #[arg(long)]
    debug: bool,

    /// Use this management API bearer token instead of signing in
    #[arg(long, env = "AUTOPIM_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print version information and exit
    #[arg(short = 'v', long)]
    version: bool,
}

fn main() -> ExitCode {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let cli = Cli::parse();

    if cli.version {
        println!("Version: {}", version_string());
        return ExitCode::SUCCESS;
    }

    let config = Config::load();
    let level = config
        .as_ref()
        .map(|c| c.logging.level.as_str())
        .unwrap_or("info");
    init_logging(level, cli.debug);

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    config::prepare_config_dir();
    for path in &config.sources {
        debug!("Applied configuration from {}", path.display());
    }

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, config)) {
        Ok(report) => {
            if report.has_failures() {
                error!("{} activation(s) failed", report.failure_count());
            }
            ExitCode::from(report.exit_code())
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing/logging on stderr.
///
/// `RUST_LOG` wins over `--debug`, which wins over the configured level.
fn init_logging(level: &str, debug: bool) {
    let directive = if debug && env::var("RUST_LOG").is_err() {
        "debug"
    } else {
        level
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn build_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")
}

async fn run(cli: Cli, mut config: Config) -> Result<RunReport, AppError> {
    info!("Starting autopim v{}", env!("CARGO_PKG_VERSION"));

    if let Some(tenant) = cli.tenant {
        config.tenant = tenant;
    }

    let supplied_token = cli
        .token
        .filter(|token| !token.trim().is_empty())
        .map(Zeroizing::new);
    config.validate(supplied_token.is_none())?;

    let targets = target_subscriptions(&cli.subs, &config.subscriptions);
    if targets.is_empty() {
        return Err(ConfigError::Invalid(
            "No subscriptions provided. Pass --subs or set `subscriptions` in pim.toml".to_string(),
        )
        .into());
    }

    if cli.dryrun {
        info!("Dry run mode enabled, not activating PIM");
    }

    let cache = if cli.nocache || supplied_token.is_some() {
        if cli.nocache {
            info!("Not using cached authentication record");
        }
        None
    } else {
        match TokenCache::default_location() {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("Proceeding without persistent caching: {}", e);
                None
            }
        }
    };

    let token = match supplied_token {
        Some(token) => token,
        None => auth::acquire_management_token(&config, cache.as_ref()).await?,
    };

    let client =
        PimClient::with_base_url(&config.api.management_base_url).map_err(DiscoveryError::from)?;

    match pim::run(&client, &token, &targets, &config.activation, cli.dryrun).await {
        Ok((roles, report)) => {
            print_summary(&targets, &roles, &report);
            Ok(report)
        }
        Err(e) => {
            let e = AppError::from(e);
            if e.invalidates_cache() {
                if let Some(cache) = &cache {
                    auth::discard(cache);
                }
            }
            Err(e)
        }
    }
}

/// Subscription names from `--subs`, falling back to the config file.
fn target_subscriptions(cli_subs: &[String], configured: &[String]) -> BTreeSet<String> {
    let names = if cli_subs.is_empty() {
        configured
    } else {
        cli_subs
    };

    names
        .iter()
        .filter(|name| !name.is_empty())
        .cloned()
        .collect()
}

/// One line per requested subscription and role.
fn print_summary(targets: &BTreeSet<String>, roles: &DiscoveredRoles, report: &RunReport) {
    for name in targets {
        if roles.get(name).is_none() {
            println!("{}: no eligible role found", name);
            continue;
        }

        for entry in report
            .entries
            .iter()
            .filter(|entry| &entry.subscription_name == name)
        {
            println!("{} ({}): {}", name, entry.role, entry.outcome);
        }
    }
}

/// `0.1.0 (abc1234, linux-x86_64)`.
fn version_string() -> String {
    format!(
        "{} ({}, {}-{})",
        env!("CARGO_PKG_VERSION"),
        env!("AUTOPIM_GIT_REV"),
        env::consts::OS,
        env::consts::ARCH
    )
}
