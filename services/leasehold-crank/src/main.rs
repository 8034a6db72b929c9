//! Leasehold Crank Service
//!
//! Scans one or more Leasehold ledgers for escrows whose invalidators have
//! expired and submits the operations that end them.
//!
//! # Usage
//!
//! ```bash
//! # Run once against a local node
//! LEASEHOLD_CRANK_KEY=<hex secret> leasehold-crank --endpoint local=http://localhost:8899 --once
//!
//! # Run every minute with a config file
//! leasehold-crank --config /etc/leasehold/crank.toml
//!
//! # Environment overrides
//! LEASEHOLD__CRANK__BATCH_SIZE=8 LEASEHOLD__INTERVAL_SECS=60 leasehold-crank
//! ```

mod config;

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use leasehold_crank::{CrankError, InvalidationCrank, RpcLedger, RunContext};
use leasehold_ledger::{Credential, KeypairCredential};

use crate::config::{EndpointConfig, ServiceConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Leasehold Crank - drives expired rental escrows to completion
#[derive(Parser, Debug)]
#[command(name = "leasehold-crank")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "LEASEHOLD_CONFIG")]
    config: Option<String>,

    /// Ledger endpoint as name=url; repeat for several. Replaces configured endpoints.
    #[arg(short, long = "endpoint")]
    endpoints: Vec<EndpointConfig>,

    /// Hex-encoded Ed25519 secret key the crank signs with
    #[arg(long, env = "LEASEHOLD_CRANK_KEY", hide_env_values = true)]
    keypair: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LEASEHOLD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "LEASEHOLD_LOG_FORMAT")]
    log_format: Option<String>,

    /// Seconds between runs (0 = run once)
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Run once and exit, whatever the configured interval
    #[arg(long)]
    once: bool,

    /// Print each run report as JSON to stdout
    #[arg(long)]
    print_report: bool,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut service_config = ServiceConfig::load(args.config.as_deref())?;

    // Override with CLI arguments
    if !args.endpoints.is_empty() {
        service_config.endpoints = args.endpoints.clone();
    }
    if let Some(level) = &args.log_level {
        service_config.logging.level = level.clone();
    }
    if let Some(format) = &args.log_format {
        service_config.logging.format = format.clone();
    }
    if let Some(interval) = args.interval_secs {
        service_config.interval_secs = interval;
    }
    if args.once {
        service_config.interval_secs = 0;
    }

    init_logging(&service_config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Leasehold crank"
    );

    if service_config.disabled {
        tracing::info!("Crank is disabled by configuration, exiting");
        return Ok(());
    }

    // Everything below is fatal before a single submission
    service_config.validate()?;
    let credential = load_credential(args.keypair.as_deref())?;
    let crank = InvalidationCrank::new(service_config.crank.clone())?;
    let contexts = build_contexts(&service_config, credential)?;

    let Some(interval) = service_config.interval() else {
        let failures = run_all(&crank, &contexts, args.print_report).await;
        if failures > 0 {
            anyhow::bail!("{} of {} ledger runs failed", failures, contexts.len());
        }
        return Ok(());
    };

    tracing::info!(interval_secs = interval.as_secs(), endpoints = contexts.len(), "Running on interval");
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        // Shutdown stops awaiting the current run; batches already sent are atomic on the ledger
        tokio::select! {
            _ = &mut shutdown => break,
            _ = run_all(&crank, &contexts, args.print_report) => {}
        }
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!("Crank shutdown complete");
    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true))
                .init();
        }
    }

    Ok(())
}

/// Load the signing identity; a missing key is a configuration error
fn load_credential(secret: Option<&str>) -> Result<Arc<dyn Credential>, CrankError> {
    let secret = secret
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CrankError::configuration("no signing key: pass --keypair or set LEASEHOLD_CRANK_KEY"))?;
    let credential = KeypairCredential::from_secret_hex(secret)
        .map_err(|e| CrankError::configuration(format!("invalid signing key: {}", e)))?;

    tracing::info!(wallet = %credential.wallet(), "Loaded crank credential");
    Ok(Arc::new(credential))
}

/// One run context per endpoint, all signing with the same credential
fn build_contexts(config: &ServiceConfig, credential: Arc<dyn Credential>) -> Result<Vec<RunContext>, CrankError> {
    config
        .endpoints
        .iter()
        .map(|endpoint| {
            let ledger = Arc::new(RpcLedger::new(&endpoint.url, config.rpc_timeout())?);
            tracing::debug!(ledger = %endpoint.name, url = %endpoint.url, "Configured endpoint");
            Ok(RunContext::for_ledger(&endpoint.name, ledger, credential.clone()))
        })
        .collect()
}

/// Crank every endpoint in turn; returns how many runs failed outright
async fn run_all(crank: &InvalidationCrank, contexts: &[RunContext], print_report: bool) -> usize {
    let mut failures = 0;
    for ctx in contexts {
        match crank.run(ctx).await {
            Ok(report) => {
                if print_report {
                    match serde_json::to_string_pretty(&report) {
                        Ok(json) => println!("{}", json),
                        Err(e) => tracing::warn!(error = %e, "Failed to encode run report"),
                    }
                }
            }
            Err(e) => {
                failures += 1;
                tracing::error!(ledger = %ctx.label, error = %e, "Crank run failed");
            }
        }
    }
    failures
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
