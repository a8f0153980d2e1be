//! Keep rewards authorization auditor
//!
//! Runs one audit over a block interval:
//! 1. Load configuration (file, then environment overrides)
//! 2. Resolve the sortition pool of the sanctioned application
//! 3. Audit every requested operator with bounded concurrency
//! 4. Print one JSON verdict per line on stdout

use anyhow::{bail, Context, Result};
use clap::Parser;
use rewards_auditor::config;
use rewards_auditor::{Address, AuditContext, AuditorConfig, AuthorizationAuditor, Interval};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Keep ECDSA staking rewards authorization auditor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "auditor.toml")]
    config: PathBuf,

    /// First block of the interval (inclusive)
    #[arg(long)]
    start_block: u64,

    /// Last block of the interval (inclusive)
    #[arg(long)]
    end_block: u64,

    /// Operator address to audit (repeatable)
    #[arg(short, long = "operator")]
    operators: Vec<String>,

    /// File with one operator address per line
    #[arg(long)]
    operators_file: Option<PathBuf>,

    /// Maximum number of operators audited at once (overrides config file)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting rewards auditor v{}", env!("CARGO_PKG_VERSION"));

    let config = load_configuration(&args.config)?;
    let interval = Interval::new(args.start_block, args.end_block)?;
    let operators = collect_operators(&args.operators, args.operators_file.as_deref())?;
    let concurrency = args.concurrency.unwrap_or(config.concurrency).max(1);

    if operators.is_empty() {
        bail!("No operators to audit, use --operator or --operators-file");
    }

    let context = AuditContext::from_config(&config).context("Failed to set up audit context")?;
    let auditor = AuthorizationAuditor::initialize(context, interval)
        .await
        .context("Failed to initialize audit")?;

    let results = auditor.audit_operators(&operators, concurrency).await;

    let mut failures = 0;
    for (operator, result) in results {
        match result {
            Ok(verdict) => println!("{}", serde_json::to_string(&verdict)?),
            Err(e) => {
                error!("Operator {} could not be audited: {}", operator, e);
                failures += 1;
            }
        }
    }

    let scan = auditor
        .deauthorization_scan()
        .await
        .context("Deauthorization scan failed")?;
    if scan.degraded {
        info!("Deauthorization scan ran in degraded mode");
    }

    if failures > 0 {
        bail!("{} of {} operator(s) could not be audited", failures, operators.len());
    }

    info!("Audit of {} operator(s) finished", operators.len());
    Ok(())
}

/// Initialize logging system
fn init_logging(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            eprintln!("Unknown log level: {}, using INFO", log_level);
            tracing::Level::INFO
        }
    };

    // stdout carries the verdicts
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Load configuration file, falling back to environment variables
fn load_configuration(config_path: &Path) -> Result<AuditorConfig> {
    if !config_path.exists() {
        warn!(
            "Configuration file {} does not exist, using environment only",
            config_path.display()
        );
        return config::load_config_from_env().context("Failed to load configuration");
    }

    info!("Loading configuration: {}", config_path.display());
    config::load_config(config_path).context("Failed to load configuration")
}

/// Merge operators given on the command line and in a file, dropping duplicates
fn collect_operators(cli: &[String], file: Option<&Path>) -> Result<Vec<Address>> {
    let mut operators = BTreeSet::new();

    for value in cli {
        operators.insert(value.parse::<Address>()?);
    }

    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read operators file {}", path.display()))?;

        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let operator = line
                .parse::<Address>()
                .with_context(|| format!("{}:{}", path.display(), number + 1))?;
            operators.insert(operator);
        }
    }

    Ok(operators.into_iter().collect())
}
