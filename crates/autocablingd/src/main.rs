use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use autocablingd::logging::LogFormat;
use autocablingd::{Config, Orchestrator};

#[derive(Debug, Parser)]
#[command(name = "autocablingd", about = "Discovers OOB-to-switch cabling and records it in NetBox")]
struct Cli {
    /// Path to a .env file to load before reading configuration.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Log verbosity, e.g. "info", "debug", "autocabling_fdb=trace".
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: text, json, or kv.
    #[arg(long)]
    log_format: Option<String>,

    /// Run a single pass and exit instead of polling.
    #[arg(long)]
    once: bool,

    /// Run as a polling daemon regardless of POLL_INTERVAL.
    #[arg(long)]
    daemon: bool,

    /// Compute decisions but never call NetBox's write endpoints.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    if args.env_file.exists() {
        if let Err(e) = dotenvy::from_path_override(&args.env_file) {
            eprintln!("warning: failed to load {}: {e}", args.env_file.display());
        }
    }

    let log_level = args.log_level.unwrap_or_else(|| std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));
    let log_format_str = args.log_format.unwrap_or_else(|| std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()));
    let log_format: LogFormat = log_format_str.parse().unwrap_or_else(|e| {
        eprintln!("warning: {e}, defaulting to text");
        LogFormat::Text
    });
    autocablingd::logging::init(&log_level, log_format);

    let mut config = Config::from_env();
    if args.dry_run {
        config.dry_run = true;
    }

    if let Err(e) = config.validate() {
        eprintln!("configuration error: {e}");
        return ExitCode::from(1);
    }

    let orchestrator = match Orchestrator::new(config.clone()) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize orchestrator");
            return ExitCode::from(1);
        }
    };

    if args.daemon || (!args.once && config.poll_interval_secs > 0) {
        orchestrator.run_daemon().await;
    }

    match orchestrator.run_once().await {
        Ok(summary) => {
            if summary.errors > 0 {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::from(1)
        }
    }
}
