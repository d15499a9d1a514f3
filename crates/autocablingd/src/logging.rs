//! Structured logging setup.

use tracing_subscriber::EnvFilter;

/// Output shape for log lines. `Kv` matches the original's compact
/// `key=value` formatter; `tracing_subscriber`'s `fmt().compact()` with
/// `with_target(false)` gets close enough that we reuse it rather than
/// hand-rolling a formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
    Kv,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "kv" => Ok(LogFormat::Kv),
            other => Err(format!("unknown log format '{other}', expected text|json|kv")),
        }
    }
}

/// Initializes the global `tracing` subscriber. `level` filters this
/// crate's workspace members; `reqwest`/`hyper` are always quieted to
/// `warn` so HTTP chatter doesn't drown out correlation decisions.
pub fn init(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(format!("{level},reqwest=warn,hyper=warn")).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).compact().init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
        LogFormat::Kv => {
            tracing_subscriber::fmt().with_env_filter(filter).compact().with_target(false).without_time().init();
        }
    }
}
