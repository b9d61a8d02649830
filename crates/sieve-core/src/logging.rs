use crate::config::SieveConfig;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "SIEVE_LOG";

/// Installs the JSON stderr subscriber. A second call is a no-op.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// `init` with the config's `log_level`, unless `SIEVE_LOG` is set.
pub fn init_from_config(cfg: &SieveConfig) {
    init(&effective_level(&cfg.log_level));
}

/// `SIEVE_LOG` wins over the configured level.
pub fn effective_level(configured: &str) -> String {
    std::env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| configured.to_string())
}
