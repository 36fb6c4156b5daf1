//! Optional `tracing` subscriber bootstrap.
//!
//! The crate only emits events; hosts that already install a subscriber never
//! need this module.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "KUZU_BRIDGE_LOG";

/// Directive used when neither the environment nor the caller supplies one.
pub const DEFAULT_FILTER: &str = "kuzu_bridge=info";

fn build_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a stderr fmt subscriber filtered by `$KUZU_BRIDGE_LOG`, falling
/// back to `filter`. Returns false if a global subscriber was already set.
pub fn init(filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(filter))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .is_ok()
}

/// [`init`] with the `[logging]` section of a client config.
pub fn init_from_config(config: &LoggingConfig) -> bool {
    init(config.filter.as_deref().unwrap_or(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_existing_subscriber() {
        let _ = init("kuzu_bridge=trace");
        assert!(!init("kuzu_bridge=trace"));
        assert!(!init_from_config(&LoggingConfig::default()));
    }

    #[test]
    fn malformed_fallback_uses_default() {
        let filter = build_filter("[[[not a directive");
        assert!(!filter.to_string().is_empty());
    }
}
