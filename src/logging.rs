//! Tracing subscriber setup

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable overriding the configured log filter
pub const LOG_ENV: &str = "TWINCOM_LOG";

/// Build the filter: `TWINCOM_LOG` wins over `configured`; an unparsable
/// directive falls back to `warn`.
pub fn build_filter(env_value: Option<&str>, configured: &str) -> EnvFilter {
    let directive = select_directive(env_value, configured);
    EnvFilter::try_new(directive).unwrap_or_else(|e| {
        eprintln!("Warning: Invalid log filter '{}': {}", directive, e);
        EnvFilter::new("warn")
    })
}

fn select_directive<'a>(env_value: Option<&'a str>, configured: &'a str) -> &'a str {
    env_value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(configured)
}

/// Install the global subscriber writing to stderr.
/// Calling it twice leaves the first subscriber in place.
pub fn init(configured_level: &str) {
    let env_value = std::env::var(LOG_ENV).ok();
    let filter = build_filter(env_value.as_deref(), configured_level);

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_configured_level() {
        assert_eq!(select_directive(Some("debug"), "warn"), "debug");
        assert_eq!(select_directive(Some("  "), "error"), "error");
        assert_eq!(select_directive(None, "twincom=trace"), "twincom=trace");
    }
}
