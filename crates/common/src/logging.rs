//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Build the filter used by [`setup_logging`]
///
/// `RUST_LOG` wins when set. Otherwise `default_level` applies to our crates
/// and libusb chatter from `rusb` is capped at `warn` unless the level already
/// carries explicit directives.
pub fn build_filter(default_level: &str) -> crate::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directives = if default_level.contains('=') {
        default_level.to_string()
    } else {
        format!("{},rusb=warn", default_level)
    };

    EnvFilter::try_new(&directives)
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))
}

/// Setup tracing subscriber for the application
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = build_filter(default_level)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Logging already initialized: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_levels() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(build_filter(level).is_ok(), "level {} rejected", level);
        }
    }

    #[test]
    fn test_build_filter_directives() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = build_filter("client=trace,protocol=debug").unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("client=trace"));
        assert!(!rendered.contains("rusb"));
    }
}
