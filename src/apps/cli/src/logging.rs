//! Logging Configuration
//!
//! The core crate logs through the `log` facade; the subscriber installed here
//! also captures those records, so one filter governs both.

use tracing_subscriber::EnvFilter;

const LOG_LEVEL_ENV: &str = "DISTILL_LOG_LEVEL";

pub fn init(verbose: bool) {
    let level = resolve_default_level(verbose);
    let filter = EnvFilter::new(level_to_str(level));
    // Ignore a second init from tests or embedding callers.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn resolve_default_level(verbose: bool) -> log::LevelFilter {
    let fallback = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    match std::env::var(LOG_LEVEL_ENV) {
        Ok(val) => parse_log_level(&val).unwrap_or_else(|| {
            eprintln!(
                "Warning: Invalid {} '{}', falling back to default",
                LOG_LEVEL_ENV, val
            );
            fallback
        }),
        Err(_) => fallback,
    }
}

pub fn parse_log_level(value: &str) -> Option<log::LevelFilter> {
    match value.trim().to_lowercase().as_str() {
        "trace" => Some(log::LevelFilter::Trace),
        "debug" => Some(log::LevelFilter::Debug),
        "info" => Some(log::LevelFilter::Info),
        "warn" => Some(log::LevelFilter::Warn),
        "error" => Some(log::LevelFilter::Error),
        "off" => Some(log::LevelFilter::Off),
        _ => None,
    }
}

pub fn level_to_str(level: log::LevelFilter) -> &'static str {
    match level {
        log::LevelFilter::Trace => "trace",
        log::LevelFilter::Debug => "debug",
        log::LevelFilter::Info => "info",
        log::LevelFilter::Warn => "warn",
        log::LevelFilter::Error => "error",
        log::LevelFilter::Off => "off",
    }
}
