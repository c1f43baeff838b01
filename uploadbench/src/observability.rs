//! Logging setup for the benchmark binary.
//!
//! Logs go to stderr so they never interleave with the result lines on stdout.

use std::env;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Installs the global `tracing` subscriber, configured from `RUST_LOG`.
pub fn init_tracing() {
    let (level, env_filter) = parse_rust_log();
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(format.with_filter(LevelFilter::from(level)))
        .with(env_filter)
        .init();
}

/// Determines the log level and filter from `RUST_LOG`.
///
/// A plain level such as `debug` applies to this crate and caps everything else at `WARN`, since
/// the HTTP stacks are very chatty. Any other value is used literally as a filter directive.
/// Without `RUST_LOG`, only warnings and errors are shown.
pub fn parse_rust_log() -> (Level, EnvFilter) {
    parse_filter(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
}

fn parse_filter(value: Option<&str>) -> (Level, EnvFilter) {
    let level = match value {
        Some(value) => match value.parse::<Level>() {
            Ok(level) => level,
            Err(_) => return (Level::TRACE, EnvFilter::new(value)),
        },
        None => Level::WARN,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "WARN,\
        uploadbench=TRACE,\
        ",
    );

    (level, env_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_level() {
        let (level, filter) = parse_filter(Some("debug"));
        assert_eq!(level, Level::DEBUG);
        assert!(filter.to_string().to_lowercase().contains("uploadbench=trace"));
    }

    #[test]
    fn literal_filter() {
        let (level, filter) = parse_filter(Some("hyper=debug"));
        assert_eq!(level, Level::TRACE);
        assert_eq!(filter.to_string().to_lowercase(), "hyper=debug");
    }

    #[test]
    fn defaults_to_warnings() {
        let (level, _) = parse_filter(None);
        assert_eq!(level, Level::WARN);
    }
}
