//! Logging setup for the gistools binary
//!
//! Console output goes to stderr so command output on stdout stays
//! machine-readable. `RUST_LOG` takes precedence over the built-in filter.
//! With a log directory, a daily-rotated JSON log is written as well.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const QUIET_FILTER: &str = "warn,gistools=info,gistools_services=warn,gistools_schema=warn";
const VERBOSE_FILTER: &str = "info,gistools=debug,gistools_core=debug,gistools_driver_postgres=debug,gistools_settings=debug,gistools_schema=debug,gistools_services=debug";

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Write JSON logs here in addition to the console
    pub log_dir: Option<PathBuf>,

    /// Debug-level output for the gistools crates, with span timings
    pub verbose: bool,
}

impl LoggingConfig {
    fn default_filter(&self) -> &'static str {
        if self.verbose { VERBOSE_FILTER } else { QUIET_FILTER }
    }
}

/// Default directory for `--log-dir` without a value
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gistools")
        .join("logs")
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held
/// until the program exits.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.default_filter()));

    // NEW/CLOSE only: ENTER would fire on every re-poll of an awaited future
    let span_events = if config.verbose {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();

    let console_layer = fmt::layer()
        .with_target(config.verbose)
        .with_span_events(span_events.clone())
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .compact()
        .with_filter(env_filter.clone())
        .boxed();
    layers.push(console_layer);

    let mut guard = None;
    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::daily(log_dir, "gistools.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();
        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        log_dir = ?config.log_dir,
        verbose = config.verbose,
        "logging initialized"
    );
    Ok(guard)
}
