use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::clock::unix_secs;

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Anything other than `pretty` means JSON
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

pub struct LoggingHandle {
    pub run_id: String,
    pub log_path: PathBuf,
    _file_guard: WorkerGuard,
    _stderr_guard: WorkerGuard,
}

/// `WABRIDGE_LOG_FILTER` > `RUST_LOG` > default
fn filter_directive(explicit: Option<String>, rust_log: Option<String>) -> String {
    explicit
        .filter(|v| EnvFilter::try_new(v).is_ok())
        .or_else(|| rust_log.filter(|v| EnvFilter::try_new(v).is_ok()))
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

pub fn init_logging(log_dir: &Path) -> anyhow::Result<LoggingHandle> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("server.log");

    let directive = filter_directive(
        std::env::var("WABRIDGE_LOG_FILTER").ok(),
        std::env::var("RUST_LOG").ok(),
    );
    let filter = EnvFilter::try_new(&directive)?;
    let format = LogFormat::parse(std::env::var("WABRIDGE_LOG_FORMAT").ok().as_deref());

    let file_appender = tracing_appender::rolling::never(log_dir, "server.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let registry = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(stderr_writer)
            .with_target(false)
            .compact(),
    );
    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(file_writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()?,
    }

    let run_id = std::env::var("WABRIDGE_RUN_ID")
        .unwrap_or_else(|_| format!("pid-{}-{}", std::process::id(), unix_secs()));

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_path.display(),
        format = ?format,
        filter = %directive,
    );

    Ok(LoggingHandle {
        run_id,
        log_path,
        _file_guard: file_guard,
        _stderr_guard: stderr_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_beats_rust_log() {
        assert_eq!(
            filter_directive(Some("debug".into()), Some("warn".into())),
            "debug"
        );
        assert_eq!(filter_directive(None, Some("warn".into())), "warn");
        assert_eq!(filter_directive(None, None), DEFAULT_FILTER);
    }

    #[test]
    fn invalid_filter_falls_through() {
        assert_eq!(
            filter_directive(Some("wabridge=loud".into()), Some("warn".into())),
            "warn"
        );
    }

    #[test]
    fn format_defaults_to_json() {
        assert_eq!(LogFormat::parse(None), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("PRETTY")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some("text")), LogFormat::Json);
    }
}
