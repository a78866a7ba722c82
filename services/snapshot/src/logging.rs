//! Logging context for the snapshot service.
//!
//! A [`LogContext`] owns a `tracing` dispatcher whose output is split in two:
//! error events go to the `error` sink, everything else to the `app` sink.
//! With a usable log directory both sinks are [`RotatingLogSink`]s; otherwise
//! the context falls back to stdout/stderr. The context is built explicitly
//! and handed to the components that log, nothing is installed globally here.

use crate::config::{CaptureConfig, LogFormat};
use crate::log_sink::RotatingLogSink;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{warn, Dispatch, Level, Subscriber};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// File prefix of the informational log.
pub const INFO_PREFIX: &str = "app";

/// File prefix of the error log.
pub const ERROR_PREFIX: &str = "error";

/// Where log lines end up.
#[derive(Debug, Clone)]
pub enum LogDestination {
    /// Daily rotating files under this directory.
    Files {
        dir: PathBuf,
        info: Arc<RotatingLogSink>,
        error: Arc<RotatingLogSink>,
    },
    /// Standard output for info, standard error for errors.
    Console,
}

/// Explicitly constructed logging context.
#[derive(Clone)]
pub struct LogContext {
    dispatch: Dispatch,
    destination: LogDestination,
}

impl LogContext {
    /// Build a context writing into `log_dir`, falling back to the console
    /// when the directory cannot be resolved or created.
    pub fn new(log_dir: &Path, level: &str, format: LogFormat) -> Self {
        let dir = match resolve_log_dir(log_dir) {
            Ok(dir) => dir,
            Err(e) => return Self::console_with_reason(level, format, &e.to_string()),
        };

        let info = Arc::new(RotatingLogSink::new(&dir, INFO_PREFIX));
        let error = Arc::new(RotatingLogSink::new(&dir, ERROR_PREFIX));
        let dispatch = build_dispatch(level, format, false, info.clone(), error.clone());

        Self {
            dispatch,
            destination: LogDestination::Files { dir, info, error },
        }
    }

    /// Build the context described by the service configuration.
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(&config.log_dir, &config.log_level, config.log_format)
    }

    /// Console-only context, used before configuration is available.
    pub fn console(level: &str, format: LogFormat) -> Self {
        let dispatch = build_dispatch(level, format, true, std::io::stdout, std::io::stderr);
        Self {
            dispatch,
            destination: LogDestination::Console,
        }
    }

    fn console_with_reason(level: &str, format: LogFormat, reason: &str) -> Self {
        let context = Self::console(level, format);
        tracing::dispatcher::with_default(&context.dispatch, || {
            warn!(reason = %reason, "Log directory unavailable, logging to console");
        });
        context
    }

    /// Dispatcher that components run under.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn destination(&self) -> &LogDestination {
        &self.destination
    }

    /// Run `f` with this context as the current dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl std::fmt::Debug for LogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogContext")
            .field("destination", &self.destination)
            .finish()
    }
}

/// Make `log_dir` absolute against the working directory and create it.
fn resolve_log_dir(log_dir: &Path) -> std::io::Result<PathBuf> {
    let dir = if log_dir.is_absolute() {
        log_dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(log_dir)
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn build_dispatch<I, E>(level: &str, format: LogFormat, ansi: bool, info: I, error: E) -> Dispatch
where
    I: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    E: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(split_layers(format, ansi, info, error));

    Dispatch::new(subscriber)
}

/// One layer for non-error events and one for error events.
fn split_layers<S, I, E>(
    format: LogFormat,
    ansi: bool,
    info: I,
    error: E,
) -> Vec<Box<dyn Layer<S> + Send + Sync>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    I: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    E: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let not_error = filter_fn(|meta| *meta.level() != Level::ERROR);
    let only_error = filter_fn(|meta| *meta.level() == Level::ERROR);

    match format {
        LogFormat::Text => vec![
            fmt::layer()
                .with_ansi(ansi)
                .with_writer(info)
                .with_filter(not_error)
                .boxed(),
            fmt::layer()
                .with_ansi(ansi)
                .with_writer(error)
                .with_filter(only_error)
                .boxed(),
        ],
        LogFormat::Json => vec![
            fmt::layer()
                .json()
                .with_writer(info)
                .with_filter(not_error)
                .boxed(),
            fmt::layer()
                .json()
                .with_writer(error)
                .with_filter(only_error)
                .boxed(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{error, info};

    fn read_logs(dir: &Path, prefix: &str) -> String {
        let mut contents = String::new();
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name.starts_with(&format!("{prefix}-")) && name.ends_with(".log") {
                contents.push_str(&std::fs::read_to_string(&path).unwrap());
            }
        }
        contents
    }

    #[test]
    fn test_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested/logs");
        let context = LogContext::new(&log_dir, "info", LogFormat::Text);

        assert!(log_dir.is_dir());
        assert!(matches!(
            context.destination(),
            LogDestination::Files { .. }
        ));
    }

    #[test]
    fn test_errors_and_info_go_to_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let context = LogContext::new(dir.path(), "info", LogFormat::Text);

        context.in_scope(|| {
            info!(size_bytes = 42, "saved frame");
            error!("capture failed");
        });

        let app = read_logs(dir.path(), INFO_PREFIX);
        let errors = read_logs(dir.path(), ERROR_PREFIX);
        assert!(app.contains("saved frame"));
        assert!(app.contains("size_bytes=42"));
        assert!(!app.contains("capture failed"));
        assert!(errors.contains("capture failed"));
        assert!(!errors.contains("saved frame"));
    }

    #[test]
    fn test_json_format() {
        let dir = tempfile::tempdir().unwrap();
        let context = LogContext::new(dir.path(), "info", LogFormat::Json);

        context.in_scope(|| info!(size_bytes = 7, "posted frame"));

        let app = read_logs(dir.path(), INFO_PREFIX);
        let line = app.lines().next().unwrap();
        assert!(line.starts_with('{'));
        assert!(line.contains("\"size_bytes\":7"));
    }

    #[test]
    fn test_falls_back_to_console() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file in the way").unwrap();

        let context = LogContext::new(&blocker.join("logs"), "info", LogFormat::Text);
        assert!(matches!(context.destination(), LogDestination::Console));
    }
}
