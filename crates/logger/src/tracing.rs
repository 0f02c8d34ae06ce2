use std::env::var;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{Layer, Registry, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Failed to create log directory {path}: {source}")]
    CreateDir { path: PathBuf, source: std::io::Error },
    #[error("Failed to open log file: {0}")]
    OpenFile(#[from] InitError),
    #[error("Failed to install tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// `RUST_LOG_FORMAT=json` wins over whatever the caller configured.
    fn resolve(self) -> Self {
        match var("RUST_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") => LogFormat::Compact,
            _ => self,
        }
    }
}

/// Logging settings handed over by the application
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Default level, `RUST_LOG` directives are layered on top of it
    pub level: LevelFilter,
    pub format: LogFormat,
    /// When set, every record is also written to a per-process file in here
    pub directory: Option<PathBuf>,
    /// Prefix of the log file name
    pub file_prefix: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::default(),
            directory: None,
            file_prefix: "linkwatch".into(),
        }
    }
}

/// Initialize tracing with console output and, optionally, a log file.
///
/// The returned guard flushes the file writer when dropped, so the caller has
/// to keep it alive for as long as it logs.
pub fn init_with(settings: &LogSettings) -> Result<Option<WorkerGuard>, LoggerError> {
    let mut layers: Vec<BoxedLayer> = vec![console_layer(settings.level, settings.format.resolve())];

    let guard = match &settings.directory {
        Some(directory) => {
            let (layer, guard) = file_layer(settings.level, directory, &settings.file_prefix)?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(guard)
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder().with_default_directive(level.into()).from_env_lossy()
}

fn console_layer(level: LevelFilter, format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter(level)).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_filter(env_filter(level))
            .boxed(),
    }
}

fn file_layer(
    level: LevelFilter,
    directory: &Path,
    prefix: &str,
) -> Result<(BoxedLayer, WorkerGuard), LoggerError> {
    std::fs::create_dir_all(directory)
        .map_err(|source| LoggerError::CreateDir { path: directory.to_path_buf(), source })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(log_file_stem(prefix, std::process::id(), Local::now()))
        .filename_suffix("log")
        .build(directory)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(writer)
        .with_filter(env_filter(level))
        .boxed();

    Ok((layer, guard))
}

/// `<prefix>-<pid>-<YYYYmmdd-HHMMSS>`, one file per process start.
pub fn log_file_stem(prefix: &str, pid: u32, started: DateTime<Local>) -> String {
    format!("{prefix}-{pid}-{}", started.format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_stem() {
        let started = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(log_file_stem("linkwatch", 4242, started), "linkwatch-4242-20240307-090501");
    }

    #[test]
    fn test_file_layer_creates_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let directory = temp_dir.path().join("nested/logs");

        let (_layer, _guard) = file_layer(LevelFilter::INFO, &directory, "linkwatch").unwrap();

        assert!(directory.is_dir());
        let files: Vec<_> = std::fs::read_dir(&directory).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_default_settings() {
        let settings = LogSettings::default();
        assert_eq!(settings.level, LevelFilter::INFO);
        assert_eq!(settings.format, LogFormat::Compact);
        assert!(settings.directory.is_none());
    }
}
