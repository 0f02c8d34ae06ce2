//! Tracing setup shared by the linkwatch binaries.

mod tracing;

pub use self::tracing::{LogFormat, LogSettings, LoggerError, init_with, log_file_stem};
pub use tracing_appender::non_blocking::WorkerGuard;
