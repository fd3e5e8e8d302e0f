//! Logging Module
//!
//! Structured logging with file output for diagnostics. Stdout carries the
//! native messaging channel, so nothing is ever logged there.

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::storage::default_data_dir;

/// Initialize logging with file output, plus stderr in debug builds
pub fn init() {
    let log_dir = get_log_directory();

    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "legadilo-host.log");

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_appender);

    let console_layer = cfg!(debug_assertions).then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            EnvFilter::new("debug,hyper=warn,reqwest=warn")
        }
        #[cfg(not(debug_assertions))]
        {
            EnvFilter::new("info,hyper=warn,reqwest=warn")
        }
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn get_log_directory() -> PathBuf {
    std::env::var_os(crate::storage::DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(default_data_dir)
        .join("logs")
}
