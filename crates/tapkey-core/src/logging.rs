//! Logging configuration using tracing
//!
//! stdout carries the NDJSON command output, so every log line goes to a
//! daily rolling file under `{data_dir}/logs` instead.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Environment variable overriding the log filter
pub const LOG_ENV_VAR: &str = "TAPKEY_LOG";

/// File name prefix; the appender adds the date
pub const LOG_FILE_PREFIX: &str = "tapkey.log";

/// Workspace crates that get the default level; everything else logs warnings only
const WORKSPACE_TARGETS: [&str; 4] = ["tapkey", "tapkey_core", "tapkey_nfc", "tapkey_app"];

/// Filter used when `TAPKEY_LOG` is unset or unparsable
pub fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    let mut directives: Vec<String> = WORKSPACE_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect();
    directives.push("warn".to_string());
    directives.join(",")
}

/// Log directory for a data dir
pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until exit; dropping it flushes buffered
/// lines.
///
/// # Examples
/// ```bash
/// TAPKEY_LOG=debug tapkey pair --simulate 04:a2:2b:19
/// TAPKEY_LOG=tapkey_nfc=trace,warn tapkey pair
/// ```
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let env_filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .try_init()
        .map_err(|e| Error::config(format!("Failed to install logger: {}", e)))?;

    tracing::info!(
        "tapkey {} logging to {}",
        env!("CARGO_PKG_VERSION"),
        log_dir.display()
    );
    Ok(guard)
}
