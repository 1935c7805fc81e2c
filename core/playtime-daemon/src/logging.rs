//! Tracing setup for the daemon.
//!
//! `PLAYTIME_DEBUG_LOG=1` forces debug output; otherwise `RUST_LOG` applies,
//! defaulting to `info`. Long-running commands also append to a daily file
//! under `~/.playtime/logs`.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEBUG_ENV: &str = "PLAYTIME_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "daemon.log";

fn env_filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Stderr only.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Stderr plus a rolling file. Keep the guard alive until exit or buffered
/// lines are lost. Falls back to stderr only if the log dir is unusable.
pub fn init_with_file(log_dir: &Path) -> Option<WorkerGuard> {
    if let Err(err) = fs_err::create_dir_all(log_dir) {
        init();
        tracing::warn!(error = %err, "Failed to create log directory; logging to stderr only");
        return None;
    }

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    Some(guard)
}
