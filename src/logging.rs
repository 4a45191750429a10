use std::fs;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::paths;

/// Default filter when `RUST_LOG` is unset. Decoder and HTTP internals are
/// held at warn.
const DEFAULT_FILTER: &str = "info,symphonia=warn,reqwest=warn,hyper=warn";

/// Initialize structured logging.
///
/// Sets up:
/// - File output: daily rolling `speech.log` files in `{data_dir}/logs`,
///   keeping the latest 5.
/// - Console output (stderr): compact, human-readable.
/// - Environment filter: `RUST_LOG`, defaulting to [`DEFAULT_FILTER`].
///
/// Reports to stderr instead of panicking if a global subscriber is
/// already installed.
pub fn init() {
    if let Err(e) = try_init() {
        eprintln!("speech-stream logging not initialized: {}", e);
    }
}

/// Like [`init`], but returns an error when a subscriber already exists.
pub fn try_init() -> Result<(), String> {
    let log_dir = paths::get_log_dir();
    let _ = fs::create_dir_all(&log_dir);

    // Console-only when the log directory is unusable.
    let file_layer = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("speech")
        .filename_suffix("log")
        .max_log_files(5)
        .build(&log_dir)
    {
        Ok(appender) => Some(
            fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        ),
        Err(e) => {
            eprintln!("Failed to create log file appender in {}: {}", log_dir.display(), e);
            None
        }
    };
    let file_enabled = file_layer.is_some();

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .compact();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| e.to_string())?;

    tracing::info!(
        log_dir = %log_dir.display(),
        file_enabled,
        "Logger initialized"
    );
    Ok(())
}
