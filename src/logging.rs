//! Tracing setup for the harness binary

use crate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `logging.level`. When `logging.dir` is set and
/// writable, a daily rolling `benchctl.log` is written next to the console
/// output. The returned guard must be held until exit so the file writer
/// flushes.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},benchctl=debug", config.level)));

    let mut guard = None;
    let file_layer = config.dir.as_ref().and_then(|log_dir| {
        // `rolling::daily` panics if it cannot create the initial file, so
        // preflight writability first.
        let probe = log_dir.join(".benchctl_write_test");
        let writable = std::fs::create_dir_all(log_dir).is_ok()
            && std::fs::write(&probe, b"").is_ok();
        let _ = std::fs::remove_file(&probe);

        if !writable {
            eprintln!(
                "Warning: Could not write to log directory {}, file logging disabled",
                log_dir.display()
            );
            return None;
        }

        let appender = tracing_appender::rolling::daily(log_dir, "benchctl.log");
        let (non_blocking, worker) = tracing_appender::non_blocking(appender);
        guard = Some(worker);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}

/// Minimal logging for read-only commands
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
