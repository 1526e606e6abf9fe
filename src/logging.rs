//! Tracing Setup
//!
//! The pipeline logs through `tracing` everywhere. Embedding applications
//! may install their own subscriber; [`init_tracing`] installs the default
//! one when `CYPHER_RUNNER_TRACE` is set.
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `CYPHER_RUNNER_TRACE` | enable (any value but `0`) |
//! | `CYPHER_RUNNER_TRACE_FILE` | append to this file instead of stderr |
//! | `CYPHER_RUNNER_TRACE_JSON` | JSON output (overrides `logging.format`) |
//! | `CYPHER_RUNNER_TRACE_LEVEL` | filter directive (overrides `logging.level`) |

use crate::config::LoggingConfig;
use std::env;
use std::sync::OnceLock;

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Returns whether one was installed.
pub fn init_tracing(logging_config: &LoggingConfig) -> bool {
    // Environment variables take precedence over config file values
    let enabled = env::var("CYPHER_RUNNER_TRACE")
        .ok()
        .is_some_and(|v| v != "0");
    if !enabled {
        return false;
    }

    let json = env::var("CYPHER_RUNNER_TRACE_JSON")
        .ok()
        .map_or_else(|| logging_config.format == "json", |v| v != "0");

    let level = env::var("CYPHER_RUNNER_TRACE_LEVEL")
        .ok()
        .unwrap_or_else(|| logging_config.level.clone());

    let (non_blocking, guard) = match env::var("CYPHER_RUNNER_TRACE_FILE") {
        Ok(log_path) => {
            let file = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
            {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("ERROR: Unable to open CYPHER_RUNNER_TRACE_FILE '{log_path}': {e}");
                    return false;
                }
            };
            tracing_appender::non_blocking(file)
        }
        Err(_) => tracing_appender::non_blocking(std::io::stderr()),
    };
    let _ = TRACE_GUARD.set(guard);

    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let base = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_writer(non_blocking)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(base.json().finish())
    } else {
        Box::new(base.compact().finish())
    };

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
