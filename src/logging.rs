//! logging
//!
//! Log subscriber set-up for the `hippolock` binary.
//!
//! The library only emits `tracing` events; embedding applications install
//! their own subscriber. The filter is taken from `HIPPOLOCK_LOG`, then the
//! configured directive, then [`DEFAULT_FILTER`].

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding a filter directive.
pub const LOG_ENV: &str = "HIPPOLOCK_LOG";

/// Filter used when nothing else is configured.
pub const DEFAULT_FILTER: &str = "warn";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

/// Pick the filter directive to use.
///
/// `debug` wins over everything, then `HIPPOLOCK_LOG`, then `configured`.
pub fn filter_directive(configured: Option<&str>, debug: bool) -> String {
    if debug {
        return "debug".to_string();
    }
    if let Ok(env) = std::env::var(LOG_ENV) {
        if !env.trim().is_empty() {
            return env;
        }
    }
    configured.unwrap_or(DEFAULT_FILTER).to_string()
}

/// Initialize the global subscriber, writing to stderr. Safe to call
/// multiple times; later calls no-op.
pub fn init(configured: Option<&str>, format: LogFormat, debug: bool) {
    if tracing::dispatcher::has_been_set() {
        return;
    }

    let directive = filter_directive(configured, debug);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Human => {
            let _ = builder.finish().try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().finish().try_init();
        }
    };
}
