//! Tracing subscriber setup for the `convolab` binary.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives are read from this variable before falling back to
/// `RUST_LOG`.
pub const LOG_ENV: &str = "CONVOLAB_LOG";

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| {
            // Keep the HTTP stack quiet unless asked for explicitly.
            EnvFilter::new(format!("{},hyper=warn,reqwest=warn", level.as_str().to_lowercase()))
        })
}

/// Install the global subscriber. Later calls are no-ops.
///
/// Logs go to stderr so stdout stays clean for summaries and `--json` output.
pub fn init_tracing(json: bool, level: Level) {
    let registry = tracing_subscriber::registry().with(filter(level));
    if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
            .ok();
    }
}
