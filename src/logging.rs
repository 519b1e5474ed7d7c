//! Process-wide tracing setup

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable consulted when no level is passed to [`init`]
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.4f";

/// Install the global subscriber.
///
/// `level` is an `EnvFilter` directive such as `"debug"` or
/// `"tunmux_connpool=trace"`. Without one, `LOG_LEVEL` is used, then `info`.
/// Calling this again once a subscriber is installed does nothing.
pub fn init(level: Option<&str>) -> anyhow::Result<()> {
    let directive = resolve_level(level, std::env::var(LOG_LEVEL_ENV).ok());
    let filter = EnvFilter::try_new(&directive)?;

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string())),
        )
        .with(filter)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

fn resolve_level(explicit: Option<&str>, env: Option<String>) -> String {
    explicit
        .map(str::to_string)
        .or(env)
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}
