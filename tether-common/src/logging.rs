//! Log setup and the subsystem event macros.
//!
//! Events are emitted inside a span named after the subsystem that produced
//! them (`internal`, `delivery` or `recovery`), so a compact log line reads
//! `delivery: Message ... sent`.

use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Environment variable holding the log level
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Only events whose target starts with this are printed
const TARGET_PREFIX: &str = "tether";

#[macro_export]
macro_rules! log {
    ($level:expr, $subsystem:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $subsystem);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Lifecycle of the core itself: start-up, janitor sweeps, shutdown
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// Payloads handed to transports, first sends and retries alike
#[macro_export]
macro_rules! delivery {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "delivery", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::delivery!(level = DEBUG, $($msg),*)
    };
}

/// Recovery runs and the strategies they execute
#[macro_export]
macro_rules! recovery {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "recovery", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::recovery!(level = INFO, $($msg),*)
    };
}

/// TRACE in debug builds, INFO in release builds
#[must_use]
pub const fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

/// Parse a `LOG_LEVEL` value, falling back to [`default_level`] when it is
/// unset or unreadable.
#[must_use]
pub fn level_from(raw: Option<&str>) -> LevelFilter {
    let default = default_level();

    raw.map_or(default, |level| {
        LevelFilter::from_str(level.trim()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

fn is_workspace_target(target: &str) -> bool {
    target.starts_with(TARGET_PREFIX)
}

/// Install the global subscriber.
///
/// A second call is ignored, so tests and the binary can both call it.
pub fn init() {
    let level = level_from(std::env::var(LOG_LEVEL_ENV).ok().as_deref());

    let _ = tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    is_workspace_target(metadata.target())
                })),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_level_from_env_value() {
        assert_eq!(level_from(Some("warn")), LevelFilter::WARN);
        assert_eq!(level_from(Some(" DEBUG ")), LevelFilter::DEBUG);
        assert_eq!(level_from(Some("off")), LevelFilter::OFF);
        assert_eq!(level_from(Some("loud")), default_level());
        assert_eq!(level_from(None), default_level());
    }

    #[test]
    fn test_only_workspace_targets_pass() {
        assert!(is_workspace_target("tether_delivery::coordinator"));
        assert!(is_workspace_target("tether"));
        assert!(!is_workspace_target("tokio::runtime"));
        assert!(!is_workspace_target("hyper"));
    }

    #[test]
    fn test_macros_expand_without_subscriber() {
        init();
        internal!("janitor tick");
        delivery!(level = TRACE, "sent {} bytes", 12);
        recovery!("run {} finished", 1);
    }
}
