use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::config::LogSettings;

/// Dependencies (sled, rusqlite) are held to this level whatever the
/// configured one is.
const DEPENDENCY_LEVEL: LevelFilter = LevelFilter::WARN;

/// Install the global subscriber from `settings` and return the level
/// applied to this crate's events. A subscriber that is already installed
/// is left alone, so calling this twice is harmless.
pub fn init(settings: &LogSettings) -> LevelFilter {
    let level = parse_level(&settings.level);
    let filter = Targets::new()
        .with_default(DEPENDENCY_LEVEL)
        .with_target(env!("CARGO_CRATE_NAME"), level);

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(settings.ansi))
        .with(filter)
        .try_init();
    level
}

/// Unknown names fall back to `info`.
pub(crate) fn parse_level(level: &str) -> LevelFilter {
    let level = level.trim();
    if level.eq_ignore_ascii_case("warning") {
        return LevelFilter::WARN;
    }
    level.parse().unwrap_or(LevelFilter::INFO)
}
