//! Process-wide log output for applications embedding a project.

use tracing::Level;

/// Install a `fmt` subscriber at `INFO`.
///
/// Returns `false` if a global subscriber was already installed; calling
/// this more than once is harmless.
pub fn init_logging() -> bool {
    init_logging_at(Level::INFO)
}

/// Install a `fmt` subscriber that records events at `level` and above.
pub fn init_logging_at(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
}
