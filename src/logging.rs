//! Tracing subscriber setup

use tracing::Level;

/// Install the global fmt subscriber, at debug level when `debug` is set
///
/// Calling this twice is harmless; the second subscriber is simply not installed.
pub fn init(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };

    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(debug)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed && debug {
        tracing::debug!("Debug logging enabled");
    }
}
