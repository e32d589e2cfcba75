use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Install the fmt subscriber once. `log` records are bridged into it.
pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // Another subscriber may already be installed (tests, embedding).
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}
