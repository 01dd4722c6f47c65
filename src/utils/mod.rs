use dirs::home_dir;
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Once,
};

use crate::config::DEFAULT_LOG_FILTER;

const DEFAULT_DIR_NAME: &str = ".recurring_ledger";
const HOME_ENV: &str = "RECURRING_LEDGER_HOME";

static TRACING_INIT: Once = Once::new();

/// Initializes the global tracing subscriber with the default filter.
pub fn init_tracing() {
    init_tracing_with(DEFAULT_LOG_FILTER);
}

/// Initializes the global tracing subscriber. `RUST_LOG` directives take precedence over
/// `default_directive`. Only the first call has any effect.
pub fn init_tracing_with(default_directive: &str) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        // Another subscriber may already be installed by the host application.
        let _ = fmt().with_env_filter(filter).try_init();
    });
}

/// Returns the application data directory, defaulting to `~/.recurring_ledger`.
pub fn app_data_dir() -> PathBuf {
    if let Some(custom) = env::var_os(HOME_ENV) {
        return PathBuf::from(custom);
    }
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DIR_NAME)
}

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}
