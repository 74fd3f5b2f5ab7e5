//! Log output for the proxy.
//!
//! Tracing starts before the config file is read, at `info` or whatever
//! `RUST_LOG` says. Once the config is loaded, [`apply_logging_level`] swaps in
//! `logging.level` through a reload handle. An explicit `RUST_LOG` always wins.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();
static FILTER_FROM_ENV: OnceLock<bool> = OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

fn init_tracing_with_level(level: &str) {
    let from_env = std::env::var_os("RUST_LOG")
        .and_then(|_| EnvFilter::try_from_default_env().ok());
    let _ = FILTER_FROM_ENV.set(from_env.is_some());

    let (filter, handle) =
        reload::Layer::new(from_env.unwrap_or_else(|| EnvFilter::new(level)));
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Switch to the configured level. Returns whether the filter changed.
///
/// No-op when `RUST_LOG` chose the filter or tracing was never initialized.
pub fn apply_logging_level(level: &str) -> bool {
    if FILTER_FROM_ENV.get().copied().unwrap_or(false) {
        tracing::debug!(level, "RUST_LOG is set, ignoring logging.level");
        return false;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };

    match handle.reload(EnvFilter::new(level)) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(level, error = %e, "failed to apply logging level");
            false
        }
    }
}
