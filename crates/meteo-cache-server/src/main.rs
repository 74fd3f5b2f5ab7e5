use std::env;

use meteo_cache_server::config::loader::{DEFAULT_CONFIG_FILE, load_config};
use meteo_cache_server::{ServerBuilder, create_cache_backend};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From METEO_CACHE_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (meteo-cache.toml), optional
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (METEO_CACHE_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    // Initialize tracing early with the default level
    meteo_cache_server::init_tracing();

    let (config_path, source) = resolve_config_path();
    let explicit_path = match source {
        ConfigSource::Default => None,
        _ => Some(config_path.as_str()),
    };

    let cfg = match load_config(explicit_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );
    meteo_cache_server::apply_logging_level(&cfg.logging.level);

    // The cache must be reachable before we accept traffic
    let cache = match create_cache_backend(&cfg.cache, &cfg.redis).await {
        Ok(cache) => cache,
        Err(e) => {
            tracing::error!(error = %e, "Cannot connect to cache store");
            eprintln!("Cannot connect to cache store: {e}");
            std::process::exit(1);
        }
    };

    let server = match ServerBuilder::new()
        .with_config(cfg)
        .with_cache(cache.clone())
        .build()
        .await
    {
        Ok(s) => s,
        Err(e) => {
            cache.close();
            eprintln!("Server initialization failed: {e}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err}");
        std::process::exit(1);
    }

    tracing::info!("Shutdown complete");
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: METEO_CACHE_CONFIG
/// 3. Default: meteo-cache.toml (used only if it exists)
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return (path, ConfigSource::CliArgument);
            }
        }
    }

    if let Ok(path) = env::var("METEO_CACHE_CONFIG") {
        if !path.is_empty() {
            return (path, ConfigSource::EnvironmentVariable);
        }
    }

    (DEFAULT_CONFIG_FILE.to_string(), ConfigSource::Default)
}
