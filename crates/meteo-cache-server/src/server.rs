use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Router, middleware, routing::get};
use meteo_cache_core::CacheAsideProxy;
use tokio::net::TcpListener;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{
    cache::CacheBackend, config::AppConfig, create_cache_backend, handlers,
    middleware as app_middleware, upstream::HttpUpstream,
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared per-request state. Cheap to clone: everything inside is `Arc`-backed.
#[derive(Clone)]
pub struct AppState {
    pub proxy: CacheAsideProxy,
    pub metrics_enabled: bool,
}

impl AppState {
    pub fn new(proxy: CacheAsideProxy) -> Self {
        Self {
            proxy,
            metrics_enabled: false,
        }
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}

pub fn build_app(state: AppState) -> Router {
    let mut router = Router::new().route("/health", get(handlers::health));
    if state.metrics_enabled {
        router = router.route("/metrics", get(handlers::metrics));
    }

    router
        // Everything else is proxied
        .fallback(handlers::proxy)
        // Middleware stack (outermost last: request id -> trace -> compression/cors -> metrics)
        .layer(middleware::from_fn(app_middleware::track_metrics))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .with_state(state)
}

pub struct MeteoCacheServer {
    addr: SocketAddr,
    app: Router,
    cache: CacheBackend,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    cache: Option<CacheBackend>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            cache: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Use an already connected cache instead of connecting in [`build`](Self::build).
    pub fn with_cache(mut self, cache: CacheBackend) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn build(self) -> anyhow::Result<MeteoCacheServer> {
        let cfg = self.config;
        let cache = match self.cache {
            Some(cache) => cache,
            None => create_cache_backend(&cfg.cache, &cfg.redis).await?,
        };
        let upstream = HttpUpstream::new(&cfg.upstream)?;

        if cfg.metrics.enabled {
            crate::metrics::init_metrics();
        }

        tracing::info!(
            backend = cache.mode(),
            ttl_secs = cfg.cache.ttl_secs,
            upstream = %upstream.base_url(),
            upstream_timeout_ms = cfg.upstream.timeout_ms,
            "cache-aside proxy configured"
        );

        let proxy = CacheAsideProxy::new(
            Arc::new(cache.clone()),
            Arc::new(upstream),
            cfg.cache_ttl(),
        );
        let state = AppState::new(proxy).with_metrics(cfg.metrics.enabled);

        Ok(MeteoCacheServer {
            addr: self.addr,
            app: build_app(state),
            cache,
        })
    }
}

impl MeteoCacheServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until Ctrl-C or SIGTERM, then release the cache connection.
    ///
    /// The cache is closed on every exit path, including a failed bind.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = match TcpListener::bind(self.addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.cache.close();
                return Err(e.into());
            }
        };
        tracing::info!("listening on {}", self.addr);

        let sweeper = self.cache.spawn_sweeper(SWEEP_INTERVAL);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        self.cache.close();
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
