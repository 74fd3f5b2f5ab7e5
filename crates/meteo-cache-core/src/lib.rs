//! Core of the meteo-cache proxy.
//!
//! - [`key`]: derives a stable cache key from an endpoint and its query parameters
//! - [`outcome`]: the tagged result of one upstream call
//! - [`store`] / [`upstream`]: the collaborator seams the proxy depends on
//! - [`proxy`]: cache-aside orchestration over those collaborators
//!
//! Nothing here knows about HTTP frameworks, Redis or reqwest; those live in
//! `meteo-cache-server` and are injected through the traits.

pub mod error;
pub mod key;
pub mod metrics;
pub mod outcome;
pub mod proxy;
pub mod store;
pub mod upstream;

pub use error::{CacheError, UpstreamError};
pub use key::{CacheKey, QueryParam, QueryParams, canonical_form, derive_cache_key};
pub use outcome::UpstreamOutcome;
pub use proxy::{CacheAsideProxy, CacheStatus, ProxyRequest, ProxyResponse};
pub use store::{CacheStore, CachedResponse};
pub use upstream::UpstreamClient;

/// Content type used when the upstream does not send one, and for error bodies.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
