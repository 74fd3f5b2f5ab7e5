//! Cache store backends for the proxy.
//!
//! ## Modes
//!
//! - **Redis**: shared by every proxy instance, the production setup
//! - **Memory**: per-process `DashMap`, for running without Redis
//!
//! Both implement [`meteo_cache_core::CacheStore`]. Read and write failures
//! are surfaced to the proxy, which degrades to the upstream; only the
//! startup connection is fatal.

pub mod backend;

pub use backend::{CacheBackend, CachedEntry};
