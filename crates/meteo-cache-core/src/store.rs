//! Key-value cache store seam.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// A shared key-value store with per-entry expiry.
///
/// Implementations must be safe to use from many in-flight requests at once.
/// Every operation may fail; the proxy decides how to degrade.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Name reported by the health check (e.g. `"redis"`).
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_with_expiry(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Stored form of a successful upstream response.
///
/// The body is kept as the exact text the upstream sent, so a hit is
/// byte-identical to the live fetch it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub content_type: Option<String>,
    pub body: String,
}

impl CachedResponse {
    /// Returns `None` when the body is not valid UTF-8; such bodies are not cached.
    pub fn from_body(content_type: Option<String>, body: &Bytes) -> Option<Self> {
        let body = std::str::from_utf8(body).ok()?.to_string();
        Some(Self { content_type, body })
    }

    pub fn to_json(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, CacheError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn into_body(self) -> Bytes {
        Bytes::from(self.body)
    }
}
