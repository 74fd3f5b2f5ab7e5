//! Upstream HTTP client seam.

use async_trait::async_trait;

use crate::key::QueryParams;
use crate::outcome::UpstreamOutcome;

/// Issues GET requests to the proxied service.
///
/// Implementations resolve `path` against their own base URL, send `params`
/// as the query string and apply their own timeout. 4xx responses are
/// results, not errors; a timeout must be reported as
/// [`UpstreamOutcome::Timeout`] and not folded into `TransportFailure`.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch(&self, path: &str, params: &QueryParams) -> UpstreamOutcome;
}
