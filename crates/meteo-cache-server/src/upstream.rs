//! reqwest-backed upstream client.

use std::time::Duration;

use async_trait::async_trait;
use meteo_cache_core::{QueryParams, UpstreamClient, UpstreamError, UpstreamOutcome};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};
use url::Url;

use crate::config::UpstreamConfig;

const USER_AGENT: &str = concat!("meteo-cache/", env!("CARGO_PKG_VERSION"));

/// GETs `<base_url><path>?<params>` with a fixed timeout.
///
/// The inner `reqwest::Client` pools connections and is cheap to clone, so
/// one instance serves every request.
#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        // Validate once; per-request URLs are built by concatenation so a base
        // path prefix is kept.
        Url::parse(&config.base_url)?;
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| UpstreamError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The query is forwarded in its received encoding, so values that are
    /// not UTF-8 reach the upstream unchanged.
    fn url_for(&self, path: &str, params: &QueryParams) -> Result<Url, UpstreamError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))?;
        if !params.is_empty() {
            url.set_query(Some(&params.to_query_string()));
        }
        Ok(url)
    }

    async fn try_fetch(
        &self,
        path: &str,
        params: &QueryParams,
    ) -> Result<UpstreamOutcome, UpstreamError> {
        let url = self.url_for(path, params)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        debug!(status, bytes = body.len(), "upstream responded");
        Ok(UpstreamOutcome::from_status(status, content_type, body))
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    #[instrument(skip(self, params), fields(upstream = %self.base_url))]
    async fn fetch(&self, path: &str, params: &QueryParams) -> UpstreamOutcome {
        match self.try_fetch(path, params).await {
            Ok(outcome) => outcome,
            Err(e) => e.into(),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout
    } else if e.is_connect() {
        UpstreamError::transport(format!("failed to connect to upstream: {e}"))
    } else {
        UpstreamError::transport(e.to_string())
    }
}
