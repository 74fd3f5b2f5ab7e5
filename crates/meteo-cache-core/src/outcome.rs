//! Tagged result of a single upstream call.

use bytes::Bytes;

use crate::error::UpstreamError;

/// What the upstream call produced, already classified.
///
/// Only `Success` is ever cached. `ClientError` is forwarded verbatim;
/// `Timeout` and `TransportFailure` become gateway error responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamOutcome {
    /// 2xx
    Success {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },
    /// 4xx
    ClientError {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },
    Timeout,
    /// Connection, DNS or body read failures, and upstream 5xx
    /// (or any status outside 2xx/4xx).
    TransportFailure(String),
}

impl UpstreamOutcome {
    /// Classify a completed HTTP exchange by its status code.
    pub fn from_status(status: u16, content_type: Option<String>, body: Bytes) -> Self {
        match status {
            200..=299 => Self::Success {
                status,
                content_type,
                body,
            },
            400..=499 => Self::ClientError {
                status,
                content_type,
                body,
            },
            _ => Self::TransportFailure(format!("upstream responded with status {status}")),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::ClientError { .. } => "client_error",
            Self::Timeout => "timeout",
            Self::TransportFailure(_) => "transport_failure",
        }
    }
}

impl From<UpstreamError> for UpstreamOutcome {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout => Self::Timeout,
            other => Self::TransportFailure(other.to_string()),
        }
    }
}
