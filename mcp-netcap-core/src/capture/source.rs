//! Collaborator seams: where protocol events come from and how response
//! bodies are retrieved.

use super::event::LogEntry;
use async_trait::async_trait;

/// Pull-based source of protocol-log envelopes.
///
/// Each call returns whatever has accumulated since the previous call. An
/// error means the underlying browser session is gone or unreachable; the
/// poller logs it and tries again on the next tick.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch_entries(&self) -> anyhow::Result<Vec<LogEntry>>;
}

/// Body returned by the browser for a finished response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBody {
    pub body: String,
    /// The body is base64 (binary content such as images or fonts).
    pub base64_encoded: bool,
}

impl ResponseBody {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            base64_encoded: false,
        }
    }
}

/// Retrieves a response body by the event-scoped correlation key.
///
/// Failures are routine (redirects, evicted resources, preflight requests).
#[async_trait]
pub trait BodyFetcher: Send + Sync {
    async fn fetch_body(&self, correlation_key: &str) -> anyhow::Result<ResponseBody>;
}
