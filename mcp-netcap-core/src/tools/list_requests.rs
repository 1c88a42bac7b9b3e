//! List captured requests, optionally filtered.

use crate::capture::{CaptureEngine, RequestFilter};
use pmcp::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
#[schemars(deny_unknown_fields)]
pub struct ListRequestsInput {
    /// Only requests whose URL contains this substring
    #[schemars(description = "Only include requests whose URL contains this substring (optional)")]
    pub url_contains: Option<String>,

    /// HTTP method, case-insensitive
    #[schemars(description = "Only include requests with this HTTP method, e.g. 'POST' (optional)")]
    pub method: Option<String>,

    /// Response status code
    #[validate(range(min = 100, max = 599))]
    #[schemars(description = "Only include requests that received this HTTP status (optional)")]
    pub status: Option<u16>,
}

pub async fn execute(
    engine: &Arc<CaptureEngine>,
    input: ListRequestsInput,
) -> Result<serde_json::Value, Error> {
    input
        .validate()
        .map_err(|e| Error::validation(format!("Validation failed: {}", e)))?;

    let filter = RequestFilter {
        url_contains: input.url_contains,
        method: input.method,
        status: input.status,
    };
    let report = engine.filter(&filter).await;

    serde_json::to_value(report)
        .map_err(|e| Error::internal(format!("Failed to serialize requests: {}", e)))
}
