//! Full-text / regex search across the captured files.

use crate::capture::{CaptureEngine, SearchQuery};
use pmcp::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

fn default_context_lines() -> usize {
    2
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
#[schemars(deny_unknown_fields)]
pub struct SearchRequestsInput {
    /// Text or regular expression to look for
    #[validate(length(min = 1))]
    #[schemars(description = "Text to search for (case-insensitive), or a regular expression when regex is true")]
    pub pattern: String,

    /// Interpret pattern as a regular expression
    #[serde(default)]
    #[schemars(description = "Treat the pattern as a regular expression (default: false)")]
    pub regex: bool,

    /// Lines of context around each match
    #[serde(default = "default_context_lines")]
    #[validate(range(max = 20))]
    #[schemars(description = "Lines of context before and after each match (default: 2)")]
    pub context_lines: usize,

    /// Restrict to one HTTP method
    #[schemars(description = "Only search requests with this HTTP method (optional)")]
    pub method: Option<String>,

    /// Restrict to one response status
    #[validate(range(min = 100, max = 599))]
    #[schemars(description = "Only search requests that received this HTTP status (optional)")]
    pub status: Option<u16>,
}

pub async fn execute(
    engine: &Arc<CaptureEngine>,
    input: SearchRequestsInput,
) -> Result<serde_json::Value, Error> {
    input
        .validate()
        .map_err(|e| Error::validation(format!("Validation failed: {}", e)))?;

    let query = SearchQuery {
        pattern: input.pattern,
        regex: input.regex,
        context_lines: input.context_lines,
        method: input.method,
        status: input.status,
    };
    let report = engine.search(&query).await.map_err(super::capture_error)?;

    serde_json::to_value(report)
        .map_err(|e| Error::internal(format!("Failed to serialize search results: {}", e)))
}
