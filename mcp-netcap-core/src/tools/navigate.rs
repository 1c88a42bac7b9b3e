//! Navigate the captured page to a URL.

use crate::browser::BrowserManager;
use crate::capture::CaptureEngine;
use pmcp::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

fn default_timeout_ms() -> u64 {
    30000
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
#[schemars(deny_unknown_fields)]
pub struct NavigateInput {
    /// URL to navigate to
    #[validate(length(min = 1))]
    #[schemars(description = "The URL to navigate to")]
    pub url: String,

    /// Navigation timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1000, max = 120000))]
    #[schemars(description = "Navigation timeout in milliseconds (default: 30000)")]
    pub timeout_ms: u64,

    /// Extra time to wait after load so late requests are captured
    #[serde(default)]
    #[validate(range(max = 30000))]
    #[schemars(description = "Milliseconds to wait after load for trailing network requests (default: 0)")]
    pub settle_ms: u64,
}

pub async fn execute(
    manager: &Arc<BrowserManager>,
    engine: &Arc<CaptureEngine>,
    input: NavigateInput,
) -> Result<serde_json::Value, Error> {
    input
        .validate()
        .map_err(|e| Error::validation(format!("Validation failed: {}", e)))?;

    let page = manager
        .page()
        .await
        .map_err(|e| Error::internal(format!("Browser error: {}", e)))?;

    tokio::time::timeout(Duration::from_millis(input.timeout_ms), page.goto(&input.url))
        .await
        .map_err(|_| {
            Error::internal(format!(
                "Navigation to {} timed out after {}ms",
                input.url, input.timeout_ms
            ))
        })?
        .map_err(|e| Error::internal(format!("Navigation failed: {}", e)))?;

    if input.settle_ms > 0 {
        tokio::time::sleep(Duration::from_millis(input.settle_ms)).await;
    }

    let final_url = page
        .url()
        .await
        .map_err(|e| Error::internal(format!("Failed to get URL: {}", e)))?
        .unwrap_or_default()
        .to_string();

    Ok(json!({
        "url": final_url,
        "status": "navigated",
        "capturing": engine.is_capturing(),
        "requests_captured": engine.records().await.len()
    }))
}
