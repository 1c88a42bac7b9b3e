//! Start capturing network traffic from the active page.

use crate::browser::BrowserManager;
use crate::capture::{CaptureEngine, CaptureError};
use pmcp::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
#[schemars(deny_unknown_fields)]
pub struct StartCaptureInput {
    /// Directory to write logs into instead of a new time-stamped one
    #[validate(length(min = 1))]
    #[schemars(description = "Directory for this session's logs (optional, defaults to a new time-stamped directory)")]
    pub log_dir: Option<String>,
}

pub async fn execute(
    manager: &Arc<BrowserManager>,
    engine: &Arc<CaptureEngine>,
    input: StartCaptureInput,
) -> Result<serde_json::Value, Error> {
    input
        .validate()
        .map_err(|e| Error::validation(format!("Validation failed: {}", e)))?;

    if engine.is_capturing() {
        let dir = engine.log_dir().await.unwrap_or_default();
        return Err(super::capture_error(CaptureError::AlreadyCapturing(dir)));
    }

    let (source, bodies) = manager
        .capture_binding()
        .await
        .map_err(|e| Error::internal(format!("Browser error: {}", e)))?;
    engine.attach(source, bodies).await;

    let dir = engine
        .start(input.log_dir.map(PathBuf::from))
        .await
        .map_err(super::capture_error)?;

    Ok(json!({
        "status": "capturing",
        "log_dir": dir,
        "poll_interval_ms": engine.config().poll_interval.as_millis() as u64
    }))
}
