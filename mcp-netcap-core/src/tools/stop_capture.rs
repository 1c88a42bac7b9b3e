//! Stop capturing and optionally keep the session's log files.

use crate::capture::CaptureEngine;
use pmcp::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
#[schemars(deny_unknown_fields)]
pub struct StopCaptureInput {
    /// Keep the log directory instead of deleting it
    #[schemars(description = "Keep the session's log files for later inspection (optional, server default applies when omitted)")]
    pub keep_logs: Option<bool>,
}

pub async fn execute(
    engine: &Arc<CaptureEngine>,
    input: StopCaptureInput,
) -> Result<serde_json::Value, Error> {
    input
        .validate()
        .map_err(|e| Error::validation(format!("Validation failed: {}", e)))?;

    let summary = engine
        .stop(input.keep_logs)
        .await
        .map_err(super::capture_error)?;

    Ok(json!({
        "status": "stopped",
        "total_requests": summary.total_requests,
        "log_dir": summary.log_dir,
        "logs_preserved": summary.logs_preserved
    }))
}
