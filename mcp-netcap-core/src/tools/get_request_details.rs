//! Full request/response data for one captured request.

use crate::capture::CaptureEngine;
use pmcp::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
#[schemars(deny_unknown_fields)]
pub struct GetRequestDetailsInput {
    /// Unique id from list_requests or search_requests
    #[validate(length(min = 1))]
    #[schemars(description = "The uniqueId of a captured request (from list_requests or search_requests)")]
    pub unique_id: String,
}

pub async fn execute(
    engine: &Arc<CaptureEngine>,
    input: GetRequestDetailsInput,
) -> Result<serde_json::Value, Error> {
    input
        .validate()
        .map_err(|e| Error::validation(format!("Validation failed: {}", e)))?;

    let details = engine
        .request_details(&input.unique_id)
        .await
        .map_err(super::capture_error)?;

    serde_json::to_value(details)
        .map_err(|e| Error::internal(format!("Failed to serialize request details: {}", e)))
}
