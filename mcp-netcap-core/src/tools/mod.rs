//! Tool registration for the network capture server.

pub mod get_request_details;
pub mod list_requests;
pub mod navigate;
pub mod search_requests;
pub mod start_capture;
pub mod stop_capture;

use crate::browser::BrowserManager;
use crate::capture::{CaptureEngine, CaptureError};
use pmcp::{Error, TypedTool};
use std::sync::Arc;

/// Caller mistakes become validation errors; everything else is internal.
pub(crate) fn capture_error(e: CaptureError) -> Error {
    match e {
        CaptureError::NotConfigured
        | CaptureError::AlreadyCapturing(_)
        | CaptureError::LogDirInUse(_)
        | CaptureError::NotCapturing
        | CaptureError::InvalidPattern(_)
        | CaptureError::RecordNotFound(_) => Error::validation(e.to_string()),
        CaptureError::Io { .. } | CaptureError::Json { .. } => Error::internal(e.to_string()),
    }
}

/// Register all capture tools onto the server builder.
pub fn register_tools(
    builder: pmcp::ServerBuilder,
    manager: Arc<BrowserManager>,
    engine: Arc<CaptureEngine>,
) -> pmcp::ServerBuilder {
    // --- Capture lifecycle ---

    let m = manager.clone();
    let e = engine.clone();
    let builder = builder.tool(
        "start_capture",
        TypedTool::new(
            "start_capture",
            move |input: start_capture::StartCaptureInput, _extra| {
                let m = m.clone();
                let e = e.clone();
                Box::pin(async move { start_capture::execute(&m, &e, input).await })
            },
        )
        .with_description(
            "Start recording network traffic of the browser page. Requests and responses are written to a session log directory as they happen.",
        ),
    );

    let e = engine.clone();
    let builder = builder.tool(
        "stop_capture",
        TypedTool::new(
            "stop_capture",
            move |input: stop_capture::StopCaptureInput, _extra| {
                let e = e.clone();
                Box::pin(async move { stop_capture::execute(&e, input).await })
            },
        )
        .with_description(
            "Stop recording network traffic. Log files are deleted unless keep_logs is true.",
        ),
    );

    let m = manager;
    let e = engine.clone();
    let builder = builder.tool(
        "navigate",
        TypedTool::new("navigate", move |input: navigate::NavigateInput, _extra| {
            let m = m.clone();
            let e = e.clone();
            Box::pin(async move { navigate::execute(&m, &e, input).await })
        })
        .with_description(
            "Navigate the browser page to a URL. Start a capture first to record the traffic it generates.",
        ),
    );

    // --- Queries ---

    let e = engine.clone();
    let builder = builder.tool(
        "list_requests",
        TypedTool::new(
            "list_requests",
            move |input: list_requests::ListRequestsInput, _extra| {
                let e = e.clone();
                Box::pin(async move { list_requests::execute(&e, input).await })
            },
        )
        .with_description(
            "List captured requests with method, URL, status, MIME type and size. Filter by URL substring, method or status.",
        ),
    );

    let e = engine.clone();
    let builder = builder.tool(
        "search_requests",
        TypedTool::new(
            "search_requests",
            move |input: search_requests::SearchRequestsInput, _extra| {
                let e = e.clone();
                Box::pin(async move { search_requests::execute(&e, input).await })
            },
        )
        .with_description(
            "Search captured request/response files and bodies for text or a regular expression. Returns matching lines with context, grouped by request.",
        ),
    );

    let e = engine;
    let builder = builder.tool(
        "get_request_details",
        TypedTool::new(
            "get_request_details",
            move |input: get_request_details::GetRequestDetailsInput, _extra| {
                let e = e.clone();
                Box::pin(async move { get_request_details::execute(&e, input).await })
            },
        )
        .with_description(
            "Get the full request, response and body of one captured request by its uniqueId.",
        ),
    );

    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_input_defaults() {
        let input: search_requests::SearchRequestsInput =
            serde_json::from_value(serde_json::json!({ "pattern": "token" })).unwrap();
        assert!(!input.regex);
        assert_eq!(input.context_lines, 2);
    }

    #[test]
    fn test_search_input_rejects_large_context() {
        use validator::Validate;
        let input: search_requests::SearchRequestsInput = serde_json::from_value(
            serde_json::json!({ "pattern": "token", "context_lines": 50 }),
        )
        .unwrap();
        assert!(input.validate().is_err());
    }
}
