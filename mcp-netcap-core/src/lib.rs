//! Network capture MCP server core library.
//!
//! Provides `build_server()` which constructs a fully-configured MCP `Server`
//! exposing browser network capture tools, ready to be served over HTTP.

pub mod browser;
pub mod capture;
pub mod cdp;
pub mod tools;

use browser::{BrowserManager, BrowserManagerConfig};
use capture::{CaptureConfig, CaptureEngine};
use pmcp::types::{ServerCapabilities, ToolCapabilities};
use pmcp::Server;
use std::sync::Arc;

/// Build a fully-configured MCP server with network capture capabilities.
///
/// The browser manager and capture engine are returned alongside the server
/// so the caller can shut them down cleanly.
pub fn build_server(
    browser_config: BrowserManagerConfig,
    capture_config: CaptureConfig,
) -> pmcp::Result<(Server, Arc<BrowserManager>, Arc<CaptureEngine>)> {
    let manager = Arc::new(BrowserManager::new(browser_config));
    let engine = Arc::new(CaptureEngine::new(capture_config));

    let builder = Server::builder()
        .name("netcap")
        .version(env!("CARGO_PKG_VERSION"))
        .capabilities(ServerCapabilities {
            tools: Some(ToolCapabilities {
                list_changed: Some(true),
            }),
            ..Default::default()
        });

    let builder = tools::register_tools(builder, manager.clone(), engine.clone());

    Ok((builder.build()?, manager, engine))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_server() {
        let server = build_server(BrowserManagerConfig::default(), CaptureConfig::default());
        assert!(server.is_ok());
    }
}
