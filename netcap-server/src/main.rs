//! Network Capture MCP Server binary.
//!
//! Provides two subcommands:
//! - `serve` (default): Start the MCP server over Streamable HTTP
//! - `search`: Search a preserved capture directory from the command line

use clap::{Parser, Subcommand};
use mcp_netcap_core::browser::BrowserManagerConfig;
use mcp_netcap_core::capture::query::search_logs;
use mcp_netcap_core::capture::{CaptureConfig, SearchQuery};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "netcap-server", about = "Browser Network Capture MCP Server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (default when no subcommand given)
    Serve(ServeArgs),

    /// Search the files of a preserved capture session
    Search(SearchArgs),
}

#[derive(Parser)]
struct ServeArgs {
    #[clap(flatten)]
    server: server_common::CliArgs,

    #[clap(flatten)]
    log: server_common::LogArgs,

    /// Custom Chrome/Edge binary path
    #[clap(long)]
    browser_path: Option<String>,

    /// Connect to already-running browser via CDP URL
    #[clap(long)]
    cdp_url: Option<String>,

    /// Run browser in headless mode
    #[clap(long, default_value = "true")]
    headless: bool,

    /// Parent directory for capture sessions (defaults to NETCAP_LOG_DIR or the OS data dir)
    #[clap(long)]
    capture_dir: Option<PathBuf>,

    /// How often to drain browser network events, in milliseconds
    #[clap(long, default_value = "500", value_parser = clap::value_parser!(u64).range(10..=10_000))]
    poll_interval_ms: u64,

    /// Keep session logs after stop_capture unless the call says otherwise
    #[clap(long)]
    keep_logs: bool,

    /// Do not fetch response bodies
    #[clap(long)]
    no_bodies: bool,
}

#[derive(Parser)]
struct SearchArgs {
    #[clap(flatten)]
    log: server_common::LogArgs,

    /// Capture session directory (the one containing index.json)
    dir: PathBuf,

    /// Text to search for (case-insensitive unless --regex)
    pattern: String,

    /// Treat the pattern as a regular expression
    #[clap(long)]
    regex: bool,

    /// Lines of context around each match
    #[clap(long, short = 'C', default_value = "2")]
    context: usize,

    /// Only search requests with this HTTP method
    #[clap(long)]
    method: Option<String>,

    /// Only search requests that received this status
    #[clap(long)]
    status: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Search(args)) => run_search(args).await,
        Some(Command::Serve(args)) => run_serve(args).await,
        None => run_serve(ServeArgs::parse_from(["netcap-server"])).await,
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    server_common::init_logging(&args.log.log_level);

    let browser_config = BrowserManagerConfig {
        browser_path: args.browser_path,
        cdp_url: args.cdp_url,
        headless: args.headless,
        window_size: (1280, 720),
    };

    let mut capture_config = CaptureConfig::resolved()?;
    if let Some(dir) = args.capture_dir {
        capture_config.log_root = dir;
    }
    capture_config.poll_interval = Duration::from_millis(args.poll_interval_ms);
    capture_config.purge_on_stop = !args.keep_logs;
    capture_config.fetch_bodies = !args.no_bodies;

    tracing::info!(log_root = %capture_config.log_root.display(), "Capture sessions will be stored here");

    let (server, manager, engine) = mcp_netcap_core::build_server(browser_config, capture_config)?;

    tokio::select! {
        result = server_common::run_http(server, &args.server) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, stopping capture and browser");
            if engine.is_capturing() {
                if let Err(e) = engine.stop(None).await {
                    tracing::warn!(error = %e, "Failed to stop capture");
                }
            }
            manager.shutdown().await;
            Ok(())
        }
    }
}

async fn run_search(args: SearchArgs) -> anyhow::Result<()> {
    server_common::init_logging(&args.log.log_level);

    let query = SearchQuery {
        pattern: args.pattern,
        regex: args.regex,
        context_lines: args.context,
        method: args.method,
        status: args.status,
    };
    let report = search_logs(&args.dir, &query).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.skipped_files.is_empty() {
        tracing::warn!(count = report.skipped_files.len(), "Some capture files could not be read");
    }
    Ok(())
}
