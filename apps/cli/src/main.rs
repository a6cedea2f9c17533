//! Keel command line
//!
//! Discovers the MCP servers configured in the settings file, reports their status
//! and tools, and can call a discovered tool.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use keel_core::{default_settings_path, ConnectionStatusTracker, McpSettings, TokenStore};
use keel_mcp::{
    BrowserOAuthProvider, ConnectOutcome, DiscoveryOrchestrator, DiscoveryReport, FileTokenStore,
    HttpOAuthDiscovery, InMemoryToolRegistry, OAuthRemediator, ServerConnector, ToolRegistry,
    TransportFactory,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "keel", version, about = "Keel - MCP server discovery and tool calls")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Settings file (defaults to <config dir>/keel/settings.json).
    #[arg(long, global = true, env = "KEEL_SETTINGS")]
    settings: Option<PathBuf>,

    /// Extra stdio server command line, registered as server "mcp".
    #[arg(long, global = true)]
    mcp_command: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover servers and list their status and tools (default).
    List,
    /// Discover servers and call one tool.
    Call {
        /// Registered (resolved) tool name.
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Forget the stored OAuth token of a server.
    Logout { server: String },
}

fn logs_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keel")
        .join("logs")
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    dotenvy::dotenv().ok();

    let logs_dir = logs_dir();
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
    }

    // keel.2026-10-17.log
    let (file_writer, guard) = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("keel")
        .filename_suffix("log")
        .build(&logs_dir)
    {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        Err(e) => {
            eprintln!("Warning: File logging disabled: {}", e);
            (None, None)
        }
    };

    // RUST_LOG wins
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,keel=debug,keel_core=debug,keel_mcp=debug"));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .compact()
        .with_target(true);

    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing();

    let token_store: Arc<dyn TokenStore> =
        Arc::new(FileTokenStore::new(FileTokenStore::default_path()));

    if let Some(Commands::Logout { server }) = &cli.command {
        token_store.remove_token(server).await?;
        println!("Removed stored token for '{}'", server);
        return Ok(());
    }

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let settings = McpSettings::load(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    info!(
        path = %settings_path.display(),
        servers = settings.servers.len(),
        "Loaded settings"
    );

    let registry = Arc::new(InMemoryToolRegistry::new());
    let remediator = OAuthRemediator::new(
        Arc::new(HttpOAuthDiscovery::default()),
        Arc::new(BrowserOAuthProvider::new(token_store.clone())),
    );
    let connector = ServerConnector::new(
        Arc::new(ConnectionStatusTracker::new()),
        registry.clone(),
        TransportFactory::new(token_store),
        remediator,
    );
    let orchestrator = DiscoveryOrchestrator::new(connector);

    let extra_command = cli
        .mcp_command
        .as_deref()
        .or(settings.server_command.as_deref());
    let report = orchestrator.discover(&settings.servers, extra_command).await?;

    let result = match cli.command.unwrap_or(Commands::List) {
        Commands::List => {
            print_report(&report, &registry);
            Ok(())
        }
        Commands::Call { tool, args } => call_tool(&registry, &tool, &args).await,
        Commands::Logout { .. } => Ok(()),
    };

    close_connections(&registry).await;
    result
}

fn print_report(report: &DiscoveryReport, registry: &InMemoryToolRegistry) {
    for (server, outcome) in &report.outcomes {
        let status = match outcome {
            ConnectOutcome::Registered { tools } => format!("connected, {} tools", tools.len()),
            ConnectOutcome::NoTools => "no tools".to_string(),
            ConnectOutcome::ConfigError(e) => format!("configuration error: {}", e),
            ConnectOutcome::ConnectFailed(e) => format!("connection failed: {}", e),
            ConnectOutcome::AuthRemediated => "authenticated, run again to connect".to_string(),
            ConnectOutcome::AuthFailed(e) => format!("authentication failed: {}", e),
            ConnectOutcome::ListFailed(e) => format!("tool listing failed: {}", e),
            ConnectOutcome::Panicked => "internal error".to_string(),
        };
        println!("{}: {}", server, status);
        for tool in registry.get_tools_by_server(server) {
            if tool.description.is_empty() {
                println!("  {}", tool.resolved_name);
            } else {
                println!("  {} - {}", tool.resolved_name, tool.description);
            }
        }
    }
}

async fn call_tool(
    registry: &InMemoryToolRegistry,
    name: &str,
    args: &str,
) -> anyhow::Result<()> {
    let tool = registry
        .get_tool(name)
        .with_context(|| format!("Unknown tool '{}'", name))?;
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args must be a JSON object")?;

    let result = tool.execute(arguments).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn close_connections(registry: &InMemoryToolRegistry) {
    let mut closed = BTreeSet::new();
    for tool in registry.all_tools() {
        if closed.insert(tool.server_name.clone()) {
            tool.connection().close().await;
        }
    }
    if closed.is_empty() {
        warn!("No MCP tools were discovered");
    }
}
