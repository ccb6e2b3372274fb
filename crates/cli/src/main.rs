//! Windlass CLI - Main Entry Point
//!
//! Binds the transport proxy, routes the RPC client through it, and runs
//! declarative test suites against the application under test.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use windlass_common::{RpcProtocol, Settings};
use windlass_proxy::ProxyServer;
use windlass_rpc::RpcClient;
use windlass_runner::{SessionTotals, TestRunner, TestSuite};

mod output;

/// Windlass - browser UI test automation core
#[derive(Parser)]
#[command(name = "windlass")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file
    #[arg(long, default_value = "windlass.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test suites through the transport proxy
    Run(RunArgs),

    /// Run only the transport proxy, until interrupted
    Proxy(ProxyArgs),

    /// Show version information
    Version,
}

#[derive(Args)]
struct RunArgs {
    /// Suite file or directory (overrides the settings file)
    #[arg(long)]
    suite: Option<PathBuf>,

    /// Base URL of the application under test
    #[arg(long)]
    test_url: Option<String>,

    /// Proxy listen port
    #[arg(long)]
    proxy_port: Option<u16>,

    /// Wire protocol for the command bridge (xmlrpc or jsonrpc)
    #[arg(long, value_parser = parse_protocol)]
    protocol: Option<RpcProtocol>,

    /// Keep running remaining steps after a failed one
    #[arg(long)]
    continue_on_failure: bool,

    /// Directory for run reports
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

#[derive(Args)]
struct ProxyArgs {
    /// Proxy listen port
    #[arg(long)]
    port: Option<u16>,
}

fn parse_protocol(s: &str) -> Result<RpcProtocol, String> {
    match s {
        "xmlrpc" => Ok(RpcProtocol::XmlRpc),
        "jsonrpc" => Ok(RpcProtocol::JsonRpc),
        other => Err(format!("unknown protocol: {} (expected xmlrpc or jsonrpc)", other)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run(args) => run(&cli.config, args).await,
        Commands::Proxy(args) => proxy(&cli.config, args).await,
        Commands::Version => {
            println!("Windlass v{}", env!("CARGO_PKG_VERSION"));
            println!("Browser UI test automation core");
            Ok(())
        }
    }
}

async fn run(config: &PathBuf, args: RunArgs) -> anyhow::Result<()> {
    let mut settings = Settings::load(config)?;
    if let Some(suite) = args.suite {
        settings.suite_path = Some(suite);
    }
    if let Some(test_url) = args.test_url {
        settings.test_url = test_url;
    }
    if let Some(port) = args.proxy_port {
        settings.proxy_port = port;
    }
    if let Some(protocol) = args.protocol {
        settings.rpc.protocol = protocol;
    }
    if args.continue_on_failure {
        settings.continue_on_failure = true;
    }
    if let Some(report_dir) = args.report_dir {
        settings.report_dir = report_dir;
    }
    settings.validate()?;

    let suite_path = settings
        .suite_path
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no suite given; pass --suite or set suite_path"))?;
    let suites = TestSuite::load_all(&suite_path)?;
    if suites.is_empty() {
        anyhow::bail!("no suites found under {}", suite_path.display());
    }

    let settings = Arc::new(settings);
    let proxy = ProxyServer::bind(settings.clone()).await?.spawn()?;

    // Route the command bridge through the run's own proxy
    let mut client_settings = (*settings).clone();
    client_settings.rpc.proxy_addr = Some(proxy.url());
    let client_settings = Arc::new(client_settings);
    let client = RpcClient::new(&client_settings)?;
    let runner = TestRunner::new(client, client_settings);

    let totals = SessionTotals::new();
    let reports = tokio::select! {
        result = runner.run_suites(&suites, &totals) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, shutting down");
            proxy.shutdown().await?;
            std::process::exit(130);
        }
    };

    for report in &reports {
        output::print_report(report);
        if let Err(e) = runner.write_report(report) {
            warn!("cannot write report for {}: {}", report.suite, e);
        }
    }
    let snapshot = totals.snapshot();
    output::print_summary(&snapshot, reports.len());

    if !settings.exit_on_done {
        info!("run done; proxy stays up until interrupted (exit_on_done = false)");
        tokio::signal::ctrl_c().await?;
    }
    proxy.shutdown().await?;

    if snapshot.fail > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn proxy(config: &PathBuf, args: ProxyArgs) -> anyhow::Result<()> {
    let mut settings = Settings::load(config)?;
    if let Some(port) = args.port {
        settings.proxy_port = port;
    }
    settings.validate()?;

    let proxy = ProxyServer::bind(Arc::new(settings)).await?.spawn()?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    proxy.shutdown().await?;
    Ok(())
}
