use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gcp_ops_mcp::config::{Config, ServerMode};
use gcp_ops_mcp::gcp::GcpClient;
use gcp_ops_mcp::guardrail::Guardrail;
use gcp_ops_mcp::http::serve_http;
use gcp_ops_mcp::mcp::{run_stdio, McpServer};
use gcp_ops_mcp::tools::build_registry;

const SERVER_NAME: &str = "gcp-ops-mcp";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout 是协议通道，日志只能写 stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = parse_args(env::args().skip(1))?;
    let config = Config::load(config_path.as_deref())
        .with_context(|| format!("loading config {:?}", config_path))?;

    let validator = Arc::new(Guardrail::new(&config));
    let client = Arc::new(GcpClient::new(&config.upstream).context("building GCP client")?);
    let registry = build_registry(validator, client.clone(), client);
    let server = Arc::new(McpServer::new(
        SERVER_NAME,
        env!("CARGO_PKG_VERSION"),
        registry,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?config.server.mode,
        allowed_projects = config.allowed_project_ids.len(),
        "{SERVER_NAME} starting"
    );
    let outcome = match config.server.mode {
        ServerMode::Stdio => run_stdio(server, shutdown_rx).await,
        ServerMode::Http => match config.server.socket_addr() {
            Ok(addr) => serve_http(server, addr, shutdown_rx).await,
            Err(e) => Err(e),
        },
    };
    match &outcome {
        Ok(()) => info!("{SERVER_NAME} stopped"),
        Err(e) => error!(error = %e, "{SERVER_NAME} failed"),
    }
    // stdin 的阻塞读线程不会随运行时退出，成败都要显式结束进程
    std::process::exit(exit_code(&outcome))
}

fn exit_code(outcome: &gcp_ops_mcp::error::Result<()>) -> i32 {
    match outcome {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// `gcp-ops-mcp [--config <path> | <path>]`
fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Option<PathBuf>> {
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(p) => path = Some(PathBuf::from(p)),
                None => bail!("--config requires a path"),
            },
            "--help" | "-h" => {
                eprintln!("Usage: {SERVER_NAME} [--config <config.yaml|json>]");
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown flag: {other}"),
            other => path = Some(PathBuf::from(other)),
        }
    }
    Ok(path)
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
