//! AgentMesh node server
//!
//! Boots one mesh node: the peer (BTP) listener, the HTTP control
//! surface, and the telemetry stream behind it.
//!
//! # Usage
//!
//! ```bash
//! # start with environment configuration
//! AGENT_ID=alice AGENT_HTTP_PORT=3000 AGENT_BTP_PORT=3001 agentmesh-server
//!
//! # or with CLI overrides
//! agentmesh-server --agent-id alice --http-port 4000
//! ```
//!
//! Exit codes: 0 on clean shutdown, 1 on fatal startup failure.

use std::net::SocketAddr;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agentmesh_api::{create_router, AppState};
use agentmesh_node::{Node, NodeConfig};

/// AgentMesh node - peer transport, skills, and payment channels
#[derive(Parser, Debug)]
#[command(name = "agentmesh-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Agent identifier
    #[arg(long, env = "AGENT_ID")]
    agent_id: Option<String>,

    /// HTTP control-surface port
    #[arg(long, env = "AGENT_HTTP_PORT")]
    http_port: Option<u16>,

    /// Peer (BTP) listener port
    #[arg(long, env = "AGENT_BTP_PORT")]
    btp_port: Option<u16>,

    /// Event database path (in-memory when unset)
    #[arg(long, env = "AGENT_DATABASE_PATH")]
    database_path: Option<String>,

    /// Telemetry database path
    #[arg(long, env = "AGENT_EXPLORER_DB_PATH")]
    explorer_db_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "AGENT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (json, pretty)
    #[arg(long, env = "AGENT_LOG_FORMAT", default_value = "pretty")]
    log_format: String,
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(&args.log_level, &args.log_format);

    let mut config = NodeConfig::from_env();
    if let Some(agent_id) = args.agent_id {
        config.agent_id = agent_id;
    }
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(btp_port) = args.btp_port {
        config.btp_port = btp_port;
    }
    if args.database_path.is_some() {
        config.database_path = args.database_path;
    }
    if args.explorer_db_path.is_some() {
        config.explorer_db_path = args.explorer_db_path;
    }

    if let Err(code) = run(config).await {
        std::process::exit(code);
    }
}

async fn run(config: NodeConfig) -> Result<(), i32> {
    let http_port = config.http_port;

    let node = match Node::new(config).await {
        Ok(node) => node,
        Err(err) => {
            error!(error = %err, "node construction failed");
            return Err(1);
        }
    };

    let btp_addr = match node.start_listener().await {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "peer listener failed to start");
            return Err(1);
        }
    };
    info!(%btp_addr, "peer listener ready");

    let state = AppState::new(node.clone());
    let app = create_router(state);

    let http_addr = format!("0.0.0.0:{http_port}");
    let listener = match tokio::net::TcpListener::bind(&http_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %http_addr, "HTTP bind failed");
            return Err(1);
        }
    };
    info!(addr = %http_addr, "control surface ready");

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = serve.await {
        error!(error = %err, "HTTP server failed");
        node.shutdown().await;
        return Err(1);
    }

    node.shutdown().await;
    info!("clean shutdown");
    Ok(())
}
