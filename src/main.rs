use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use linguaflow::config::Config;
use linguaflow::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(name = "linguaflow", version, about = "Caching translation proxy")]
struct Args {
    /// Address to bind (overrides BIND_ADDR).
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Extra env file loaded before the process environment is read.
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    linguaflow::init_tracing(args.log_json);

    if let Some(path) = &args.env_file {
        dotenv::from_path(path)
            .with_context(|| format!("failed to load env file {}", path.display()))?;
    }
    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "linguaflow starting");
    let components = linguaflow::bootstrap::build(&config)
        .await
        .context("startup failed")?;

    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let app = server::router(AppState::new(components.service));
    server::serve(listener, app, shutdown).await?;

    info!("http server stopped, draining deferred tasks");
    components.scheduler.shutdown().await;
    let stats = components.scheduler.stats();
    info!(
        submitted = stats.submitted,
        completed = stats.completed,
        failed = stats.failed,
        dropped = stats.dropped,
        abandoned = stats.abandoned,
        "linguaflow stopped"
    );
    Ok(())
}

async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received"),
        _ = terminate => info!("SIGTERM received"),
    }
    shutdown.cancel();
}
