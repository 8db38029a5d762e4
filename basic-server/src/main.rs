//! # Basic Server
//!
//! Serves the greeting endpoint and streamed background jobs over HTTP, or
//! HTTPS when a certificate and key are configured.

use anyhow::Context;
use axum::Router;
use basic_server::{
    AppState,
    infra::{
        config::Config,
        startup::{ProdStartupHooks, StartupHooks},
        tls::load_rustls_config,
    },
    routes::create_app,
};
use clap::Parser;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "basic-server")]
#[command(about = "Greeting endpoint and streamed background fan-out jobs")]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct ServeArgs {
    /// Path to TLS certificate file (PEM format)
    #[arg(long, env = "TLS_CERT_PATH")]
    cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long, env = "TLS_KEY_PATH")]
    key: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_server(cli.serve).await
}

#[derive(Debug)]
enum ServerMode {
    Https {
        addr: SocketAddr,
        cert_path: PathBuf,
        key_path: PathBuf,
    },
    Http {
        addr: SocketAddr,
    },
}

fn determine_server_mode(config: &Config, args: &ServeArgs) -> anyhow::Result<ServerMode> {
    let ip: IpAddr = config
        .server_host
        .parse()
        .with_context(|| format!("invalid SERVER_HOST {:?}", config.server_host))?;
    let addr = SocketAddr::new(ip, config.server_port);

    let cert = args.cert.clone().or_else(|| config.tls_cert_path.clone());
    let key = args.key.clone().or_else(|| config.tls_key_path.clone());

    Ok(match (cert, key) {
        (Some(cert_path), Some(key_path)) => ServerMode::Https {
            addr,
            cert_path,
            key_path,
        },
        _ => ServerMode::Http { addr },
    })
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    run_server_with_hooks(args, &ProdStartupHooks).await
}

async fn run_server_with_hooks<H>(args: ServeArgs, hooks: &H) -> anyhow::Result<()>
where
    H: StartupHooks,
{
    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server_host = host;
    }

    init_tracing();

    if config.env_file_loaded {
        info!("loaded .env file");
    }
    info!(
        services = config.background.services.len(),
        tick_interval_ms = config.background.tick_interval_ms,
        max_latency_ms = config.background.max_latency_ms,
        "background jobs configured"
    );

    let config = Arc::new(config);
    let state = AppState::from_config(Arc::clone(&config));

    let shutdown = CancellationToken::new();
    hooks.run(&state, shutdown.clone()).await?;

    let mode = determine_server_mode(&config, &args)?;
    let router: Router = create_app(state);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
                return;
            }
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    match mode {
        ServerMode::Https {
            addr,
            cert_path,
            key_path,
        } => {
            info!("TLS enabled - starting HTTPS server");
            info!("Certificate path: {:?}", cert_path);
            info!("Private key path: {:?}", key_path);
            info!("Starting basic server (HTTPS) on {}", addr);

            let rustls_config = load_rustls_config(&cert_path, &key_path).await?;

            let handle = axum_server::Handle::new();
            tokio::spawn({
                let handle = handle.clone();
                let shutdown = shutdown.clone();
                async move {
                    shutdown.cancelled().await;
                    handle.graceful_shutdown(Some(Duration::from_secs(10)));
                }
            });

            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(router.into_make_service_with_connect_info::<SocketAddr>())
                .await?;
        }
        ServerMode::Http { addr } => {
            info!("Starting basic server (HTTP) on {}", addr);
            warn!(
                "TLS is not configured. For production use, set TLS_CERT_PATH and TLS_KEY_PATH environment variables."
            );

            let listener = tokio::net::TcpListener::bind(addr).await?;
            let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
            axum::serve(listener, make_service)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;
        }
    }

    info!("server stopped");
    Ok(())
}
