use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rtmp_hls::config::AppConfig;
use rtmp_hls::http::{self, AppState};
use rtmp_hls::logging::{LogBuffer, LogBufferLayer};
use rtmp_hls::segmenter::HlsSegmenterFactory;
use rtmp_hls::stats::ResourceMonitor;
use rtmp_hls::transport::RtmpTransportFactory;
use rtmp_hls::{Acceptor, Error, Result, ServerConfig, StreamRegistry};

/// RTMP ingest server republishing streams as HLS
#[derive(Debug, Parser)]
#[command(name = "rtmp-hls", version, about)]
struct Cli {
    /// Configuration file (defaults to config.json next to the executable)
    #[arg(long)]
    config: Option<PathBuf>,

    /// RTMP listen port
    #[arg(long)]
    rtmp_port: Option<u16>,

    /// HTTP listen port
    #[arg(long)]
    http_port: Option<u16>,

    /// Write the effective ports back to the configuration file
    #[arg(long)]
    save: bool,

    /// Start an audio-only output for publishes without video
    #[arg(long)]
    audio_only: bool,

    /// Serve HTTP over TLS
    #[arg(long)]
    ssl: bool,

    /// PEM certificate chain for HTTPS
    #[arg(long)]
    ssl_cert: Option<String>,

    /// PEM private key for HTTPS
    #[arg(long)]
    ssl_key: Option<String>,

    /// Public host name shown in playback URLs
    #[arg(long)]
    ssl_domain: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logs = Arc::new(LogBuffer::new());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(LogBufferLayer::new(Arc::clone(&logs)))
        .init();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut app_config = AppConfig::load(&config_path);
    if let Some(port) = cli.rtmp_port {
        app_config.rtmp_port = port.to_string();
    }
    if let Some(port) = cli.http_port {
        app_config.http_port = port.to_string();
    }
    if cli.ssl {
        app_config.ssl_enabled = true;
    }
    if let Some(cert) = cli.ssl_cert {
        app_config.ssl_cert = cert;
    }
    if let Some(key) = cli.ssl_key {
        app_config.ssl_key = key;
    }
    if let Some(domain) = cli.ssl_domain {
        app_config.ssl_domain = domain;
    }
    if cli.save {
        app_config.save(&config_path)?;
        tracing::info!(path = %config_path.display(), "Configuration saved");
    }

    let rtmp_port = parse_port("rtmp_port", &app_config.rtmp_port)?;
    let http_port = parse_port("http_port", &app_config.http_port)?;
    let tls_config = if app_config.ssl_enabled {
        Some(http::tls::server_config(
            Path::new(&app_config.ssl_cert),
            Path::new(&app_config.ssl_key),
        )?)
    } else {
        None
    };

    let registry = Arc::new(StreamRegistry::new());
    let monitor = Arc::new(ResourceMonitor::new());

    let server_config = ServerConfig::with_addr(SocketAddr::from(([0, 0, 0, 0], rtmp_port)))
        .audio_only_output(cli.audio_only);
    let acceptor = Acceptor::new(
        server_config,
        RtmpTransportFactory,
        Arc::new(HlsSegmenterFactory::new()),
        Arc::clone(&registry),
        Arc::clone(&monitor),
    );
    acceptor.start().await?;

    let http_addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = tokio::net::TcpListener::bind(http_addr).await?;

    let app = http::router(AppState::new(Arc::clone(&registry), logs, monitor));
    let cancel = CancellationToken::new();
    let http_cancel = cancel.clone();
    let http_task = match tls_config {
        Some(tls_config) => {
            tracing::info!(addr = %http_addr, "HTTPS server listening (SSL enabled)");
            tokio::spawn(async move {
                http::tls::serve(listener, app, tls_config, http_cancel).await;
                Ok::<(), io::Error>(())
            })
        }
        None => {
            tracing::info!(addr = %http_addr, "HTTP server listening");
            tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { http_cancel.cancelled().await })
                    .await
            })
        }
    };
    let scheme = if app_config.ssl_enabled { "https" } else { "http" };
    tracing::info!(
        "Playback URL: {}://{}/live/<stream-key>/index.m3u8",
        scheme,
        app_config.display_host()
    );

    shutdown_signal().await;
    cancel.cancel();

    acceptor.stop().await;
    match http_task.await {
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
        Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
        Ok(Ok(())) => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn parse_port(name: &str, value: &str) -> Result<u16> {
    value.parse().map_err(|_| {
        Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a valid port: {:?}", name, value),
        ))
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
