mod auth;
mod config;
mod error;
mod http;
mod state;
mod ws;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use concord_metrics::gateway::GatewayMetrics;
use concord_metrics::{MetricsConfig, MetricsServer};
use concord_voice::ice::TurnSettings;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use crate::auth::{BearerAuth, DevBearerAuth, SharedSecretBearerAuth};
use crate::config::Config;
use crate::http::HttpSurface;
use crate::state::GatewayState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::parse();

    let ms = MetricsServer::install(MetricsConfig { listen: cfg.metrics_listen.clone(), namespace: "concord" })?;
    tokio::spawn(async move {
        let _ = ms.serve().await;
    });

    let gateway_metrics = Arc::new(GatewayMetrics::new("concord"));
    let state = GatewayState::new();

    let auth: Arc<dyn BearerAuth> = match cfg.dev_token.clone() {
        Some(token) => Arc::new(DevBearerAuth::new(token)),
        None => Arc::new(SharedSecretBearerAuth::new(cfg.shared_secret.clone())),
    };

    let turn = TurnSettings {
        host: cfg.turn_host.clone(),
        udp_port: cfg.turn_udp_port,
        tcp_port: cfg.turn_tcp_port,
        tls_port: cfg.turn_tls_port,
        shared_secret: cfg.shared_secret.clone(),
        ttl_seconds: cfg.turn_ttl_seconds,
        ..TurnSettings::default()
    };

    let http_surface = HttpSurface::new(state.clone(), turn, gateway_metrics.clone());
    let http_listen = cfg.http_listen.clone();
    tokio::spawn(async move {
        if let Err(e) = http_surface.serve(&http_listen).await {
            tracing::error!("http surface exited: {e}");
        }
    });

    let listener = TcpListener::bind(&cfg.listen).await?;
    info!("signalling listening on {}", cfg.listen);

    tokio::select! {
        r = accept_loop(listener, state, auth, gateway_metrics) => r?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown");
        }
    }

    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<GatewayState>,
    auth: Arc<dyn BearerAuth>,
    metrics: Arc<GatewayMetrics>,
) -> Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let state = state.clone();
        let auth = auth.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            tracing::debug!(%peer_addr, "accepted connection");
            ws::handle_connection(stream, state, auth, metrics).await;
        });
    }
}
