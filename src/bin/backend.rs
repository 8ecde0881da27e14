#![forbid(unsafe_code)]

//! SocialTube API server.
//!
//! Opens the libsql store, wires every component into a [`Platform`] and
//! serves the JSON API plus locally stored media until Ctrl+C.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::Duration;
use clap::Parser;
use socialtube::{
    blob::LocalBlobStorage,
    config::{ServerOverrides, resolve_server_config},
    http::{AppState, router},
    platform::Platform,
    security::{SessionKeys, ensure_not_root},
    store::Store,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command line overrides. Anything not given here comes from the
/// environment, then the env file, then the built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "backend", version, about)]
struct BackendArgs {
    /// Path of the libsql database file [env: DATABASE_PATH]
    #[arg(long = "database")]
    database_path: Option<PathBuf>,

    /// Directory holding uploaded media [env: MEDIA_ROOT]
    #[arg(long)]
    media_root: Option<PathBuf>,

    /// Listen address [env: SOCIALTUBE_HOST]
    #[arg(long)]
    host: Option<String>,

    /// Listen port [env: SOCIALTUBE_PORT]
    #[arg(long)]
    port: Option<u16>,

    /// Env file read for values missing from the process environment
    #[arg(long = "env-file")]
    env_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = BackendArgs::parse();
    ensure_not_root("backend")?;

    let config = resolve_server_config(ServerOverrides {
        database_path: args.database_path,
        media_root: args.media_root,
        host: args.host,
        port: args.port,
        env_path: args.env_path,
    })?;
    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("expected an IPv4 or IPv6 address, got {}", config.host))?;

    let store = Store::open(&config.database_path)
        .await
        .context("initializing store")?;
    let media = LocalBlobStorage::new(&config.media_root, &config.public_media_prefix)?;
    let keys = SessionKeys::new(
        &config.session_secret,
        Duration::seconds(config.access_token_ttl_secs),
        Duration::seconds(config.refresh_token_ttl_secs),
    );
    let platform = Platform::new(store.clone(), Arc::new(media.clone()), keys);
    info!(
        database = %store.path().display(),
        media_root = %media.root().display(),
        "storage ready"
    );

    let app = router(AppState::new(platform, media), config.upload_limit_bytes);

    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("API server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    store.close().await.context("closing store")?;
    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on the handler; Ctrl+C still ends the
    // process without it.
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}
