mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use vanish_api::auth::{AppState, AppStateInner};
use vanish_core::{ContentService, DeletePolicy, ServiceConfig, Storage, sweeper};
use vanish_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vanish=debug,vanish_api=debug,vanish_core=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init DB and storage
    let db = Arc::new(Database::open(&config.db_path)?);
    let storage = Arc::new(Storage::new(config.storage_dir.clone()).await?);

    let service = ContentService::new(
        db.clone(),
        storage,
        ServiceConfig {
            share_base: config.public_url.clone(),
            delete_policy: if config.allow_anonymous_delete {
                DeletePolicy::AllowAnonymous
            } else {
                DeletePolicy::OwnerOnly
            },
        },
    );

    // A previous process may have died mid-transfer
    if let Err(e) = service.recover_delivery_claims().await {
        warn!("Could not release stale delivery claims: {}", e);
    }

    tokio::spawn(sweeper::run_sweep_loop(
        service.clone(),
        config.sweep_interval_secs,
    ));

    let state: AppState = Arc::new(AppStateInner {
        service,
        db,
        jwt_secret: config.jwt_secret.clone(),
    });

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(false);

    let app = vanish_api::router(state, config.max_upload_bytes)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Vanish listening on {}", addr);
    info!(
        "Sweeping every {}s, uploads up to {} MB, share links under {}",
        config.sweep_interval_secs,
        config.max_upload_bytes / (1024 * 1024),
        config.public_url
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
