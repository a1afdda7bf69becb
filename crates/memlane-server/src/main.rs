mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use memlane_api::auth::PasswordPolicy;
use memlane_api::media::MediaStore;
use memlane_api::router::router;
use memlane_api::state::{AppState, AppStateInner};
use memlane_api::tokens::TokenKeys;
use memlane_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "memlane=debug,memlane_api=debug,memlane_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Init database and uploads directory
    let db = Database::open(&config.db_path)?;
    let media = MediaStore::new(config.uploads_dir.clone()).await?;

    let state: AppState = Arc::new(AppStateInner {
        db,
        media,
        tokens: TokenKeys::new(&config.jwt_secret, config.session_ttl, config.share_ttl),
        passwords: PasswordPolicy::new(config.hash_cost)?,
    });

    let app = router(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Memlane server listening on {}", addr);
    info!(
        "Sessions last {} hours, share links {} hours",
        config.session_ttl.num_hours(),
        config.share_ttl.num_hours()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and its clones of the state) is gone once serve returns
    match Arc::try_unwrap(state) {
        Ok(inner) => inner.db.close()?,
        Err(_) => warn!("State still shared at shutdown; database closes on drop"),
    }

    info!("Shutdown complete");
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
                error!("Failed to install SIGTERM handler: {}", e);
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
