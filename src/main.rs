mod auth;
mod config;
mod db;
mod fetcher;
mod routes;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::SessionKeys;
use crate::config::Config;
use crate::db::Database;
use crate::fetcher::{start_background_refresh, Fetcher, PollHandle};
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedkeeper=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; a missing signing secret aborts startup
    let config = Config::from_env()?;

    // Initialize database
    let db = Database::new(&config.database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);

    // Start background poller
    let fetcher = Arc::new(Fetcher::new(db.clone()));
    let (poller, poll_rx) = PollHandle::channel();
    let poll_interval = config.poll_interval;
    tokio::spawn(async move {
        start_background_refresh(fetcher, poll_interval, poll_rx).await;
    });

    // Create app state
    let state = Arc::new(AppState {
        db,
        sessions: SessionKeys::new(&config.jwt_secret),
        poller,
    });

    // Build router
    let app = routes::router(state).layer(tower_http::trace::TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server starting on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
