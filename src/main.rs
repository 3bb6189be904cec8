use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod auth;
mod config;
mod db;
mod error;
mod model;
mod service;

use api::AppState;
use config::AppConfig;
use db::DBLayer;
use service::user::LogResetNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------
    // Config + logging
    // -----------------------------
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    // -----------------------------
    // Shared state / Dependencies
    // -----------------------------
    let db = Arc::new(
        DBLayer::new(&config.db_path)
            .with_context(|| format!("failed to open database at {}", config.db_path))?,
    );
    let state = AppState::new(db, &config, Arc::new(LogResetNotifier));

    if let Some(seed) = &config.admin {
        state
            .users
            .ensure_admin(seed)
            .await
            .context("failed to create admin account")?;
    }

    // -----------------------------
    // Routers
    // -----------------------------
    let app = api::app(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, db = %config.db_path, "device registry listening");
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
