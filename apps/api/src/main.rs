//! # Harvest POS API
//!
//! HTTP server for the Harvest POS web frontend.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          API Server                                     │
//! │                                                                         │
//! │  Browser ───► HTTP (8080) ───► Handlers ───► SQLite                    │
//! │                                    │                                    │
//! │                          ┌─────────┴─────────┐                          │
//! │                          ▼                   ▼                          │
//! │                    Yoco checkout         Mail API                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use harvest_api::config::ApiConfig;
use harvest_api::services::{HttpMailer, LogMailer, Mailer, YocoClient};
use harvest_api::{build_router, AppState};
use harvest_core::{NewUserRole, Role};
use harvest_db::{Database, DbConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiConfig::load().context("loading configuration")?;
    init_tracing(&config);

    info!("Starting Harvest POS API...");
    info!(
        port = config.server.port,
        db_path = %config.database.path,
        environment = %config.server.environment,
        "Configuration loaded"
    );

    let db = Database::new(
        DbConfig::new(&config.database.path).max_connections(config.database.max_connections),
    )
    .await
    .context("opening database")?;
    info!("Database ready, migrations applied");

    if let Some(user_id) = config.auth.bootstrap_admin.as_deref() {
        bootstrap_admin(&db, user_id).await?;
    }

    let payments =
        Arc::new(YocoClient::new(config.yoco.clone()).context("building payment client")?);
    if config.yoco.secret_key.is_none() {
        warn!("Yoco secret key not set; online payments will be rejected");
    }

    let mailer: Arc<dyn Mailer> = match (&config.mail.api_url, &config.mail.api_key) {
        (Some(url), Some(key)) => Arc::new(
            HttpMailer::new(url.clone(), key.clone(), &config.mail)
                .context("building mail client")?,
        ),
        _ => {
            warn!("Mail API not configured; emails will only be logged");
            Arc::new(LogMailer)
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parsing listen address")?;

    let state = AppState::new(db.clone(), config, payments, mailer);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(config: &ApiConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

/// Grants `admin` to the configured user when nobody holds it yet.
async fn bootstrap_admin(db: &Database, user_id: &str) -> anyhow::Result<()> {
    if db.roles().admin_count().await? > 0 {
        return Ok(());
    }

    db.roles()
        .assign(&NewUserRole {
            user_id: user_id.to_string(),
            role: Role::Admin,
        })
        .await
        .context("granting bootstrap admin")?;
    info!(%user_id, "Bootstrap admin granted");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
