//! certgate access service

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use certgate_server::{
    routes, AccessStore, AppState, Config, ConsoleNotifier, InMemoryStore, Notifier, SmtpConfig,
    SmtpNotifier, SqliteStore, StripeClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "certgate_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    tracing::info!(?config, "Loaded configuration");

    if config.stripe.secret_key.is_none() {
        tracing::warn!("STRIPE_SECRET_KEY not set, checkout and verification will fail");
    }
    if config.stripe.webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set, webhooks will be rejected");
    }

    let provider = StripeClient::new(&config.stripe)?;

    // Create notifier (SMTP if configured, console otherwise)
    let notifier: Box<dyn Notifier> = match SmtpConfig::from_env() {
        Some(smtp_config) => {
            tracing::info!(host = %smtp_config.host, "Using SMTP notifier");
            Box::new(SmtpNotifier::new(smtp_config).await.map_err(anyhow::Error::msg)?)
        }
        None => {
            tracing::info!("SMTP not configured, access codes will be printed to the console");
            Box::new(ConsoleNotifier::new())
        }
    };

    match config.database_url.clone() {
        Some(url) => {
            let store = SqliteStore::connect(&url, config.db_max_connections).await?;
            tracing::info!(url = %url, "Using SQLite store");
            serve(config, store, provider, notifier).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            serve(config, InMemoryStore::new(), provider, notifier).await
        }
    }
}

async fn serve<S: AccessStore + 'static>(
    config: Config,
    store: S,
    provider: StripeClient,
    notifier: Box<dyn Notifier>,
) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);

    let state = Arc::new(AppState::new(config, store, provider, notifier));
    let app = routes::create_router(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down");
}
