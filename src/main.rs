use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tracing::info;

use sol_numerique::api::{RateLimitConfig, create_router_with_rate_limit};
use sol_numerique::app::{AppState, AuthTokens, WorkerConfig, spawn_worker};
use sol_numerique::infra::{
    FileReceiptStore, HttpMailer, HttpPaymentGateway, PostgresClient, observability,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sol_numerique=info,tower_http=info".into()),
        )
        .init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let jwt_secret =
        SecretString::from(env::var("JWT_SECRET").context("JWT_SECRET must be set")?);
    let webhook_secret = SecretString::from(
        env::var("GATEWAY_WEBHOOK_SECRET").context("GATEWAY_WEBHOOK_SECRET must be set")?,
    );
    let gateway_key = SecretString::from(
        env::var("GATEWAY_SECRET_KEY").context("GATEWAY_SECRET_KEY must be set")?,
    );
    let gateway_url =
        env::var("GATEWAY_BASE_URL").unwrap_or_else(|_| "https://api.gateway.example".into());
    let mailer_url =
        env::var("MAILER_API_URL").unwrap_or_else(|_| "https://api.mailer.example/send".into());
    let mailer_key = SecretString::from(env::var("MAILER_API_KEY").unwrap_or_default());
    let mail_from =
        env::var("MAIL_FROM").unwrap_or_else(|_| "Sol Numérique <no-reply@sol.example>".into());
    let receipts_dir = env::var("RECEIPTS_DIR").unwrap_or_else(|_| "./receipts".into());
    let token_ttl_secs = env::var("TOKEN_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(24 * 3600);
    let listen_addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let db = PostgresClient::with_defaults(&database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    db.run_migrations().await.context("migrations failed")?;
    let db = Arc::new(db);

    let gateway = Arc::new(
        HttpPaymentGateway::with_defaults(&gateway_url, gateway_key)
            .context("failed to create payment gateway client")?,
    );
    let mailer =
        Arc::new(HttpMailer::new(&mailer_url, mailer_key, &mail_from).context("mailer setup")?);
    let receipts = Arc::new(FileReceiptStore::new(receipts_dir));
    let tokens = Arc::new(AuthTokens::new(jwt_secret, token_ttl_secs));

    let mut state = AppState::new(db, gateway, mailer, receipts, tokens, webhook_secret);
    if let Some(handle) = observability::init_metrics_handle() {
        state = state.with_metrics(handle);
    }
    let state = Arc::new(state);

    let (worker_handle, shutdown_tx) = spawn_worker(
        Arc::clone(&state.service),
        WorkerConfig {
            poll_interval: Duration::from_secs(15),
            batch_size: 20,
            enabled: env::var("NOTIFIER_ENABLED")
                .map(|v| v != "false")
                .unwrap_or(true),
        },
    );

    let router = create_router_with_rate_limit(Arc::clone(&state), RateLimitConfig::from_env());

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(addr = %listen_addr, "Server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, shutting down worker");
    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
