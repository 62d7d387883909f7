//! Application state management.
//!
//! Shared state accessible to all request handlers via Axum's State
//! extractor.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::SecretString;

use crate::app::auth::AuthTokens;
use crate::domain::{Database, Mailer, PaymentGateway, ReceiptStore};

use super::service::AppService;

/// Shared application state for the Axum web server.
///
/// All contained types are wrapped in `Arc` and implement `Send + Sync`,
/// making `AppState` safe to share across async tasks.
#[derive(Clone)]
pub struct AppState {
    /// The application service containing business logic.
    pub service: Arc<AppService>,

    /// Database client for persistence operations.
    pub db: Arc<dyn Database>,

    /// Token issuer/verifier used by the auth middleware.
    pub tokens: Arc<AuthTokens>,

    /// Shared secret for verifying gateway webhook signatures.
    pub webhook_secret: SecretString,

    /// Prometheus recorder handle, when metrics are enabled.
    pub metrics: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    /// Wires the `AppService` to the provided clients.
    #[must_use]
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        receipts: Arc<dyn ReceiptStore>,
        tokens: Arc<AuthTokens>,
        webhook_secret: SecretString,
    ) -> Self {
        let service = Arc::new(AppService::new(
            Arc::clone(&db),
            gateway,
            mailer,
            receipts,
            Arc::clone(&tokens),
        ));

        Self {
            service,
            db,
            tokens,
            webhook_secret,
            metrics: None,
        }
    }

    /// Attach a Prometheus handle so `/metrics` can render it.
    #[must_use]
    pub fn with_metrics(mut self, handle: Arc<PrometheusHandle>) -> Self {
        self.metrics = Some(handle);
        self
    }
}
