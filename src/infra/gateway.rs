//! HTTP client for the hosted-checkout payment gateway.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{AppError, CheckoutSession, GatewayError, PaymentGateway};

/// Configuration for the gateway client
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Gateway client speaking the hosted-checkout REST API
/// (form-encoded requests, bearer-key auth).
pub struct HttpPaymentGateway {
    http_client: Client,
    base_url: String,
    secret_key: SecretString,
    config: GatewayConfig,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorResponse {
    error: GatewayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorDetail {
    message: String,
}

impl HttpPaymentGateway {
    /// Create a new gateway client with custom configuration
    pub fn new(
        base_url: &str,
        secret_key: SecretString,
        config: GatewayConfig,
    ) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Gateway(GatewayError::Connection(e.to_string())))?;
        info!(base_url = %base_url, "Created payment gateway client");
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
            config,
        })
    }

    /// Create a new gateway client with default configuration
    pub fn with_defaults(base_url: &str, secret_key: SecretString) -> Result<Self, AppError> {
        Self::new(base_url, secret_key, GatewayConfig::default())
    }

    async fn post_session(
        &self,
        form: &[(&str, String)],
    ) -> Result<SessionResponse, AppError> {
        let response = self
            .http_client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(self.secret_key.expose_secret())
            .form(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Gateway(GatewayError::Timeout(e.to_string()))
                } else {
                    AppError::Gateway(GatewayError::Connection(e.to_string()))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<GatewayErrorResponse>()
                .await
                .map(|b| b.error.message)
                .unwrap_or_else(|_| format!("gateway returned HTTP {status}"));
            return Err(AppError::Gateway(GatewayError::SessionRejected(message)));
        }

        response
            .json::<SessionResponse>()
            .await
            .map_err(|e| AppError::Gateway(GatewayError::Request(e.to_string())))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let response = self
            .http_client
            .get(format!("{}/v1/health", self.base_url))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await
            .map_err(|e| AppError::Gateway(GatewayError::Connection(e.to_string())))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::Gateway(GatewayError::Connection(format!(
                "gateway health returned HTTP {}",
                response.status()
            ))))
        }
    }

    #[instrument(skip(self, description))]
    async fn create_checkout_session(
        &self,
        payment_id: Uuid,
        amount: i64,
        currency: &str,
        description: &str,
    ) -> Result<CheckoutSession, AppError> {
        let form = [
            ("amount", amount.to_string()),
            ("currency", currency.to_lowercase()),
            ("description", description.to_string()),
            ("client_reference_id", payment_id.to_string()),
        ];

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.post_session(&form).await {
                Ok(session) => {
                    info!(session_id = %session.id, %payment_id, "Checkout session created");
                    return Ok(CheckoutSession {
                        session_id: session.id,
                        url: session.url,
                    });
                }
                // A rejected session is final; only transport errors retry.
                Err(e @ AppError::Gateway(GatewayError::SessionRejected(_))) => return Err(e),
                Err(e) => {
                    warn!(attempt, error = ?e, "Checkout session request failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::Gateway(GatewayError::Request("Unknown error".to_string()))
        }))
    }
}
