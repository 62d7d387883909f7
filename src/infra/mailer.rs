//! HTTP client for the transactional mail provider.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{AppError, ExternalServiceError, Mailer};

/// Mail provider client posting JSON to a send endpoint.
pub struct HttpMailer {
    http_client: Client,
    api_url: String,
    api_key: SecretString,
    from: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl HttpMailer {
    pub fn new(api_url: &str, api_key: SecretString, from: &str) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::HttpError(e.to_string()))
            })?;
        info!(api_url = %api_url, "Created mailer client");
        Ok(Self {
            http_client,
            api_url: api_url.to_string(),
            api_key,
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[instrument(skip(self, body), fields(to = %to))]
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        let payload = SendRequest {
            from: &self.from,
            to,
            subject,
            text: body,
        };

        let response = self
            .http_client
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::ExternalService(ExternalServiceError::Timeout(e.to_string()))
                } else {
                    AppError::ExternalService(ExternalServiceError::HttpError(e.to_string()))
                }
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                format!("mail provider returned HTTP {}", response.status()),
            )))
        }
    }
}
