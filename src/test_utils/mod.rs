//! Shared test doubles and wiring helpers.

pub mod mocks;

pub use mocks::{MockDatabase, MockMailer, MockPaymentGateway, MockReceiptStore, SentMail};

use std::sync::Arc;

use secrecy::SecretString;

use crate::app::{AppService, AppState, AuthTokens};

/// Signing secret used by test tokens.
pub const TEST_JWT_SECRET: &str = "test-jwt-secret";
/// Webhook secret shared by test signers and verifiers.
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

/// A service wired entirely to mocks, plus handles on those mocks.
pub fn test_service() -> (
    AppService,
    Arc<MockDatabase>,
    Arc<MockPaymentGateway>,
    Arc<MockMailer>,
    Arc<MockReceiptStore>,
) {
    let db = Arc::new(MockDatabase::new());
    let gateway = Arc::new(MockPaymentGateway::new());
    let mailer = Arc::new(MockMailer::new());
    let receipts = Arc::new(MockReceiptStore::new());
    let tokens = Arc::new(AuthTokens::new(
        SecretString::from(TEST_JWT_SECRET.to_string()),
        3600,
    ));

    let service = AppService::new(
        Arc::clone(&db) as Arc<dyn crate::domain::Database>,
        Arc::clone(&gateway) as Arc<dyn crate::domain::PaymentGateway>,
        Arc::clone(&mailer) as Arc<dyn crate::domain::Mailer>,
        Arc::clone(&receipts) as Arc<dyn crate::domain::ReceiptStore>,
        tokens,
    );

    (service, db, gateway, mailer, receipts)
}

/// Full application state wired to mocks, for router-level tests.
pub fn test_state() -> AppState {
    test_state_with_mocks().0
}

/// Like [`test_state`], but also hands back the mocks so tests can
/// promote admins, inspect checkout sessions, or read sent mail.
pub fn test_state_with_mocks() -> (
    AppState,
    Arc<MockDatabase>,
    Arc<MockPaymentGateway>,
    Arc<MockMailer>,
    Arc<MockReceiptStore>,
) {
    let db = Arc::new(MockDatabase::new());
    let gateway = Arc::new(MockPaymentGateway::new());
    let mailer = Arc::new(MockMailer::new());
    let receipts = Arc::new(MockReceiptStore::new());
    let tokens = Arc::new(AuthTokens::new(
        SecretString::from(TEST_JWT_SECRET.to_string()),
        3600,
    ));

    let state = AppState::new(
        Arc::clone(&db) as Arc<dyn crate::domain::Database>,
        Arc::clone(&gateway) as Arc<dyn crate::domain::PaymentGateway>,
        Arc::clone(&mailer) as Arc<dyn crate::domain::Mailer>,
        Arc::clone(&receipts) as Arc<dyn crate::domain::ReceiptStore>,
        tokens,
        SecretString::from(TEST_WEBHOOK_SECRET.to_string()),
    );

    (state, db, gateway, mailer, receipts)
}
