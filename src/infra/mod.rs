//! Infrastructure layer implementations.

pub mod database;
pub mod gateway;
pub mod mailer;
pub mod observability;
pub mod storage;

pub use database::{PostgresClient, PostgresConfig};
pub use gateway::{GatewayConfig, HttpPaymentGateway};
pub use mailer::HttpMailer;
pub use storage::FileReceiptStore;
