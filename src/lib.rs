//! Sol Numérique
//!
//! Backend for rotating savings groups (sols/tontines): members pool a
//! fixed contribution each round, and every round pays the whole pot out
//! to one member until the rotation completes.
//!
//! # Architecture Overview
//!
//! This crate is organized into four main layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   API Layer                  │
//! │  HTTP handlers, routing, request validation  │
//! ├─────────────────────────────────────────────┤
//! │               Application Layer              │
//! │  Business logic, tour engine, notifications  │
//! ├─────────────────────────────────────────────┤
//! │                 Domain Layer                 │
//! │   Traits, types, errors (no dependencies)    │
//! ├─────────────────────────────────────────────┤
//! │             Infrastructure Layer             │
//! │  Postgres, payment gateway, mail, storage    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! All external dependencies sit behind domain traits, so the business
//! logic (including the round-advance compare-and-swap) is exercised
//! against in-memory mocks in unit tests and against Postgres in
//! deployment.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sol_numerique::api::create_router;
//! use sol_numerique::app::{AppState, AuthTokens};
//! use sol_numerique::infra::{FileReceiptStore, HttpMailer, HttpPaymentGateway, PostgresClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db = Arc::new(PostgresClient::with_defaults(&database_url).await?);
//!     let gateway = Arc::new(HttpPaymentGateway::with_defaults(&gateway_url, secret_key)?);
//!
//!     let state = Arc::new(AppState::new(db, gateway, mailer, receipts, tokens, webhook_secret));
//!     let router = create_router(state);
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

pub mod test_utils;
