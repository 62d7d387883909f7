//! Application layer: business logic, shared state, and background work.

pub mod auth;
pub mod reports;
pub mod service;
pub mod state;
pub mod tour;
pub mod worker;

pub use auth::{AuthTokens, AuthUser};
pub use service::AppService;
pub use state::AppState;
pub use tour::TourEngine;
pub use worker::{TransferNotifier, WorkerConfig, spawn_worker};
