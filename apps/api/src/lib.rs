//! # Mercato API
//!
//! axum HTTP surface over the mutation gateway.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Mercato API Server                             │
//! │                                                                         │
//! │  Client ──► POST /v1/... ──► auth (JWT → Actor) ──► MutationGateway    │
//! │             Idempotency-Key        │                      │             │
//! │             X-Tenant-Id            ▼                      ▼             │
//! │             {transaction_id}   403 / 401             SQLite (WAL)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! See [`config`]; every key can be overridden with a `MERCATO_*` variable.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

pub use auth::JwtManager;
pub use config::ApiConfig;
pub use error::ApiError;
pub use routes::router;

use mercato_engine::MutationGateway;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: MutationGateway,
    pub jwt: JwtManager,
}

impl AppState {
    pub fn new(gateway: MutationGateway, config: &ApiConfig) -> Self {
        AppState {
            gateway,
            jwt: JwtManager::new(config.auth.jwt_secret.clone(), config.auth.token_lifetime_secs),
        }
    }
}
