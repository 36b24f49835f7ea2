//! # mercato-engine: The Mercato Mutation Gateway
//!
//! Every state-changing request (stock import and relabel, transfers, POS
//! sales, cash sessions, day close, inventory counts) is a [`Command`]
//! executed through [`MutationGateway::execute`].
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Mercato Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/api (axum)                              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ Mutation { key, txid, command }        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ mercato-engine (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌──────────┐  ┌──────────────┐  ┌──────────┐  │   │
//! │  │   │  gateway  │─►│  scope   │─►│   services   │─►│  audit + │  │   │
//! │  │   │ idempot.  │  │ tenant/  │  │ load → core  │  │  stored  │  │   │
//! │  │   │  claim    │  │  store   │  │ → effects    │  │ response │  │   │
//! │  │   └───────────┘  └──────────┘  └──────────────┘  └──────────┘  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │          ┌─────────────────────┴─────────────────────┐                  │
//! │          ▼                                           ▼                  │
//! │  ┌───────────────────┐                     ┌───────────────────┐        │
//! │  │   mercato-core    │                     │    mercato-db     │        │
//! │  │  state machines   │                     │  UnitOfWork, repos│        │
//! │  └───────────────────┘                     └───────────────────┘        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`gateway`] - Idempotency resolution and the unit-of-work lifecycle
//! - [`command`] - The closed set of mutations and their payloads
//! - [`scope`] - Tenant and store checks
//! - [`services`] - One module per workflow entity
//! - [`queries`] - Scoped reads
//! - [`config`] - Idempotency and day-close settings
//! - [`error`] - Engine errors and their wire codes
//!
//! ## Example
//!
//! ```rust,ignore
//! use mercato_engine::{Command, EngineConfig, Mutation, MutationGateway};
//! use mercato_engine::command::OpenCashSession;
//!
//! let gateway = MutationGateway::new(db, EngineConfig::default());
//! let mutation = Mutation::from_command(
//!     Command::OpenCashSession(OpenCashSession {
//!         store_id: "s-1".into(),
//!         opening_amount: Money::from_cents(10_000),
//!     }),
//!     "9b2f6c1e-key",
//!     "tx-0001",
//! )?;
//! let outcome = gateway.execute(&actor, mutation).await?;
//! assert_eq!(outcome.status, 201);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod command;
pub mod config;
pub mod error;
pub mod gateway;
pub mod queries;
pub mod scope;
pub mod services;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use command::{Command, CountLifecycle, MUTATION_METHOD};
pub use config::{DayCloseSettings, EngineConfig, IdempotencySettings};
pub use error::{EngineError, EngineResult, ErrorBody, ScopeViolation};
pub use gateway::{Mutation, MutationGateway, MutationOutcome};
