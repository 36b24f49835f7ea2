//! # mercato-core: Pure Business Logic for Mercato
//!
//! Entity state machines, money, validation and request fingerprints.
//! Nothing in this crate touches a database, a socket or a clock; every
//! timestamp a transition needs is passed in.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Mercato Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/api (axum)                              │   │
//! │  │    Authorization ─► Idempotency-Key ─► Command ─► Envelope      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            mercato-engine (MutationGateway)                     │   │
//! │  │    idempotency ─► scope ─► service ─► audit ─► response         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ mercato-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐ ┌───────────┐ ┌───────────┐ ┌──────────────┐   │   │
//! │  │   │ machines  │ │   money   │ │  policy   │ │ fingerprint  │   │   │
//! │  │   │ transfer  │ │   Money   │ │  Return   │ │  sha256 of   │   │   │
//! │  │   │ sale, ... │ │           │ │  Policy   │ │  normalized  │   │   │
//! │  │   └───────────┘ └───────────┘ └───────────┘ └──────────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    mercato-db (SQLite)                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`machines`] - Transfer, PosSale, PosCashSession, PosCashDayClose, InventoryCount
//! - [`types`] - Actors, scopes, stock selectors and ledger operations
//! - [`money`] - Integer-cent money
//! - [`policy`] - Per-tenant return policy
//! - [`fingerprint`] - Idempotency request fingerprints
//! - [`validation`] - Boundary validation
//! - [`error`] - Domain errors and reason codes
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use mercato_core::machines::cash_session::{self, MovementKind, OpenSession};
//! use mercato_core::Money;
//!
//! let session = cash_session::open(OpenSession {
//!     id: "cs-1".into(),
//!     tenant_id: "t-1".into(),
//!     store_id: "s-1".into(),
//!     cashier_id: "u-1".into(),
//!     opening_amount: Money::from_cents(10_000),
//!     business_date: Utc::now().date_naive(),
//!     now: Utc::now(),
//! })
//! .unwrap();
//!
//! let t = cash_session::apply_movement(&session, MovementKind::CashIn, Money::from_cents(2_500))
//!     .unwrap();
//! assert_eq!(t.after.expected_cash.cents(), 12_500);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fingerprint;
pub mod machines;
pub mod money;
pub mod policy;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ReasonCode, ValidationError};
pub use machines::{CashEffect, Effect, StateMachine, Transition};
pub use money::Money;
pub use policy::{EpcReturnMode, ReturnPolicy};
pub use types::*;
