//! # Error Types
//!
//! Domain-specific error types for mercato-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  mercato-core errors (this file)                                       │
//! │  ├── CoreError        - State machine and business rule rejections     │
//! │  ├── ReasonCode       - Machine-readable code carried by every reject  │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  mercato-db errors                                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  mercato-engine errors                                                 │
//! │  └── EngineError      - Idempotency, scope, invariants, wraps above    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → ApiError → client   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Rejections name the exact (state, action) pair, never the "closest" legal one
//! 2. Every rejection carries a [`ReasonCode`]
//! 3. Errors are enum variants, never bare strings

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use ts_rs::TS;

use crate::types::EntityType;

// =============================================================================
// Reason Codes
// =============================================================================

/// Machine-readable reason attached to every business rejection.
///
/// Serialized as `SCREAMING_SNAKE_CASE` in the `reason_code` field of
/// 422 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    InvalidStateTransition,
    InvalidInput,
    SameStore,
    DuplicateUnit,
    ExceedsOutstanding,
    ExceedsShortage,
    UnknownLine,
    EmptyLines,
    InsufficientPayment,
    ChangeRequiresCash,
    CashSessionRequired,
    SessionAlreadyOpen,
    NegativeCash,
    InsufficientStock,
    UnitNotAvailable,
    ReturnWindowElapsed,
    ReceiptRequired,
    ConditionNotAccepted,
    RefundMethodNotAllowed,
    ExceedsReturnable,
    ElevatedRoleRequired,
    DayAlreadyClosed,
    BusinessDateInFuture,
    OpenSessionsRemain,
    ReasonRequired,
    StoreLocked,
}

impl ReasonCode {
    /// Returns the wire representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ReasonCode::InvalidInput => "INVALID_INPUT",
            ReasonCode::SameStore => "SAME_STORE",
            ReasonCode::DuplicateUnit => "DUPLICATE_UNIT",
            ReasonCode::ExceedsOutstanding => "EXCEEDS_OUTSTANDING",
            ReasonCode::ExceedsShortage => "EXCEEDS_SHORTAGE",
            ReasonCode::UnknownLine => "UNKNOWN_LINE",
            ReasonCode::EmptyLines => "EMPTY_LINES",
            ReasonCode::InsufficientPayment => "INSUFFICIENT_PAYMENT",
            ReasonCode::ChangeRequiresCash => "CHANGE_REQUIRES_CASH",
            ReasonCode::CashSessionRequired => "CASH_SESSION_REQUIRED",
            ReasonCode::SessionAlreadyOpen => "SESSION_ALREADY_OPEN",
            ReasonCode::NegativeCash => "NEGATIVE_CASH",
            ReasonCode::InsufficientStock => "INSUFFICIENT_STOCK",
            ReasonCode::UnitNotAvailable => "UNIT_NOT_AVAILABLE",
            ReasonCode::ReturnWindowElapsed => "RETURN_WINDOW_ELAPSED",
            ReasonCode::ReceiptRequired => "RECEIPT_REQUIRED",
            ReasonCode::ConditionNotAccepted => "CONDITION_NOT_ACCEPTED",
            ReasonCode::RefundMethodNotAllowed => "REFUND_METHOD_NOT_ALLOWED",
            ReasonCode::ExceedsReturnable => "EXCEEDS_RETURNABLE",
            ReasonCode::ElevatedRoleRequired => "ELEVATED_ROLE_REQUIRED",
            ReasonCode::DayAlreadyClosed => "DAY_ALREADY_CLOSED",
            ReasonCode::BusinessDateInFuture => "BUSINESS_DATE_IN_FUTURE",
            ReasonCode::OpenSessionsRemain => "OPEN_SESSIONS_REMAIN",
            ReasonCode::ReasonRequired => "REASON_REQUIRED",
            ReasonCode::StoreLocked => "STORE_LOCKED",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These are caller logic errors: the request was well-formed transport-wise
/// but the entity's state machine or a business rule refuses it. They are
/// surfaced as 422 with a reason code and are never retried server-side.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The action is not in the allowed-from-state set for this entity.
    ///
    /// ## When This Occurs
    /// - Receiving a transfer that was never dispatched
    /// - Cancelling a sale after checkout
    /// - Any cash movement on a CLOSED session
    #[error("{entity} in state {state} cannot perform {action}")]
    InvalidTransition {
        entity: EntityType,
        state: String,
        action: String,
    },

    /// A business rule rejected the request.
    #[error("{message}")]
    Rule { reason: ReasonCode, message: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a rule rejection.
    pub fn rule(reason: ReasonCode, message: impl Into<String>) -> Self {
        CoreError::Rule {
            reason,
            message: message.into(),
        }
    }

    /// Creates a state transition rejection.
    pub fn invalid_transition(
        entity: EntityType,
        state: impl fmt::Display,
        action: impl fmt::Display,
    ) -> Self {
        CoreError::InvalidTransition {
            entity,
            state: state.to_string(),
            action: action.to_string(),
        }
    }

    /// Returns the machine-readable reason code.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            CoreError::InvalidTransition { .. } => ReasonCode::InvalidStateTransition,
            CoreError::Rule { reason, .. } => *reason,
            CoreError::Validation(_) => ReasonCode::InvalidInput,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised at the boundary, before any state machine runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid EPC, invalid date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value inside one request.
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::Required`].
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Shorthand for [`ValidationError::MustBePositive`].
    pub fn must_be_positive(field: impl Into<String>) -> Self {
        ValidationError::MustBePositive {
            field: field.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
