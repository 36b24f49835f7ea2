//! # Engine Errors
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  EngineError                    code                             HTTP   │
//! │  ───────────                    ────                             ────   │
//! │  IdempotencyKeyReused           IDEMPOTENCY_KEY_REUSED_WITH_...  409    │
//! │  IdempotencyInProgress          IDEMPOTENCY_REQUEST_IN_PROGRESS  409    │
//! │  Core (state / rule / input)    VALIDATION_ERROR + reason_code   422    │
//! │  Scope                          CROSS_TENANT_ACCESS_DENIED       403    │
//! │                                 STORE_SCOPE_MISMATCH             403    │
//! │  NotFound                       NOT_FOUND                        404    │
//! │  InvariantViolation, Db, ...    INTERNAL_ERROR                   500    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The same [`ErrorBody`] is what a client receives and what the
//! idempotency ledger stores when rejections are kept for replay.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mercato_core::{CoreError, ReasonCode, ValidationError};
use mercato_db::DbError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Tenant or store scope check failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeViolation {
    #[error("tenant {tenant_id} does not own {resource}")]
    CrossTenant { tenant_id: String, resource: String },

    #[error("actor is not permitted on store {store_id}")]
    StoreMismatch { store_id: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Scope(#[from] ScopeViolation),

    #[error("idempotency key reused with different payload")]
    IdempotencyKeyReused,

    #[error("request already being processed")]
    IdempotencyInProgress,

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("stock invariant violated: {0}")]
    InvariantViolation(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("mutation task aborted: {0}")]
    TaskAborted(String),

    #[error(transparent)]
    Db(DbError),
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Rejected(core) => EngineError::Core(core),
            DbError::InvariantViolation(msg) => EngineError::InvariantViolation(msg),
            DbError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::Db(other),
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Core(err.into())
    }
}

impl EngineError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::IdempotencyKeyReused => "IDEMPOTENCY_KEY_REUSED_WITH_DIFFERENT_PAYLOAD",
            EngineError::IdempotencyInProgress => "IDEMPOTENCY_REQUEST_IN_PROGRESS",
            EngineError::Core(_) => "VALIDATION_ERROR",
            EngineError::Scope(ScopeViolation::CrossTenant { .. }) => "CROSS_TENANT_ACCESS_DENIED",
            EngineError::Scope(ScopeViolation::StoreMismatch { .. }) => "STORE_SCOPE_MISMATCH",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::InvariantViolation(_)
            | EngineError::Serialization(_)
            | EngineError::TaskAborted(_)
            | EngineError::Db(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::IdempotencyKeyReused | EngineError::IdempotencyInProgress => 409,
            EngineError::Core(_) => 422,
            EngineError::Scope(_) => 403,
            EngineError::NotFound { .. } => 404,
            EngineError::InvariantViolation(_)
            | EngineError::Serialization(_)
            | EngineError::TaskAborted(_)
            | EngineError::Db(_) => 500,
        }
    }

    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            EngineError::Core(err) => Some(err.reason_code()),
            _ => None,
        }
    }

    /// A deterministic 422: the same request would be rejected the same way.
    pub fn is_business_rejection(&self) -> bool {
        matches!(self, EngineError::Core(_))
    }

    pub fn is_internal(&self) -> bool {
        self.http_status() >= 500
    }

    /// Client-facing body. Internal failures never leak their message.
    pub fn body(&self, trace_id: &str) -> ErrorBody {
        let message = if self.is_internal() {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        ErrorBody {
            code: self.code().to_string(),
            message,
            reason_code: self.reason_code(),
            trace_id: trace_id.to_string(),
        }
    }
}

/// Serialized error: `{code, message, reason_code?, trace_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    pub trace_id: String,
}
