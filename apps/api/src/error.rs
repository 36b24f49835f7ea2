//! HTTP error mapping.
//!
//! Every error renders as `{code, message, reason_code?, trace_id}` with the
//! status the engine assigns; failures raised before the engine runs
//! (authentication, header and body checks) are mapped here.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;
use uuid::Uuid;

use mercato_core::ReasonCode;
use mercato_engine::{EngineError, ErrorBody};

use crate::routes::TRACE_HEADER;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("tenant header {header} does not match the authenticated tenant")]
    TenantMismatch { header: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{source}")]
    Engine {
        #[source]
        source: EngineError,
        trace_id: String,
    },

    /// A pre-engine failure tagged with the request's trace id.
    #[error("{source}")]
    Traced {
        #[source]
        source: Box<ApiError>,
        trace_id: String,
    },
}

impl ApiError {
    pub fn engine(source: EngineError, trace_id: impl Into<String>) -> Self {
        ApiError::Engine {
            source,
            trace_id: trace_id.into(),
        }
    }

    /// Attaches `trace_id` unless the error already carries one.
    pub fn traced(self, trace_id: &str) -> Self {
        match self {
            ApiError::Engine { .. } | ApiError::Traced { .. } => self,
            other => ApiError::Traced {
                source: Box::new(other),
                trace_id: trace_id.to_string(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Traced { source, .. } => source.status(),
            ApiError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            ApiError::TenantMismatch { .. } => StatusCode::FORBIDDEN,
            ApiError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Engine { source, .. } => {
                StatusCode::from_u16(source.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            ApiError::Engine { source, trace_id } => source.body(trace_id),
            ApiError::Traced { source, trace_id } => ErrorBody {
                trace_id: trace_id.clone(),
                ..source.body()
            },
            other => {
                let (code, reason_code) = match other {
                    ApiError::AuthFailed(_) => ("UNAUTHENTICATED", None),
                    ApiError::TenantMismatch { .. } => ("CROSS_TENANT_ACCESS_DENIED", None),
                    ApiError::InvalidRequest(_) => ("VALIDATION_ERROR", Some(ReasonCode::InvalidInput)),
                    _ => ("NOT_FOUND", None),
                };
                ErrorBody {
                    code: code.to_string(),
                    message: other.to_string(),
                    reason_code,
                    trace_id: Uuid::new_v4().to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = self.body();
        let trace = HeaderValue::from_str(&body.trace_id).ok();
        let mut response = (status, Json(body)).into_response();
        if let Some(trace) = trace {
            response.headers_mut().insert(TRACE_HEADER, trace);
        }
        response
    }
}
