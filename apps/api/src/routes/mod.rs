//! HTTP routes.
//!
//! Every mutation is a POST whose path names the entity; the path ids are
//! merged into the JSON body before it is read as a [`mercato_engine::Command`].

pub mod mutations;
pub mod queries;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use uuid::Uuid;

use mercato_core::Actor;

use crate::error::ApiError;
use crate::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const TENANT_HEADER: &str = "x-tenant-id";
pub const TRACE_HEADER: &str = "x-trace-id";
pub const REPLAY_HEADER: &str = "x-idempotency-result";
pub const REPLAY_VALUE: &str = "IDEMPOTENCY_REPLAY";

pub fn router(state: AppState) -> Router {
    use mutations::*;

    Router::new()
        .route("/health", get(queries::health))
        .route("/v1/stock/levels", get(queries::stock_levels))
        .route("/v1/stock/import", post(import_stock))
        .route("/v1/stock/migrate", post(migrate_stock))
        .route("/v1/transfers", post(create_transfer))
        .route("/v1/transfers/{id}/dispatch", post(dispatch_transfer))
        .route("/v1/transfers/{id}/receive", post(receive_transfer))
        .route("/v1/transfers/{id}/shortages", post(report_shortages))
        .route("/v1/transfers/{id}/shortages/resolve", post(resolve_shortages))
        .route("/v1/transfers/{id}/cancel", post(cancel_transfer))
        .route("/v1/sales", post(create_sale))
        .route("/v1/sales/{id}/lines", post(add_sale_line))
        .route("/v1/sales/{id}/lines/{line_id}/remove", post(remove_sale_line))
        .route("/v1/sales/{id}/checkout", post(checkout_sale))
        .route("/v1/sales/{id}/cancel", post(cancel_sale))
        .route("/v1/sales/{id}/refund", post(refund_sale))
        .route("/v1/sales/{id}/exchange", post(exchange_sale))
        .route("/v1/cash/sessions", post(open_cash_session))
        .route("/v1/cash/sessions/{id}/cash-in", post(cash_in))
        .route("/v1/cash/sessions/{id}/cash-out", post(cash_out))
        .route("/v1/cash/sessions/{id}/close", post(close_cash_session))
        .route("/v1/cash/day-close", post(close_day))
        .route("/v1/inventory-counts", post(create_count))
        .route("/v1/inventory-counts/{id}/scans", post(scan_count))
        .route("/v1/inventory-counts/{id}/reconcile", post(reconcile_count))
        .route("/v1/inventory-counts/{id}/{action}", post(transition_count))
        .with_state(state)
}

/// The caller's `X-Trace-Id`, or a fresh one.
pub(crate) fn trace_id(headers: &HeaderMap) -> String {
    header(headers, TRACE_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Bearer identity, then the `X-Tenant-Id` header, which must name the
/// token's tenant.
pub(crate) fn identify(state: &AppState, headers: &HeaderMap) -> Result<Actor, ApiError> {
    let actor = state.jwt.authenticate(headers)?;

    let tenant = header(headers, TENANT_HEADER)
        .ok_or_else(|| ApiError::InvalidRequest("X-Tenant-Id header is required".to_string()))?;
    if tenant != actor.tenant_id {
        return Err(ApiError::TenantMismatch {
            header: tenant.to_string(),
        });
    }
    Ok(actor)
}

pub(crate) fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
