//! Read endpoints.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use mercato_db::LevelFilter;
use mercato_engine::queries;

use super::{identify, trace_id};
use crate::error::ApiError;
use crate::AppState;

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.gateway.database().health_check().await {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unavailable" })))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LevelQuery {
    pub sku: Option<String>,
    pub location_id: Option<String>,
    pub pool: Option<String>,
}

/// `GET /v1/stock/levels?sku=&location_id=&pool=`
pub async fn stock_levels(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LevelQuery>,
) -> Result<Json<Value>, ApiError> {
    let trace_id = trace_id(&headers);
    let actor = identify(&state, &headers).map_err(|e| e.traced(&trace_id))?;
    let filter = LevelFilter {
        sku: query.sku,
        location_id: query.location_id,
        pool: query.pool,
    };
    let levels = queries::stock_levels(state.gateway.database(), &actor, &filter)
        .await
        .map_err(|e| ApiError::engine(e, trace_id.clone()))?;
    Ok(Json(json!({ "data": levels, "trace_id": trace_id })))
}
