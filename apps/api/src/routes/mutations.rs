//! POST handlers. Each one names its command and the path ids it carries;
//! [`run`] does the rest.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};
use tracing::debug;

use mercato_engine::{Command, CountLifecycle, Mutation};

use super::{header, identify, trace_id, IDEMPOTENCY_KEY_HEADER, REPLAY_HEADER, REPLAY_VALUE, TRACE_HEADER};
use crate::error::ApiError;
use crate::AppState;

/// Runs one mutation under the caller's trace id; every error it returns
/// carries that id.
async fn run(
    state: &AppState,
    headers: &HeaderMap,
    command: &str,
    path: Vec<(&str, Value)>,
    raw: &[u8],
) -> Result<Response, ApiError> {
    let trace_id = trace_id(headers);
    submit(state, headers, command, path, raw, &trace_id)
        .await
        .map_err(|e| e.traced(&trace_id))
}

/// Authenticates, builds the command from path + body and runs it through
/// the gateway. The body exactly as sent is what gets fingerprinted.
async fn submit(
    state: &AppState,
    headers: &HeaderMap,
    command: &str,
    path: Vec<(&str, Value)>,
    raw: &[u8],
    trace_id: &str,
) -> Result<Response, ApiError> {
    let actor = identify(state, headers)?;

    let body: Value = if raw.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(raw).map_err(|e| ApiError::InvalidRequest(format!("malformed JSON: {e}")))?
    };
    let mut payload = match &body {
        Value::Object(map) => map.clone(),
        _ => return Err(ApiError::InvalidRequest("body must be a JSON object".to_string())),
    };

    let transaction_id = payload
        .remove("transaction_id")
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| ApiError::InvalidRequest("transaction_id is required".to_string()))?;

    for (name, value) in path {
        if let Some(existing) = payload.get(name) {
            if *existing != value {
                return Err(ApiError::InvalidRequest(format!("{name} in body does not match the path")));
            }
        }
        payload.insert(name.to_string(), value);
    }
    payload.insert("command".to_string(), Value::String(command.to_string()));

    let command: Command = serde_json::from_value(Value::Object(payload))
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

    // a blank key is refused by the gateway with the usual 422
    let key = header(headers, IDEMPOTENCY_KEY_HEADER).unwrap_or_default();
    let mutation = Mutation::new(command, key, transaction_id, body).with_trace_id(trace_id);
    debug!(endpoint = %mutation.endpoint, trace_id = %trace_id, "Mutation received");

    let outcome = state
        .gateway
        .execute(&actor, mutation)
        .await
        .map_err(|e| ApiError::engine(e, trace_id))?;

    // a replay answers with the trace id of the request that produced it
    let response_trace = outcome
        .body
        .get("trace_id")
        .and_then(Value::as_str)
        .unwrap_or(trace_id)
        .to_string();
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK);
    let mut response = (status, Json(outcome.body)).into_response();
    let response_headers = response.headers_mut();
    if let Ok(trace) = HeaderValue::from_str(&response_trace) {
        response_headers.insert(TRACE_HEADER, trace);
    }
    if outcome.replayed {
        response_headers.insert(REPLAY_HEADER, HeaderValue::from_static(REPLAY_VALUE));
    }
    Ok(response)
}

fn id(name: &str, value: String) -> Vec<(&str, Value)> {
    vec![(name, Value::String(value))]
}

// =============================================================================
// Stock
// =============================================================================

pub async fn import_stock(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    run(&state, &headers, "IMPORT_STOCK", Vec::new(), &body).await
}

pub async fn migrate_stock(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    run(&state, &headers, "MIGRATE_STOCK", Vec::new(), &body).await
}

// =============================================================================
// Transfers
// =============================================================================

pub async fn create_transfer(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    run(&state, &headers, "CREATE_TRANSFER", Vec::new(), &body).await
}

pub async fn dispatch_transfer(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "DISPATCH_TRANSFER", id("transfer_id", transfer_id), &body).await
}

pub async fn receive_transfer(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "RECEIVE_TRANSFER", id("transfer_id", transfer_id), &body).await
}

pub async fn report_shortages(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "REPORT_TRANSFER_SHORTAGES", id("transfer_id", transfer_id), &body).await
}

pub async fn resolve_shortages(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "RESOLVE_TRANSFER_SHORTAGES", id("transfer_id", transfer_id), &body).await
}

pub async fn cancel_transfer(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "CANCEL_TRANSFER", id("transfer_id", transfer_id), &body).await
}

// =============================================================================
// Sales
// =============================================================================

pub async fn create_sale(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    run(&state, &headers, "CREATE_SALE", Vec::new(), &body).await
}

pub async fn add_sale_line(
    State(state): State<AppState>,
    Path(sale_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "ADD_SALE_LINE", id("sale_id", sale_id), &body).await
}

pub async fn remove_sale_line(
    State(state): State<AppState>,
    Path((sale_id, line_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path = vec![("sale_id", Value::String(sale_id)), ("line_id", Value::String(line_id))];
    run(&state, &headers, "REMOVE_SALE_LINE", path, &body).await
}

pub async fn checkout_sale(
    State(state): State<AppState>,
    Path(sale_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "CHECKOUT_SALE", id("sale_id", sale_id), &body).await
}

pub async fn cancel_sale(
    State(state): State<AppState>,
    Path(sale_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "CANCEL_SALE", id("sale_id", sale_id), &body).await
}

pub async fn refund_sale(
    State(state): State<AppState>,
    Path(sale_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "REFUND_SALE", id("sale_id", sale_id), &body).await
}

pub async fn exchange_sale(
    State(state): State<AppState>,
    Path(sale_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "EXCHANGE_SALE", id("sale_id", sale_id), &body).await
}

// =============================================================================
// Cash
// =============================================================================

pub async fn open_cash_session(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    run(&state, &headers, "OPEN_CASH_SESSION", Vec::new(), &body).await
}

pub async fn cash_in(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "CASH_IN", id("session_id", session_id), &body).await
}

pub async fn cash_out(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "CASH_OUT", id("session_id", session_id), &body).await
}

pub async fn close_cash_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "CLOSE_CASH_SESSION", id("session_id", session_id), &body).await
}

pub async fn close_day(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    run(&state, &headers, "CLOSE_DAY", Vec::new(), &body).await
}

// =============================================================================
// Inventory counts
// =============================================================================

pub async fn create_count(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    run(&state, &headers, "CREATE_COUNT", Vec::new(), &body).await
}

pub async fn scan_count(
    State(state): State<AppState>,
    Path(count_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "SCAN_COUNT", id("count_id", count_id), &body).await
}

pub async fn reconcile_count(
    State(state): State<AppState>,
    Path(count_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    run(&state, &headers, "RECONCILE_COUNT", id("count_id", count_id), &body).await
}

/// `start`, `pause`, `resume`, `close` and `cancel`.
pub async fn transition_count(
    State(state): State<AppState>,
    Path((count_id, action)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let lifecycle = CountLifecycle::from_segment(&action).ok_or_else(|| {
        ApiError::NotFound(format!("inventory count action {action}")).traced(&trace_id(&headers))
    })?;
    let action = serde_json::to_value(lifecycle)
        .map_err(|e| ApiError::InvalidRequest(e.to_string()).traced(&trace_id(&headers)))?;
    let path = vec![("count_id", Value::String(count_id)), ("action", action)];
    run(&state, &headers, "TRANSITION_COUNT", path, &body).await
}
