use crate::bots::scheduler::send_trend_report;
use crate::errors::BotError;
use crate::trend::ConfirmArgs;
use crate::types::Side;
use crate::webserver::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/alerts", post(handle_alert))
        .route("/trend/confirm", post(confirm_trend))
        .route("/trend/current", get(current_trend))
        .route("/trend/agree", get(agree_trend))
        .route("/volume-up", get(all_volume_up))
        .route("/volume-up/close-states", get(all_close_states))
        .route("/volume-up/:symbol", get(volume_up_by_symbol))
        .route("/scheduler/report/:bot", post(trigger_report))
        .with_state(state)
}

fn error_response(e: BotError) -> Response {
    let status = match e {
        BotError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "ok": false, "error": e.to_string() }))).into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn handle_alert(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Response {
    match state.router.handle(&payload).await {
        Ok(alert) => Json(json!({
            "ok": true,
            "type": alert.kind.name(),
            "symbol": alert.symbol,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct ConfirmBody {
    symbol: String,
    timeframe: String,
    direction: Side,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    meta: Option<Value>,
}

async fn confirm_trend(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConfirmBody>,
) -> Response {
    let mut args = ConfirmArgs::new(&body.symbol, &body.timeframe, body.direction);
    args.source = body.source;
    args.meta = body.meta;
    match state.trend.confirm(args).await {
        Ok(row) => Json(json!({ "ok": true, "expiresAt": row.expires_at })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn current_trend(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (symbol, timeframe) = match (params.get("symbol"), params.get("timeframe")) {
        (Some(s), Some(tf)) => (s.clone(), tf.clone()),
        _ => {
            return error_response(BotError::validation(
                "symbol and timeframe query parameters are required",
            ))
        }
    };
    match state.trend.current_trend(&symbol, &timeframe).await {
        Ok(trend) => Json(json!({
            "symbol": symbol,
            "timeframe": timeframe,
            "trend": trend,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn agree_trend(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    use crate::trend::TrendProvider;

    let (symbol, timeframes) = match (params.get("symbol"), params.get("timeframes")) {
        (Some(s), Some(tfs)) => (
            s.clone(),
            tfs.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>(),
        ),
        _ => {
            return error_response(BotError::validation(
                "symbol and timeframes query parameters are required",
            ))
        }
    };
    match state.trend.agree_all(&symbol, &timeframes).await {
        Ok(trend) => Json(json!({
            "symbol": symbol,
            "timeframes": timeframes,
            "trend": trend,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn all_volume_up(State(state): State<Arc<AppState>>) -> Json<Value> {
    let data = state.volume.all_active().await;
    let stats = state.volume.stats().await;
    Json(json!({ "ok": true, "count": data.len(), "data": data, "stats": stats }))
}

async fn all_close_states(State(state): State<Arc<AppState>>) -> Json<Value> {
    let data = state.volume.all_close_states().await;
    Json(json!({ "ok": true, "count": data.len(), "data": data }))
}

async fn volume_up_by_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    match params.get("timeframe") {
        Some(timeframe) => match state.volume.get_volume_up(&symbol, timeframe).await {
            Some(data) => Json(json!({ "ok": true, "data": data })),
            None => Json(json!({
                "ok": false,
                "message": format!("no active volume data for {} ({})", symbol, timeframe),
                "data": Value::Null,
            })),
        },
        None => {
            let data = state.volume.get_volume_up_by_symbol(&symbol).await;
            Json(json!({ "ok": true, "count": data.len(), "data": data }))
        }
    }
}

async fn trigger_report(
    State(state): State<Arc<AppState>>,
    Path(bot_name): Path<String>,
) -> Response {
    let bot = match state.registry.get(&bot_name) {
        Some(b) => b,
        None => {
            let available: Vec<&str> = state.registry.all().iter().map(|b| b.name()).collect();
            return (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "ok": false,
                    "error": format!("bot {} not found", bot_name),
                    "availableBots": available,
                })),
            )
                .into_response();
        }
    };
    match send_trend_report(&bot).await {
        Ok(()) => Json(json!({ "ok": true, "bot": bot_name })).into_response(),
        Err(e) => error_response(e),
    }
}
