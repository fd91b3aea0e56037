use crate::application::execution::ExecuteRequest;
use crate::domain::order::OrderStatus;
use crate::domain::types::BrokerType;
use crate::interfaces::api::AppContext;
use crate::interfaces::api::auth::AuthUser;
use crate::interfaces::api::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Json, response::IntoResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct ExecuteBody {
    pub signal_id: Uuid,
    pub size: Decimal,
    pub broker_type: Option<BrokerType>,
    /// Per-trade user approval for guide-mode live execution.
    #[serde(default)]
    pub approve: bool,
    pub nonce: Option<String>,
}

#[derive(Deserialize)]
pub struct OrdersQuery {
    pub status: Option<OrderStatus>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn execute(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<ExecuteBody>,
) -> Result<impl IntoResponse, ApiError> {
    // The signal must belong to the caller; everything else is the engine's
    // problem.
    let signal = ctx
        .engine
        .signal(body.signal_id)
        .await?
        .ok_or_else(|| ApiError::not_found("signal not found"))?;
    if signal.user_id != user_id {
        return Err(ApiError::not_found("signal not found"));
    }

    let order = ctx
        .engine
        .execute(ExecuteRequest {
            signal_id: body.signal_id,
            size: body.size,
            broker_type: body.broker_type,
            manual_override: body.approve,
            nonce: body.nonce,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "order": order }))))
}

pub async fn list_orders(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orders = ctx
        .engine
        .orders_for_user(user_id, query.status, query.limit)
        .await?;
    Ok(Json(json!({ "orders": orders })))
}

pub async fn get_order(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (order, log) = ctx.engine.order_with_log(order_id).await?;
    if order.user_id != user_id {
        return Err(ApiError::not_found("order not found"));
    }
    Ok(Json(json!({ "order": order, "log": log })))
}

pub async fn cancel_order(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (order, _) = ctx.engine.order_with_log(order_id).await?;
    if order.user_id != user_id {
        return Err(ApiError::not_found("order not found"));
    }
    let order = ctx.engine.cancel_order(order_id).await?;
    Ok(Json(json!({ "order": order })))
}
