use crate::domain::constants::HardLimits;
use crate::domain::settings::SettingsPatch;
use crate::domain::types::{ExecutionMode, TradingMode};
use crate::interfaces::api::AppContext;
use crate::interfaces::api::auth::AuthUser;
use crate::interfaces::api::error::ApiError;
use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct UpdateSettingsRequest {
    pub patch: SettingsPatch,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct SetModeRequest {
    pub mode: TradingMode,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct SetExecutionModeRequest {
    pub mode: ExecutionMode,
    pub password: Option<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn get_settings(
    _auth: AuthUser,
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settings = ctx.settings.get().await?;
    Ok(Json(json!(settings)))
}

pub async fn update_settings(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settings = ctx
        .settings
        .update(&req.patch, Some(user_id), &req.reason)
        .await?;
    Ok(Json(json!(settings)))
}

pub async fn get_mode(
    _auth: AuthUser,
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settings = ctx.settings.get().await?;
    Ok(Json(json!({ "mode": settings.mode })))
}

pub async fn set_mode(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<SetModeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settings = ctx
        .settings
        .set_mode(req.mode, Some(user_id), &req.reason)
        .await?;
    Ok(Json(json!({ "mode": settings.mode, "version": settings.version })))
}

pub async fn get_execution_mode(
    _auth: AuthUser,
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settings = ctx.settings.get().await?;
    Ok(Json(json!({
        "exec_mode": settings.exec_mode,
        "broker_type": settings.broker_type,
    })))
}

pub async fn set_execution_mode(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<SetExecutionModeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settings = ctx
        .settings
        .set_execution_mode(
            req.mode,
            Some(user_id),
            req.password.as_deref(),
            req.confirmed,
            req.reason.as_deref().unwrap_or(""),
        )
        .await?;
    Ok(Json(json!({
        "exec_mode": settings.exec_mode,
        "version": settings.version,
    })))
}

pub async fn get_audit(
    _auth: AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let audit = ctx.settings.audit(query.limit).await?;
    Ok(Json(json!(audit)))
}

pub async fn get_constants(_auth: AuthUser) -> Json<serde_json::Value> {
    let hard = HardLimits::get();
    Json(json!({
        "max_risk_per_trade_pct": hard.max_risk_per_trade_pct,
        "max_daily_loss_pct": hard.max_daily_loss_pct,
        "emergency_drawdown_pct": hard.emergency_drawdown_pct,
        "max_open_positions": hard.max_open_positions,
        "max_trades_per_day": hard.max_trades_per_day,
        "max_trades_per_hour": hard.max_trades_per_hour,
        "min_risk_reward_ratio": hard.min_risk_reward_ratio,
        "max_position_size_lots": hard.max_position_size_lots,
        "max_position_size_pct": hard.max_position_size_pct,
        "strategy_auto_disable_threshold": hard.strategy_auto_disable_threshold,
    }))
}
