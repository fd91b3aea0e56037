use crate::domain::signal::{Signal, SignalStatus};
use crate::domain::types::Side;
use crate::interfaces::api::AppContext;
use crate::interfaces::api::auth::AuthUser;
use crate::interfaces::api::error::ApiError;
use axum::Json;
use axum::extract::{Query, State};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct ValidateSignalBody {
    pub strategy_name: String,
    pub symbol: String,
    pub side: Side,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_pct: Decimal,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Deserialize)]
pub struct ValidateBody {
    pub signal: ValidateSignalBody,
    pub size: Decimal,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Deserialize)]
pub struct EnableStrategyBody {
    pub strategy_name: String,
    pub symbol: String,
}

/// Dry-run validation: the decision row is recorded like any other attempt,
/// but no signal is persisted and nothing executes.
pub async fn validate(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<ValidateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signal = Signal {
        id: Uuid::new_v4(),
        strategy_name: body.signal.strategy_name,
        user_id,
        symbol: body.signal.symbol,
        side: body.signal.side,
        entry: body.signal.entry,
        stop_loss: body.signal.stop_loss,
        take_profit: body.signal.take_profit,
        risk_pct: body.signal.risk_pct,
        confidence: body.signal.confidence,
        status: SignalStatus::Pending,
        signal_time: Utc::now(),
    };
    let decision = ctx.validator.validate(&signal, body.size).await?;
    Ok(Json(json!({
        "approved": decision.is_approved(),
        "reason_code": decision.reason_code,
        "checks": {
            "passed": decision.checks_passed,
            "failed": decision.checks_failed,
        },
        "decision_id": decision.id,
    })))
}

pub async fn get_state(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = ctx.monitor.account_state(user_id).await?;
    Ok(Json(json!({
        "balance": state.balance,
        "equity": state.equity,
        "peak_equity": state.peak_equity,
        "current_drawdown_pct": state.current_drawdown_pct(),
        "daily_pnl": state.daily_pnl,
        "daily_pnl_reset_at": state.daily_pnl_reset_at,
        "open_positions_count": state.open_positions_count,
        "trades_today": state.trades_today,
        "emergency_shutdown": state.emergency_shutdown,
        "updated_at": state.updated_at,
    })))
}

pub async fn get_decisions(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let decisions = ctx.validator.decisions_for_user(user_id, query.limit).await?;
    Ok(Json(json!({ "decisions": decisions })))
}

pub async fn get_budgets(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let budgets = ctx.monitor.budgets(user_id).await?;
    Ok(Json(json!({ "budgets": budgets })))
}

pub async fn reset_emergency(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = ctx.monitor.reset_emergency(user_id).await?;
    Ok(Json(json!({ "emergency_shutdown": state.emergency_shutdown })))
}

pub async fn reset_daily(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = ctx.monitor.reset_daily(user_id, "manual reset").await?;
    Ok(Json(json!({
        "trades_today": state.trades_today,
        "daily_pnl": state.daily_pnl,
    })))
}

pub async fn enable_strategy(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<EnableStrategyBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let budget = ctx
        .monitor
        .enable_strategy(user_id, &body.strategy_name, &body.symbol)
        .await?;
    Ok(Json(json!({ "budget": budget })))
}
