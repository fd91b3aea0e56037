use crate::interfaces::api::AppContext;
use crate::interfaces::api::auth::AuthUser;
use crate::interfaces::api::error::ApiError;
use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct EntriesQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

#[derive(Deserialize)]
pub struct StatsQuery {
    pub strategy: String,
    pub symbol: String,
    #[serde(default = "default_window_days")]
    pub days: i64,
}

fn default_window_days() -> i64 {
    30
}

pub async fn get_entries(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = ctx.journal.entries_for_user(user_id, query.limit).await?;
    Ok(Json(json!({ "entries": entries })))
}

pub async fn get_stats(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = ctx
        .analyzer
        .analyze(
            user_id,
            &query.strategy,
            &query.symbol,
            Duration::days(query.days),
        )
        .await?;
    Ok(Json(json!(report)))
}

/// Manually trigger one feedback cycle for a (strategy, symbol).
pub async fn run_feedback(
    AuthUser(user_id): AuthUser,
    State(ctx): State<Arc<AppContext>>,
    Path((strategy, symbol)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let decision = ctx.feedback.run_cycle(user_id, &strategy, &symbol).await?;
    Ok(Json(json!({ "decision": decision })))
}
