//! Control-plane REST API. All endpoints except `/health` require a valid
//! bearer token; auth resolves to the tenant `user_id` every query is
//! filtered by.

pub mod auth;
pub mod error;
pub mod execution_routes;
pub mod journal_routes;
pub mod rate_limit;
pub mod risk_routes;
pub mod settings_routes;

use crate::application::execution::ExecutionEngine;
use crate::application::feedback::FeedbackLoop;
use crate::application::journal::{JournalService, PerformanceAnalyzer};
use crate::application::risk::{RiskMonitor, RiskValidator};
use crate::application::settings_service::SettingsService;
use crate::domain::repositories::UserRepository;
use auth::AuthService;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use rate_limit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppContext {
    pub settings: Arc<SettingsService>,
    pub validator: Arc<RiskValidator>,
    pub monitor: Arc<RiskMonitor>,
    pub engine: Arc<ExecutionEngine>,
    pub journal: Arc<JournalService>,
    pub analyzer: Arc<PerformanceAnalyzer>,
    pub feedback: Arc<FeedbackLoop>,
    pub users: Arc<dyn UserRepository>,
    pub auth: AuthService,
    pub login_limiter: RateLimiter,
    pub refresh_limiter: RateLimiter,
}

impl AppContext {
    /// Default per-IP auth limits: 10 logins and 30 refreshes per minute.
    pub fn auth_limiters() -> (RateLimiter, RateLimiter) {
        (
            RateLimiter::new(10, Duration::from_secs(60)),
            RateLimiter::new(30, Duration::from_secs(60)),
        )
    }
}

/// Build the full router with CORS middleware and shared state.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Public
        .route("/health", get(health))
        // Auth
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        // Settings
        .route(
            "/settings",
            get(settings_routes::get_settings).put(settings_routes::update_settings),
        )
        .route(
            "/settings/mode",
            get(settings_routes::get_mode).post(settings_routes::set_mode),
        )
        .route("/settings/audit", get(settings_routes::get_audit))
        .route("/settings/constants", get(settings_routes::get_constants))
        // Execution mode
        .route(
            "/execution-mode",
            get(settings_routes::get_execution_mode).post(settings_routes::set_execution_mode),
        )
        // Execution
        .route("/execution/execute", post(execution_routes::execute))
        .route("/execution/orders", get(execution_routes::list_orders))
        .route("/execution/orders/:id", get(execution_routes::get_order))
        .route(
            "/execution/orders/:id/cancel",
            post(execution_routes::cancel_order),
        )
        // Risk
        .route("/risk/validate", post(risk_routes::validate))
        .route("/risk/state", get(risk_routes::get_state))
        .route("/risk/decisions", get(risk_routes::get_decisions))
        .route("/risk/budgets", get(risk_routes::get_budgets))
        .route("/risk/emergency/reset", post(risk_routes::reset_emergency))
        .route("/risk/daily/reset", post(risk_routes::reset_daily))
        .route("/risk/budgets/enable", post(risk_routes::enable_strategy))
        // Journal
        .route("/journal/entries", get(journal_routes::get_entries))
        .route("/journal/stats", get(journal_routes::get_stats))
        .route(
            "/journal/feedback/:strategy/:symbol",
            post(journal_routes::run_feedback),
        )
        .layer(cors)
        .with_state(ctx)
}

async fn health(State(_ctx): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "server_time": chrono::Utc::now().to_rfc3339(),
    }))
}
