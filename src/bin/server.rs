//! Tradewarden server - headless trading control plane
//!
//! Boots the closed pipeline (strategy -> risk validator -> execution ->
//! journal/feedback) plus its background workers, and serves the REST
//! control plane. Candles come from a simulated random-walk feed (market
//! data ingestion proper is a collaborator behind the `CandleFeed` port);
//! every candle drives the coordinator cycle for each account and symbol.
//! Metrics are push-based structured JSON logs on stdout; the only listener
//! is the control-plane API itself.
//!
//! # Usage
//! ```sh
//! DATABASE_URL=sqlite://data/tradewarden.db cargo run --bin server
//! ```
//!
//! # Environment Variables
//! - `PERSISTENCE` - 'sqlite' (default) or 'memory'
//! - `BIND_ADDR` - control-plane listen address (default 127.0.0.1:8080)
//! - `JWT_SECRET` - HS256 signing secret (auth is unusable without it)
//! - `ADMIN_EMAIL` / `ADMIN_PASSWORD` - bootstrap account, created if missing
//! - `SYMBOLS` - comma-separated symbols the simulated feed generates
//! - `CANDLE_INTERVAL_MS` - simulated candle cadence (default 1000)

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::prelude::*;

use tradewarden::application::coordinator::{AutonomyGate, Coordinator, CycleOutcome};
use tradewarden::application::execution::{
    EngineModeGuard, ExecutionEngine, OrderMonitorLoop, PositionLifecycle,
};
use tradewarden::application::feedback::FeedbackLoop;
use tradewarden::application::halt::Halt;
use tradewarden::application::journal::{JournalService, PerformanceAnalyzer};
use tradewarden::application::risk::{RiskMonitor, RiskValidator};
use tradewarden::application::settings_service::SettingsService;
use tradewarden::application::strategies::SmaCrossStrategy;
use tradewarden::config::{Config, PersistenceMode};
use tradewarden::domain::constants::HardLimits;
use tradewarden::domain::ports::{BrokerAdapter, CandleFeed};
use tradewarden::domain::repositories::{
    FeedbackRepository, JournalRepository, OrderRepository, PositionRepository,
    RiskDecisionRepository, RiskStateRepository, SettingsRepository, SignalRepository,
    SimulationAccountRepository, StrategyBudgetRepository, UserRepository,
};
use tradewarden::domain::types::{Candle, UserId};
use tradewarden::domain::user::UserAccount;
use tradewarden::infrastructure::brokers::paper::PaperAdapter;
use tradewarden::infrastructure::brokers::simulation::{SimulationAdapter, SimulationDefaults};
use tradewarden::infrastructure::event_bus::EventBus;
use tradewarden::infrastructure::mock::SimulatedCandleFeed;
use tradewarden::infrastructure::observability::{Metrics, MetricsListener, MetricsReporter};
use tradewarden::infrastructure::persistence::Database;
use tradewarden::infrastructure::persistence::repositories as sqlite;
use tradewarden::infrastructure::repositories::in_memory;
use tradewarden::interfaces::api::auth::AuthService;
use tradewarden::interfaces::api::{AppContext, router};

/// One bundle of repository handles, whatever the backing store.
struct Repos {
    settings: Arc<dyn SettingsRepository>,
    signals: Arc<dyn SignalRepository>,
    positions: Arc<dyn PositionRepository>,
    orders: Arc<dyn OrderRepository>,
    risk_state: Arc<dyn RiskStateRepository>,
    budgets: Arc<dyn StrategyBudgetRepository>,
    decisions: Arc<dyn RiskDecisionRepository>,
    journal: Arc<dyn JournalRepository>,
    feedback: Arc<dyn FeedbackRepository>,
    sim_accounts: Arc<dyn SimulationAccountRepository>,
    users: Arc<dyn UserRepository>,
}

impl Repos {
    fn sqlite(db: Database) -> Self {
        Self {
            settings: Arc::new(sqlite::SqliteSettingsRepository::new(db.clone())),
            signals: Arc::new(sqlite::SqliteSignalRepository::new(db.clone())),
            positions: Arc::new(sqlite::SqlitePositionRepository::new(db.clone())),
            orders: Arc::new(sqlite::SqliteOrderRepository::new(db.clone())),
            risk_state: Arc::new(sqlite::SqliteRiskStateRepository::new(db.clone())),
            budgets: Arc::new(sqlite::SqliteStrategyBudgetRepository::new(db.clone())),
            decisions: Arc::new(sqlite::SqliteRiskDecisionRepository::new(db.clone())),
            journal: Arc::new(sqlite::SqliteJournalRepository::new(db.clone())),
            feedback: Arc::new(sqlite::SqliteFeedbackRepository::new(db.clone())),
            sim_accounts: Arc::new(sqlite::SqliteSimulationAccountRepository::new(db.clone())),
            users: Arc::new(sqlite::SqliteUserRepository::new(db)),
        }
    }

    fn memory() -> Self {
        Self {
            settings: Arc::new(in_memory::InMemorySettingsRepository::new()),
            signals: Arc::new(in_memory::InMemorySignalRepository::new()),
            positions: Arc::new(in_memory::InMemoryPositionRepository::new()),
            orders: Arc::new(in_memory::InMemoryOrderRepository::new()),
            risk_state: Arc::new(in_memory::InMemoryRiskStateRepository::new()),
            budgets: Arc::new(in_memory::InMemoryStrategyBudgetRepository::new()),
            decisions: Arc::new(in_memory::InMemoryRiskDecisionRepository::new()),
            journal: Arc::new(in_memory::InMemoryJournalRepository::new()),
            feedback: Arc::new(in_memory::InMemoryFeedbackRepository::new()),
            sim_accounts: Arc::new(in_memory::InMemorySimulationAccountRepository::new()),
            users: Arc::new(in_memory::InMemoryUserRepository::new()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Tradewarden Server {} starting...", env!("CARGO_PKG_VERSION"));

    // Hard limits gate everything: a bad build must not trade.
    if let Err(violation) = HardLimits::get().validate() {
        error!("FATAL: hard limit self-check failed: {}", violation);
        std::process::exit(1);
    }
    info!("Hard limits verified");

    let config = Config::from_env()?;
    if config.jwt_secret.is_empty() {
        warn!("JWT_SECRET is not set - all authenticated requests will be rejected");
    }

    let repos = match config.persistence {
        PersistenceMode::Sqlite => {
            let db = Database::new(&config.database_url).await?;
            Repos::sqlite(db)
        }
        PersistenceMode::Memory => {
            warn!("PERSISTENCE=memory: state will not survive a restart");
            Repos::memory()
        }
    };

    let events = EventBus::new();
    let halt = Halt::new();

    // Core services
    let settings = Arc::new(SettingsService::new(
        repos.settings.clone(),
        repos.users.clone(),
        events.clone(),
    ));
    settings.get().await?; // bootstrap the singleton early

    let monitor = Arc::new(RiskMonitor::new(
        repos.risk_state.clone(),
        repos.budgets.clone(),
        repos.decisions.clone(),
        events.clone(),
        config.initial_balance,
    ));
    let validator = Arc::new(RiskValidator::new(
        monitor.clone(),
        repos.risk_state.clone(),
        repos.budgets.clone(),
        repos.decisions.clone(),
        settings.clone(),
        events.clone(),
    ));

    let engine = Arc::new(ExecutionEngine::new(
        repos.orders.clone(),
        repos.signals.clone(),
        repos.positions.clone(),
        settings.clone(),
        monitor.clone(),
        events.clone(),
        config.max_order_retries,
        Duration::from_secs(config.broker_timeout_secs),
    ));

    // Reference adapters
    let sim_defaults = SimulationDefaults {
        initial_balance: config.initial_balance,
        slippage_pips: Decimal::from_f64(config.sim_slippage_pips)
            .context("SIM_SLIPPAGE_PIPS not representable")?,
        commission_per_lot: Decimal::from_f64(config.sim_commission_per_lot)
            .context("SIM_COMMISSION_PER_LOT not representable")?,
        latency_ms: config.sim_latency_ms,
        fill_probability: config.sim_fill_probability,
    };
    let simulation = Arc::new(SimulationAdapter::new(
        repos.sim_accounts.clone(),
        sim_defaults,
    ));
    let paper = Arc::new(PaperAdapter::new(
        config.initial_balance,
        Decimal::from_f64(config.sim_slippage_pips * 0.0001).unwrap_or_default(),
    ));
    engine.register_broker(simulation.clone()).await;
    engine.register_broker(paper).await;

    // Cancel-on-mode-switch wiring
    settings
        .register_mode_guard(Arc::new(EngineModeGuard::new(engine.clone())))
        .await;

    // Journal + feedback
    let journal = Arc::new(JournalService::new(repos.journal.clone(), events.clone()));
    let analyzer = Arc::new(PerformanceAnalyzer::new(repos.journal.clone()));
    let feedback = Arc::new(FeedbackLoop::new(
        analyzer.clone(),
        repos.feedback.clone(),
        repos.budgets.clone(),
        monitor.clone(),
        settings.clone(),
        events.clone(),
        ChronoDuration::days(30),
    ));

    // Coordinator + autonomy gate
    let mut coordinator = Coordinator::new(
        validator.clone(),
        engine.clone(),
        repos.signals.clone(),
        monitor.clone(),
        settings.clone(),
        halt.clone(),
    );
    coordinator
        .register_strategy(Arc::new(SmaCrossStrategy::default()))
        .await;
    let coordinator = Arc::new(coordinator);
    settings
        .register_transition_policy(Arc::new(AutonomyGate::new(
            coordinator.clone(),
            engine.clone(),
            monitor.clone(),
            settings.clone(),
        )))
        .await;

    // Bootstrap account
    let admin_user = bootstrap_admin(repos.users.as_ref()).await?;

    // Background workers
    let lifecycle = Arc::new(PositionLifecycle::new(
        repos.orders.clone(),
        repos.positions.clone(),
        journal.clone(),
        monitor.clone(),
        settings.clone(),
        events.clone(),
    ));
    if let Some(broker_events) = simulation.subscribe_events() {
        tokio::spawn(lifecycle.clone().run(broker_events, halt.clone()));
    }

    tokio::spawn(
        OrderMonitorLoop::new(
            engine.clone(),
            Duration::from_millis(config.order_poll_interval_ms),
            halt.clone(),
        )
        .run(),
    );

    let feedback_users: Vec<UserId> = admin_user.into_iter().collect();
    tokio::spawn(feedback.clone().run(
        feedback_users.clone(),
        Duration::from_secs(config.feedback_interval_secs),
        halt.clone(),
    ));

    tokio::spawn(daily_reset_scheduler(
        monitor.clone(),
        feedback_users.clone(),
        config.daily_reset_hour_utc,
        halt.clone(),
    ));

    // The automated pipeline: a simulated feed drives one coordinator cycle
    // per candle per account, and every price observation reaches the
    // simulation adapter's SL/TP ticker.
    let feed: Arc<dyn CandleFeed> = Arc::new(SimulatedCandleFeed::new(
        Duration::from_millis(config.candle_interval_ms),
        dec!(1.1000),
    ));
    tokio::spawn(trading_cycle_driver(
        coordinator.clone(),
        simulation.clone(),
        feed,
        feedback_users.clone(),
        config.symbols.clone(),
        halt.clone(),
    ));

    if config.observability_enabled {
        let metrics = Metrics::new()?;
        tokio::spawn(
            MetricsListener::new(metrics.clone()).run(events.subscribe(), halt.clone()),
        );
        let reporter = MetricsReporter::new(
            monitor.clone(),
            metrics,
            feedback_users.clone(),
            config.metrics_interval_secs,
        );
        tokio::spawn(reporter.run(halt.clone()));
    }

    // Control-plane API
    let (login_limiter, refresh_limiter) = AppContext::auth_limiters();
    let ctx = Arc::new(AppContext {
        settings: settings.clone(),
        validator: validator.clone(),
        monitor: monitor.clone(),
        engine: engine.clone(),
        journal: journal.clone(),
        analyzer: analyzer.clone(),
        feedback: feedback.clone(),
        users: repos.users.clone(),
        auth: AuthService::new(
            &config.jwt_secret,
            config.jwt_access_ttl_secs,
            config.jwt_refresh_ttl_secs,
        ),
        login_limiter,
        refresh_limiter,
    });

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Control plane listening on {}", config.bind_addr);

    let shutdown_halt = halt.clone();
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            warn!("Shutdown signal received");
            shutdown_halt.halt();
        })
        .await
        .context("API server failed")?;

    info!("Tradewarden Server stopped");
    Ok(())
}

/// Creates the bootstrap account from ADMIN_EMAIL/ADMIN_PASSWORD when it
/// does not exist yet. Without credentials the API simply has no users.
async fn bootstrap_admin(users: &dyn UserRepository) -> Result<Option<UserId>> {
    let email = std::env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@local".to_string());
    if let Some(existing) = users.by_email(&email).await? {
        return Ok(Some(existing.id));
    }
    let Ok(password) = std::env::var("ADMIN_PASSWORD") else {
        warn!("ADMIN_PASSWORD not set and no users exist - API auth is unusable");
        return Ok(None);
    };
    let user = UserAccount {
        id: uuid::Uuid::new_v4(),
        email: email.clone(),
        password_hash: bcrypt::hash(&password, bcrypt::DEFAULT_COST)
            .context("Failed to hash admin password")?,
        created_at: Utc::now(),
    };
    users.insert(&user).await?;
    info!("Bootstrapped admin account {}", email);
    Ok(Some(user.id))
}

/// Fires `reset_daily` for every known user at the configured UTC hour.
/// The monitor never rolls the window on its own.
async fn daily_reset_scheduler(
    monitor: Arc<RiskMonitor>,
    users: Vec<UserId>,
    reset_hour_utc: u32,
    halt: Halt,
) {
    let mut halt_rx = halt.subscribe();
    loop {
        let now = Utc::now();
        let mut next = now
            .date_naive()
            .and_hms_opt(reset_hour_utc, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        if next <= now {
            next += ChronoDuration::days(1);
        }
        let wait = (next - now).to_std().unwrap_or(Duration::from_secs(3600));
        info!("DailyReset: Next market-day reset at {}", next);

        tokio::select! {
            changed = halt_rx.changed() => {
                if changed.is_err() || *halt_rx.borrow() {
                    info!("DailyReset: Halted");
                    return;
                }
            }
            _ = tokio::time::sleep(wait) => {
                for user in &users {
                    if let Err(e) = monitor.reset_daily(*user, "market-day boundary").await {
                        error!("DailyReset: Reset for {} failed: {:#}", user, e);
                    }
                }
            }
        }
    }
}

/// Candles each strategy sees per cycle. Enough history for the slow mean
/// without dragging months of warm-up into every analysis call.
const CANDLE_HISTORY: usize = 120;

/// The automated pipeline's driver: consumes the candle feed, keeps a
/// rolling per-symbol history, ticks the simulation adapter's SL/TP watcher
/// on every price, and runs one coordinator cycle per (account, symbol) per
/// candle.
async fn trading_cycle_driver(
    coordinator: Arc<Coordinator>,
    simulation: Arc<SimulationAdapter>,
    feed: Arc<dyn CandleFeed>,
    users: Vec<UserId>,
    symbols: Vec<String>,
    halt: Halt,
) {
    let mut candles = match feed.subscribe(symbols).await {
        Ok(rx) => rx,
        Err(e) => {
            error!("CycleDriver: Feed subscription failed: {:#}", e);
            return;
        }
    };
    if users.is_empty() {
        warn!("CycleDriver: No accounts configured; cycles will only tick SL/TP");
    }

    let mut history: HashMap<String, Vec<Candle>> = HashMap::new();
    let mut halt_rx = halt.subscribe();
    info!("CycleDriver: Started");

    loop {
        tokio::select! {
            changed = halt_rx.changed() => {
                if changed.is_err() || *halt_rx.borrow() {
                    info!("CycleDriver: Halted");
                    return;
                }
            }
            candle = candles.recv() => {
                let Some(candle) = candle else {
                    info!("CycleDriver: Feed closed");
                    return;
                };

                // SL/TP checks ride every price observation, whether or not
                // a cycle produces a trade.
                simulation.on_price_tick(&candle.symbol, candle.close).await;

                let series = history.entry(candle.symbol.clone()).or_default();
                series.push(candle.clone());
                if series.len() > CANDLE_HISTORY {
                    series.remove(0);
                }
                let batch = series.clone();

                for user in &users {
                    match coordinator.run_cycle(*user, &candle.symbol, &batch).await {
                        Ok(report) => match report.outcome {
                            CycleOutcome::Executed { order_id } => {
                                info!("CycleDriver: Cycle executed order {}", order_id);
                            }
                            CycleOutcome::Rejected(decision) => {
                                info!(
                                    "CycleDriver: Proposal vetoed ({})",
                                    decision.reason_code.as_deref().unwrap_or("unknown")
                                );
                            }
                            CycleOutcome::Blocked { reason } => {
                                debug!("CycleDriver: Execution blocked ({})", reason);
                            }
                            CycleOutcome::Unhealthy { advisor } => {
                                warn!("CycleDriver: Cycle refused, advisor {} unhealthy", advisor);
                            }
                            CycleOutcome::NoSignal | CycleOutcome::Halted => {}
                        },
                        Err(e) => error!("CycleDriver: Cycle failed: {:#}", e),
                    }
                }
            }
        }
    }
}
