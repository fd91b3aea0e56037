use crate::application::execution::{ExecuteRequest, ExecutionEngine};
use crate::application::halt::Halt;
use crate::application::risk::{RiskMonitor, RiskValidator};
use crate::application::settings_service::{SettingsService, TransitionPolicy};
use crate::domain::constants::HardLimits;
use crate::domain::errors::ExecutionError;
use crate::domain::ports::Strategy;
use crate::domain::repositories::SignalRepository;
use crate::domain::risk::RiskDecision;
use crate::domain::signal::{Signal, SignalStatus};
use crate::domain::types::{Candle, ExecutionMode, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// An advisor with no heartbeat inside this window is considered gone.
const HEARTBEAT_TIMEOUT: Duration = Duration::seconds(60);
/// Rolling window of advisor outcomes used for the error-rate gate.
const HEALTH_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    StrategyAnalysis,
    RiskValidation,
    Execution,
    JournalUpdate,
}

/// Terminal outcome of one coordinator cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Nothing proposed for this batch.
    NoSignal,
    /// The validator vetoed the proposal.
    Rejected(RiskDecision),
    /// Order submitted (possibly already filled).
    Executed { order_id: Uuid },
    /// The mode gate blocked execution.
    Blocked { reason: String },
    /// The global halt flag short-circuited the cycle.
    Halted,
    /// An advisor failed the health gate; the cycle never started.
    Unhealthy { advisor: String },
}

pub struct CycleReport {
    pub phases_completed: Vec<CyclePhase>,
    pub signal_id: Option<Uuid>,
    pub outcome: CycleOutcome,
}

#[derive(Debug, Clone)]
struct AdvisorHealth {
    last_seen: DateTime<Utc>,
    outcomes: VecDeque<bool>,
}

impl AdvisorHealth {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_seen: now,
            outcomes: VecDeque::new(),
        }
    }

    fn record(&mut self, ok: bool, now: DateTime<Utc>) {
        self.last_seen = now;
        self.outcomes.push_back(ok);
        while self.outcomes.len() > HEALTH_WINDOW {
            self.outcomes.pop_front();
        }
    }

    fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let errors = self.outcomes.iter().filter(|ok| !**ok).count();
        errors as f64 / self.outcomes.len() as f64
    }

    fn healthy(&self, now: DateTime<Utc>) -> bool {
        now - self.last_seen <= HEARTBEAT_TIMEOUT && self.error_rate() <= 0.5
    }
}

/// Drives the ordered cycle strategy -> risk -> execution -> journal for one
/// (user, symbol) candle batch. Only the coordinator advances the phase.
pub struct Coordinator {
    strategies: Vec<Arc<dyn Strategy>>,
    validator: Arc<RiskValidator>,
    engine: Arc<ExecutionEngine>,
    signals: Arc<dyn SignalRepository>,
    monitor: Arc<RiskMonitor>,
    settings: Arc<SettingsService>,
    halt: Halt,
    heartbeats: RwLock<HashMap<String, AdvisorHealth>>,
}

impl Coordinator {
    pub fn new(
        validator: Arc<RiskValidator>,
        engine: Arc<ExecutionEngine>,
        signals: Arc<dyn SignalRepository>,
        monitor: Arc<RiskMonitor>,
        settings: Arc<SettingsService>,
        halt: Halt,
    ) -> Self {
        Self {
            strategies: Vec::new(),
            validator,
            engine,
            signals,
            monitor,
            settings,
            halt,
            heartbeats: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_strategy(&mut self, strategy: Arc<dyn Strategy>) {
        let name = strategy.name().to_string();
        self.heartbeats
            .write()
            .await
            .insert(name.clone(), AdvisorHealth::new(Utc::now()));
        self.strategies.push(strategy);
        info!("Coordinator: Registered advisor {}", name);
    }

    pub fn halt_handle(&self) -> Halt {
        self.halt.clone()
    }

    pub async fn record_heartbeat(&self, advisor: &str, ok: bool) {
        let now = Utc::now();
        let mut beats = self.heartbeats.write().await;
        beats
            .entry(advisor.to_string())
            .or_insert_with(|| AdvisorHealth::new(now))
            .record(ok, now);
    }

    /// First advisor failing the gate, if any.
    pub async fn unhealthy_advisor(&self) -> Option<String> {
        let now = Utc::now();
        let beats = self.heartbeats.read().await;
        for strategy in &self.strategies {
            match beats.get(strategy.name()) {
                Some(health) if health.healthy(now) => {}
                _ => return Some(strategy.name().to_string()),
            }
        }
        None
    }

    /// One deterministic cycle. Every phase re-checks the halt flag before
    /// starting; the flag also cancels in-flight broker work through the
    /// engine's timeouts.
    pub async fn run_cycle(
        &self,
        user_id: UserId,
        symbol: &str,
        candles: &[Candle],
    ) -> anyhow::Result<CycleReport> {
        let mut phases_completed = Vec::new();

        if self.halt.is_halted() {
            return Ok(CycleReport {
                phases_completed,
                signal_id: None,
                outcome: CycleOutcome::Halted,
            });
        }
        if let Some(advisor) = self.unhealthy_advisor().await {
            warn!("Coordinator: Refusing cycle, advisor {} unhealthy", advisor);
            return Ok(CycleReport {
                phases_completed,
                signal_id: None,
                outcome: CycleOutcome::Unhealthy { advisor },
            });
        }

        // Phase 1: strategy analysis over this symbol's batch. First
        // proposal wins; advisors are advisors, the validator is
        // authoritative.
        let batch: Vec<Candle> = candles
            .iter()
            .filter(|c| c.symbol == symbol)
            .cloned()
            .collect();
        let mut signal: Option<Signal> = None;
        for strategy in &self.strategies {
            match strategy.analyze(&batch).await {
                Ok(Some(draft)) => {
                    self.record_heartbeat(strategy.name(), true).await;
                    let s = Signal::from_draft(draft, strategy.name(), user_id);
                    self.signals.insert(&s).await?;
                    info!(
                        "Coordinator: {} proposed {} {} @ {}",
                        strategy.name(),
                        s.side,
                        s.symbol,
                        s.entry
                    );
                    signal = Some(s);
                    break;
                }
                Ok(None) => {
                    self.record_heartbeat(strategy.name(), true).await;
                }
                Err(e) => {
                    warn!("Coordinator: Advisor {} failed: {:#}", strategy.name(), e);
                    self.record_heartbeat(strategy.name(), false).await;
                }
            }
        }
        phases_completed.push(CyclePhase::StrategyAnalysis);

        let Some(signal) = signal else {
            return Ok(CycleReport {
                phases_completed,
                signal_id: None,
                outcome: CycleOutcome::NoSignal,
            });
        };

        if self.halt.is_halted() {
            return Ok(CycleReport {
                phases_completed,
                signal_id: Some(signal.id),
                outcome: CycleOutcome::Halted,
            });
        }

        // Phase 2: risk validation (the absolute veto).
        let state = self.monitor.account_state(user_id).await?;
        let size = self.position_size(&signal, state.balance).await?;
        let decision = self.validator.validate(&signal, size).await?;
        phases_completed.push(CyclePhase::RiskValidation);

        if !decision.is_approved() {
            self.signals
                .set_status(signal.id, SignalStatus::Rejected)
                .await?;
            return Ok(CycleReport {
                phases_completed,
                signal_id: Some(signal.id),
                outcome: CycleOutcome::Rejected(decision),
            });
        }
        self.signals
            .set_status(signal.id, SignalStatus::Approved)
            .await?;

        if self.halt.is_halted() {
            return Ok(CycleReport {
                phases_completed,
                signal_id: Some(signal.id),
                outcome: CycleOutcome::Halted,
            });
        }

        // Phase 3: execution through the single gateway.
        let outcome = match self
            .engine
            .execute(ExecuteRequest::new(signal.id, size))
            .await
        {
            Ok(order) => CycleOutcome::Executed { order_id: order.id },
            Err(ExecutionError::ModeBlocked { reason, .. }) => {
                CycleOutcome::Blocked { reason }
            }
            Err(e) => return Err(e.into()),
        };
        phases_completed.push(CyclePhase::Execution);

        // Phase 4: journal update - reconcile order state so close events
        // land promptly; journal rows themselves are written on close.
        self.engine.poll_open_orders().await?;
        phases_completed.push(CyclePhase::JournalUpdate);

        Ok(CycleReport {
            phases_completed,
            signal_id: Some(signal.id),
            outcome,
        })
    }

    /// Risk-based sizing: risk_pct of balance across the stop distance,
    /// capped by the hard lot ceiling.
    async fn position_size(&self, signal: &Signal, balance: Decimal) -> anyhow::Result<Decimal> {
        let hard = HardLimits::get();
        let stop_distance = (signal.entry - signal.stop_loss).abs();
        if stop_distance.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let risk_amount = signal.risk_pct / dec!(100) * balance;
        let settings = self.settings.get().await?;
        let lot_cap = settings
            .max_position_size_lots
            .min(hard.max_position_size_lots);
        Ok((risk_amount / stop_distance).min(lot_cap))
    }
}

/// Health gate for guide -> autonomous: advisors healthy, broker reachable
/// (unless simulating), no latched emergency.
pub struct AutonomyGate {
    coordinator: Arc<Coordinator>,
    engine: Arc<ExecutionEngine>,
    monitor: Arc<RiskMonitor>,
    settings: Arc<SettingsService>,
}

impl AutonomyGate {
    pub fn new(
        coordinator: Arc<Coordinator>,
        engine: Arc<ExecutionEngine>,
        monitor: Arc<RiskMonitor>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            coordinator,
            engine,
            monitor,
            settings,
        }
    }
}

#[async_trait]
impl TransitionPolicy for AutonomyGate {
    async fn check_enter_autonomous(&self, user_id: Option<UserId>) -> Result<(), String> {
        if let Some(advisor) = self.coordinator.unhealthy_advisor().await {
            return Err(format!("advisor {} unhealthy", advisor));
        }

        let settings = self
            .settings
            .get()
            .await
            .map_err(|e| format!("settings unavailable: {e}"))?;
        if settings.exec_mode != ExecutionMode::Simulation
            && !self.engine.active_broker_connected().await
        {
            return Err("broker not connected".to_string());
        }

        if let Some(user) = user_id {
            let state = self
                .monitor
                .account_state(user)
                .await
                .map_err(|e| format!("risk state unavailable: {e}"))?;
            if state.emergency_shutdown {
                return Err("emergency shutdown active".to_string());
            }
        }
        Ok(())
    }
}
