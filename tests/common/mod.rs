//! Shared test fixture: the full pipeline wired over in-memory repositories
//! with the simulation, paper and mock adapters registered.

#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use tradewarden::application::execution::{
    EngineModeGuard, ExecutionEngine, PositionLifecycle,
};
use tradewarden::application::feedback::FeedbackLoop;
use tradewarden::application::halt::Halt;
use tradewarden::application::journal::{JournalService, PerformanceAnalyzer};
use tradewarden::application::risk::{RiskMonitor, RiskValidator};
use tradewarden::application::settings_service::SettingsService;
use tradewarden::domain::ports::{BrokerAdapter, BrokerEvent};
use tradewarden::domain::repositories::{SignalRepository, UserRepository};
use tradewarden::domain::signal::{Signal, SignalStatus};
use tradewarden::domain::types::{Side, UserId};
use tradewarden::domain::user::UserAccount;
use tradewarden::infrastructure::brokers::paper::PaperAdapter;
use tradewarden::infrastructure::brokers::simulation::{SimulationAdapter, SimulationDefaults};
use tradewarden::infrastructure::event_bus::EventBus;
use tradewarden::infrastructure::mock::MockBroker;
use tradewarden::infrastructure::repositories::in_memory::{
    InMemoryFeedbackRepository, InMemoryJournalRepository, InMemoryOrderRepository,
    InMemoryPositionRepository, InMemoryRiskDecisionRepository, InMemoryRiskStateRepository,
    InMemorySettingsRepository, InMemorySignalRepository, InMemoryStrategyBudgetRepository,
    InMemoryUserRepository,
};

pub const INITIAL_BALANCE: Decimal = dec!(10000);

pub struct TestSystem {
    pub events: EventBus,
    pub halt: Halt,
    pub settings: Arc<SettingsService>,
    pub monitor: Arc<RiskMonitor>,
    pub validator: Arc<RiskValidator>,
    pub engine: Arc<ExecutionEngine>,
    pub journal: Arc<JournalService>,
    pub analyzer: Arc<PerformanceAnalyzer>,
    pub feedback: Arc<FeedbackLoop>,
    pub lifecycle: Arc<PositionLifecycle>,
    pub simulation: Arc<SimulationAdapter>,
    pub mock_broker: Arc<MockBroker>,
    pub signals: Arc<InMemorySignalRepository>,
    pub orders: Arc<InMemoryOrderRepository>,
    pub positions: Arc<InMemoryPositionRepository>,
    pub state_repo: Arc<InMemoryRiskStateRepository>,
    pub budgets: Arc<InMemoryStrategyBudgetRepository>,
    pub decisions: Arc<InMemoryRiskDecisionRepository>,
    pub journal_repo: Arc<InMemoryJournalRepository>,
    pub users: Arc<InMemoryUserRepository>,
}

impl TestSystem {
    pub async fn new() -> Self {
        let events = EventBus::new();
        let halt = Halt::new();

        let signals = Arc::new(InMemorySignalRepository::new());
        let orders = Arc::new(InMemoryOrderRepository::new());
        let positions = Arc::new(InMemoryPositionRepository::new());
        let state_repo = Arc::new(InMemoryRiskStateRepository::new());
        let budgets = Arc::new(InMemoryStrategyBudgetRepository::new());
        let decisions = Arc::new(InMemoryRiskDecisionRepository::new());
        let journal_repo = Arc::new(InMemoryJournalRepository::new());
        let users = Arc::new(InMemoryUserRepository::new());
        let sim_accounts = Arc::new(
            tradewarden::infrastructure::repositories::in_memory::InMemorySimulationAccountRepository::new(),
        );

        let settings = Arc::new(SettingsService::new(
            Arc::new(InMemorySettingsRepository::new()),
            users.clone(),
            events.clone(),
        ));
        settings.get().await.unwrap();

        let monitor = Arc::new(RiskMonitor::new(
            state_repo.clone(),
            budgets.clone(),
            decisions.clone(),
            events.clone(),
            INITIAL_BALANCE,
        ));
        let validator = Arc::new(RiskValidator::new(
            monitor.clone(),
            state_repo.clone(),
            budgets.clone(),
            decisions.clone(),
            settings.clone(),
            events.clone(),
        ));
        let engine = Arc::new(ExecutionEngine::new(
            orders.clone(),
            signals.clone(),
            positions.clone(),
            settings.clone(),
            monitor.clone(),
            events.clone(),
            3,
            Duration::from_secs(5),
        ));

        let simulation = Arc::new(SimulationAdapter::new(
            sim_accounts,
            SimulationDefaults {
                initial_balance: INITIAL_BALANCE,
                latency_ms: 0,
                ..Default::default()
            },
        ));
        let paper = Arc::new(PaperAdapter::new(INITIAL_BALANCE, dec!(0.0001)));
        let mock_broker = Arc::new(MockBroker::new(INITIAL_BALANCE));
        engine.register_broker(simulation.clone()).await;
        engine.register_broker(paper).await;
        engine.register_broker(mock_broker.clone()).await;
        mock_broker.connect().await.unwrap();

        settings
            .register_mode_guard(Arc::new(EngineModeGuard::new(engine.clone())))
            .await;

        let journal = Arc::new(JournalService::new(journal_repo.clone(), events.clone()));
        let analyzer = Arc::new(PerformanceAnalyzer::new(journal_repo.clone()));
        let feedback = Arc::new(FeedbackLoop::new(
            analyzer.clone(),
            Arc::new(InMemoryFeedbackRepository::new()),
            budgets.clone(),
            monitor.clone(),
            settings.clone(),
            events.clone(),
            ChronoDuration::days(30),
        ));
        let lifecycle = Arc::new(PositionLifecycle::new(
            orders.clone(),
            positions.clone(),
            journal.clone(),
            monitor.clone(),
            settings.clone(),
            events.clone(),
        ));

        Self {
            events,
            halt,
            settings,
            monitor,
            validator,
            engine,
            journal,
            analyzer,
            feedback,
            lifecycle,
            simulation,
            mock_broker,
            signals,
            orders,
            positions,
            state_repo,
            budgets,
            decisions,
            journal_repo,
            users,
        }
    }

    /// Persist a well-formed long EURUSD signal for `user` and return it.
    pub async fn seed_signal(&self, user: UserId) -> Signal {
        let signal = Signal {
            id: Uuid::new_v4(),
            strategy_name: "nbb".to_string(),
            user_id: user,
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            entry: dec!(1.1000),
            stop_loss: dec!(1.0950),
            take_profit: dec!(1.1150),
            risk_pct: dec!(1.0),
            confidence: 0.8,
            status: SignalStatus::Pending,
            signal_time: Utc::now(),
        };
        self.signals.insert(&signal).await.unwrap();
        signal
    }

    pub async fn create_user(&self, email: &str, password: &str) -> UserId {
        let user = UserAccount {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: bcrypt::hash(password, 4).unwrap(),
            created_at: Utc::now(),
        };
        self.users.insert(&user).await.unwrap();
        user.id
    }

    /// Synchronously apply every pending simulation close event.
    pub async fn drain_sim_events(
        &self,
        rx: &mut tokio::sync::broadcast::Receiver<BrokerEvent>,
    ) -> usize {
        let mut handled = 0;
        while let Ok(BrokerEvent::PositionClosed {
            broker_order_id,
            exit_price,
            exit_reason,
            closed_at,
        }) = rx.try_recv()
        {
            self.lifecycle
                .handle_close(&broker_order_id, exit_price, exit_reason, closed_at)
                .await
                .unwrap();
            handled += 1;
        }
        handled
    }
}
