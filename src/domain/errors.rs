use crate::domain::order::OrderStatus;
use crate::domain::signal::SignalStatus;
use crate::domain::types::{BrokerType, ExecutionMode};
use thiserror::Error;

/// Errors from the settings store. Validation and version conflicts are
/// surfaced to the caller; nothing here is retried blindly.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings validation failed: {0}")]
    ValidationFailed(String),

    #[error("version conflict: settings changed underneath the update")]
    VersionConflict,

    #[error("mode transition blocked: {reason}")]
    ModeBlocked { reason: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl SettingsError {
    pub fn code(&self) -> &'static str {
        match self {
            SettingsError::ValidationFailed(_) => "validation_failed",
            SettingsError::VersionConflict => "version_conflict",
            SettingsError::ModeBlocked { .. } => "mode_blocked",
            SettingsError::Persistence(_) => "persistence",
        }
    }
}

/// Stable broker failure categories. `Transport` and `Timeout` are the only
/// retriable kinds; `Rejected` is terminal for the order.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker not connected")]
    NotConnected,

    #[error("broker rejected order: {reason}")]
    Rejected { reason: String },

    #[error("transport failure: {reason}")]
    Transport { reason: String },

    #[error("broker call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("unknown broker order id: {id}")]
    UnknownOrder { id: String },
}

impl BrokerError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, BrokerError::Transport { .. } | BrokerError::Timeout { .. })
    }
}

/// Errors out of `ExecutionEngine::execute` and the order lifecycle. Risk
/// rejections are *not* here: a veto is a recorded decision, not an error.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("signal is not executable in status {status}")]
    SignalNotExecutable { status: SignalStatus },

    #[error("signal not found")]
    SignalNotFound,

    #[error("order not found")]
    OrderNotFound,

    #[error("execution blocked in {exec_mode} mode: {reason}")]
    ModeBlocked {
        exec_mode: ExecutionMode,
        reason: String,
    },

    #[error("no adapter registered for broker {0}")]
    UnknownBroker(BrokerType),

    #[error("order in status {status} cannot be cancelled")]
    NotCancellable { status: OrderStatus },

    #[error(transparent)]
    InvalidTransition(#[from] crate::domain::order::InvalidTransition),

    #[error("broker failure: {0}")]
    Broker(#[from] BrokerError),

    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl ExecutionError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::SignalNotExecutable { .. } => "signal_not_executable",
            ExecutionError::SignalNotFound => "signal_not_found",
            ExecutionError::OrderNotFound => "order_not_found",
            ExecutionError::ModeBlocked { .. } => "mode_blocked",
            ExecutionError::UnknownBroker(_) => "unknown_broker",
            ExecutionError::NotCancellable { .. } => "not_cancellable",
            ExecutionError::InvalidTransition(_) => "invalid_transition",
            ExecutionError::Broker(_) => "broker",
            ExecutionError::Persistence(_) => "persistence",
        }
    }
}
