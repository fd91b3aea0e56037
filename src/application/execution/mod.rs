pub mod engine;
pub mod lifecycle;
pub mod order_monitor;

pub use engine::{EngineModeGuard, ExecuteRequest, ExecutionEngine};
pub use lifecycle::PositionLifecycle;
pub use order_monitor::OrderMonitorLoop;
