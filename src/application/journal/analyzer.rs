use crate::domain::journal::{JournalEntry, PerformanceReport};
use crate::domain::repositories::JournalRepository;
use crate::domain::types::UserId;
use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;

/// Underperformance thresholds. Fixed by policy: at least ten closed trades
/// before any verdict, win rate under 40%, profit factor under 1.0, or a
/// five-trade losing streak.
pub const MIN_SAMPLE_SIZE: u32 = 10;
pub const MIN_WIN_RATE: f64 = 0.40;
pub const MIN_PROFIT_FACTOR: f64 = 1.0;
pub const MAX_CONSECUTIVE_LOSSES: u32 = 5;

/// Read-only analytics over the journal. Never writes anything.
pub struct PerformanceAnalyzer {
    journal: Arc<dyn JournalRepository>,
}

impl PerformanceAnalyzer {
    pub fn new(journal: Arc<dyn JournalRepository>) -> Self {
        Self { journal }
    }

    /// Aggregates the journal window for one (strategy, symbol).
    pub async fn analyze(
        &self,
        user_id: UserId,
        strategy_name: &str,
        symbol: &str,
        window: Duration,
    ) -> Result<PerformanceReport> {
        let since = Utc::now() - window;
        let entries = self
            .journal
            .window(user_id, strategy_name, symbol, since)
            .await?;
        Ok(report_from(strategy_name, symbol, &entries))
    }

    /// Whether the report (plus the live losing streak from the budget)
    /// flags this strategy as underperforming. A verdict needs the minimum
    /// sample; below it the answer is always no.
    pub fn detect_underperformance(
        &self,
        report: &PerformanceReport,
        consecutive_losses: u32,
    ) -> bool {
        if report.sample_size < MIN_SAMPLE_SIZE {
            return false;
        }
        report.win_rate < MIN_WIN_RATE
            || report.profit_factor < MIN_PROFIT_FACTOR
            || consecutive_losses >= MAX_CONSECUTIVE_LOSSES
    }
}

fn report_from(strategy_name: &str, symbol: &str, entries: &[JournalEntry]) -> PerformanceReport {
    let sample_size = entries.len() as u32;
    if sample_size == 0 {
        return PerformanceReport {
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            sample_size: 0,
            win_rate: 0.0,
            profit_factor: 0.0,
            expectancy: Decimal::ZERO,
            max_consecutive_losses: 0,
        };
    }

    let wins = entries.iter().filter(|e| e.pnl > Decimal::ZERO).count();
    let gross_profit: Decimal = entries
        .iter()
        .filter(|e| e.pnl > Decimal::ZERO)
        .map(|e| e.pnl)
        .sum();
    let gross_loss: Decimal = entries
        .iter()
        .filter(|e| e.pnl < Decimal::ZERO)
        .map(|e| -e.pnl)
        .sum();
    let net: Decimal = entries.iter().map(|e| e.pnl).sum();

    let win_rate = wins as f64 / sample_size as f64;
    let profit_factor = if gross_loss.is_zero() {
        // All-winning window: conventionally unbounded, reported as the
        // gross profit itself to stay finite.
        gross_profit.to_f64().unwrap_or(0.0).max(1.0)
    } else {
        (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
    };

    let mut max_streak = 0u32;
    let mut streak = 0u32;
    for entry in entries {
        if entry.pnl < Decimal::ZERO {
            streak += 1;
            max_streak = max_streak.max(streak);
        } else {
            streak = 0;
        }
    }

    PerformanceReport {
        strategy_name: strategy_name.to_string(),
        symbol: symbol.to_string(),
        sample_size,
        win_rate,
        profit_factor,
        expectancy: net / Decimal::from(sample_size),
        max_consecutive_losses: max_streak,
    }
}
