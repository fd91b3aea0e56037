//! Reference advisor. Strategy internals are a port; this crate ships one
//! simple SMA-cross implementation so the full cycle is drivable end-to-end.

use crate::domain::ports::Strategy;
use crate::domain::signal::SignalDraft;
use crate::domain::types::{Candle, Side};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Proposes a long when the fast mean crosses above the slow mean, a short
/// on the opposite cross. Stops are placed a fixed multiple of the recent
/// range away from entry.
pub struct SmaCrossStrategy {
    name: String,
    fast_period: usize,
    slow_period: usize,
    risk_pct: Decimal,
    reward_multiple: Decimal,
}

impl SmaCrossStrategy {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        Self {
            name: "sma_cross".to_string(),
            fast_period,
            slow_period,
            risk_pct: dec!(1.0),
            reward_multiple: dec!(2.0),
        }
    }

    fn sma(candles: &[Candle], period: usize) -> Option<Decimal> {
        if candles.len() < period || period == 0 {
            return None;
        }
        let sum: Decimal = candles[candles.len() - period..]
            .iter()
            .map(|c| c.close)
            .sum();
        Some(sum / Decimal::from(period as u64))
    }

    fn recent_range(candles: &[Candle], period: usize) -> Option<Decimal> {
        let window = &candles[candles.len().saturating_sub(period)..];
        let high = window.iter().map(|c| c.high).max()?;
        let low = window.iter().map(|c| c.low).min()?;
        let range = high - low;
        if range.is_zero() { None } else { Some(range) }
    }
}

impl Default for SmaCrossStrategy {
    fn default() -> Self {
        Self::new(5, 20)
    }
}

#[async_trait]
impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, candles: &[Candle]) -> Result<Option<SignalDraft>> {
        if candles.len() < self.slow_period + 1 {
            return Ok(None);
        }

        let prev = &candles[..candles.len() - 1];
        let (Some(fast_prev), Some(slow_prev)) = (
            Self::sma(prev, self.fast_period),
            Self::sma(prev, self.slow_period),
        ) else {
            return Ok(None);
        };
        let (Some(fast_now), Some(slow_now)) = (
            Self::sma(candles, self.fast_period),
            Self::sma(candles, self.slow_period),
        ) else {
            return Ok(None);
        };

        let side = if fast_prev <= slow_prev && fast_now > slow_now {
            Side::Long
        } else if fast_prev >= slow_prev && fast_now < slow_now {
            Side::Short
        } else {
            return Ok(None);
        };

        let Some(last) = candles.last() else {
            return Ok(None);
        };
        let Some(range) = Self::recent_range(candles, self.fast_period) else {
            return Ok(None);
        };
        let entry = last.close;
        let (stop_loss, take_profit) = match side {
            Side::Long => (entry - range, entry + range * self.reward_multiple),
            Side::Short => (entry + range, entry - range * self.reward_multiple),
        };

        let spread = (fast_now - slow_now).abs();
        let confidence = if slow_now.is_zero() {
            0.5
        } else {
            use rust_decimal::prelude::ToPrimitive;
            (0.5 + (spread / slow_now).to_f64().unwrap_or(0.0) * 50.0).min(0.95)
        };

        Ok(Some(SignalDraft {
            symbol: last.symbol.clone(),
            side,
            entry,
            stop_loss,
            take_profit,
            risk_pct: self.risk_pct,
            confidence,
        }))
    }
}
