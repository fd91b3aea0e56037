use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::OnceLock;
use thiserror::Error;

/// Compile-time risk ceilings. No setting, request, or computed limit may
/// exceed these; soft limits are clamped against them at validation time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardLimits {
    pub max_risk_per_trade_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub emergency_drawdown_pct: Decimal,
    pub max_open_positions: u32,
    pub max_trades_per_day: u32,
    pub max_trades_per_hour: u32,
    pub min_risk_reward_ratio: Decimal,
    pub max_position_size_lots: Decimal,
    pub max_position_size_pct: Decimal,
    pub strategy_auto_disable_threshold: u32,
}

#[derive(Debug, Error)]
#[error("hard limit {name} = {value} outside sanity band {band}")]
pub struct HardLimitViolation {
    pub name: &'static str,
    pub value: String,
    pub band: &'static str,
}

static LIMITS: OnceLock<HardLimits> = OnceLock::new();

impl HardLimits {
    /// The frozen limit table. Same values for the life of the process.
    pub fn get() -> &'static HardLimits {
        LIMITS.get_or_init(|| HardLimits {
            max_risk_per_trade_pct: dec!(2.0),
            max_daily_loss_pct: dec!(5.0),
            emergency_drawdown_pct: dec!(15.0),
            max_open_positions: 10,
            max_trades_per_day: 20,
            max_trades_per_hour: 5,
            min_risk_reward_ratio: dec!(1.5),
            max_position_size_lots: dec!(1.0),
            max_position_size_pct: dec!(10.0),
            strategy_auto_disable_threshold: 5,
        })
    }

    /// Startup self-check. Every constant must sit inside its declared sanity
    /// band; a violation means the binary was built wrong and must not trade.
    pub fn validate(&self) -> Result<(), HardLimitViolation> {
        fn band_dec(
            name: &'static str,
            value: Decimal,
            lo_excl: Decimal,
            hi_incl: Decimal,
            band: &'static str,
        ) -> Result<(), HardLimitViolation> {
            if value <= lo_excl || value > hi_incl {
                return Err(HardLimitViolation {
                    name,
                    value: value.to_string(),
                    band,
                });
            }
            Ok(())
        }

        fn band_int(
            name: &'static str,
            value: u32,
            lo: u32,
            hi: u32,
            band: &'static str,
        ) -> Result<(), HardLimitViolation> {
            if value < lo || value > hi {
                return Err(HardLimitViolation {
                    name,
                    value: value.to_string(),
                    band,
                });
            }
            Ok(())
        }

        band_dec(
            "max_risk_per_trade_pct",
            self.max_risk_per_trade_pct,
            dec!(0),
            dec!(5.0),
            "(0, 5.0]",
        )?;
        band_dec(
            "max_daily_loss_pct",
            self.max_daily_loss_pct,
            dec!(0),
            dec!(10.0),
            "(0, 10.0]",
        )?;
        band_dec(
            "emergency_drawdown_pct",
            self.emergency_drawdown_pct,
            dec!(4.9),
            dec!(50.0),
            "[5.0, 50.0]",
        )?;
        band_int("max_open_positions", self.max_open_positions, 1, 50, "[1, 50]")?;
        band_int("max_trades_per_day", self.max_trades_per_day, 1, 100, "[1, 100]")?;
        band_int("max_trades_per_hour", self.max_trades_per_hour, 1, 20, "[1, 20]")?;
        band_dec(
            "min_risk_reward_ratio",
            self.min_risk_reward_ratio,
            dec!(0.9),
            dec!(10.0),
            "[1.0, 10.0]",
        )?;
        band_dec(
            "max_position_size_lots",
            self.max_position_size_lots,
            dec!(0),
            dec!(10.0),
            "(0, 10.0]",
        )?;
        band_dec(
            "max_position_size_pct",
            self.max_position_size_pct,
            dec!(0),
            dec!(25.0),
            "(0, 25.0]",
        )?;
        band_int(
            "strategy_auto_disable_threshold",
            self.strategy_auto_disable_threshold,
            1,
            20,
            "[1, 20]",
        )?;

        // Cross-field sanity: the daily loss budget must be able to absorb at
        // least one max-risk trade.
        if self.max_daily_loss_pct < self.max_risk_per_trade_pct {
            return Err(HardLimitViolation {
                name: "max_daily_loss_pct",
                value: self.max_daily_loss_pct.to_string(),
                band: ">= max_risk_per_trade_pct",
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frozen_limits_pass_self_check() {
        HardLimits::get().validate().expect("shipped limits must be sane");
    }

    #[test]
    fn test_get_is_stable() {
        assert_eq!(HardLimits::get(), HardLimits::get());
    }

    #[test]
    fn test_out_of_band_risk_pct_rejected() {
        let mut limits = *HardLimits::get();
        limits.max_risk_per_trade_pct = dec!(7.5);
        let err = limits.validate().unwrap_err();
        assert_eq!(err.name, "max_risk_per_trade_pct");
    }

    #[test]
    fn test_zero_open_positions_rejected() {
        let mut limits = *HardLimits::get();
        limits.max_open_positions = 0;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_daily_loss_must_cover_one_trade() {
        let mut limits = *HardLimits::get();
        limits.max_daily_loss_pct = dec!(1.0); // below max_risk_per_trade_pct
        let err = limits.validate().unwrap_err();
        assert_eq!(err.band, ">= max_risk_per_trade_pct");
    }
}
