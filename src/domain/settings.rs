use crate::domain::constants::HardLimits;
use crate::domain::types::{BrokerType, ExecutionMode, TradingMode, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// The versioned singleton of soft limits and modes. Every mutation bumps
/// `version` and emits exactly one audit row in the same transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub version: i64,
    pub mode: TradingMode,
    pub exec_mode: ExecutionMode,
    pub broker_type: BrokerType,
    pub max_risk_per_trade_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub max_open_positions: u32,
    pub max_trades_per_day: u32,
    pub max_trades_per_hour: u32,
    pub min_risk_reward_ratio: Decimal,
    pub max_position_size_lots: Decimal,
    pub max_position_size_pct: Decimal,
    pub auto_disable_strategies: bool,
    pub strategy_disable_threshold: u32,
    pub cancel_orders_on_mode_switch: bool,
    pub require_confirmation_for_autonomous: bool,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
}

impl Settings {
    /// Bootstrap record: soft limits start equal to the hard caps, trading
    /// starts in the safest mode combination.
    pub fn defaults(hard: &HardLimits) -> Self {
        Self {
            version: 1,
            mode: TradingMode::Guide,
            exec_mode: ExecutionMode::Simulation,
            broker_type: BrokerType::Simulation,
            max_risk_per_trade_pct: hard.max_risk_per_trade_pct,
            max_daily_loss_pct: hard.max_daily_loss_pct,
            max_open_positions: hard.max_open_positions,
            max_trades_per_day: hard.max_trades_per_day,
            max_trades_per_hour: hard.max_trades_per_hour,
            min_risk_reward_ratio: hard.min_risk_reward_ratio,
            max_position_size_lots: hard.max_position_size_lots,
            max_position_size_pct: hard.max_position_size_pct,
            auto_disable_strategies: true,
            strategy_disable_threshold: hard.strategy_auto_disable_threshold,
            cancel_orders_on_mode_switch: true,
            require_confirmation_for_autonomous: true,
            updated_at: Utc::now(),
            updated_by: None,
        }
    }

    /// Bounds every soft limit by its hard counterpart and checks logical
    /// consistency between fields.
    pub fn validate(&self, hard: &HardLimits) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_risk_per_trade_pct <= Decimal::ZERO
            || self.max_risk_per_trade_pct > hard.max_risk_per_trade_pct
        {
            errors.push(format!(
                "max_risk_per_trade_pct {} outside (0, {}]",
                self.max_risk_per_trade_pct, hard.max_risk_per_trade_pct
            ));
        }
        if self.max_daily_loss_pct <= Decimal::ZERO
            || self.max_daily_loss_pct > hard.max_daily_loss_pct
        {
            errors.push(format!(
                "max_daily_loss_pct {} outside (0, {}]",
                self.max_daily_loss_pct, hard.max_daily_loss_pct
            ));
        }
        if self.max_open_positions == 0 || self.max_open_positions > hard.max_open_positions {
            errors.push(format!(
                "max_open_positions {} outside [1, {}]",
                self.max_open_positions, hard.max_open_positions
            ));
        }
        if self.max_trades_per_day == 0 || self.max_trades_per_day > hard.max_trades_per_day {
            errors.push(format!(
                "max_trades_per_day {} outside [1, {}]",
                self.max_trades_per_day, hard.max_trades_per_day
            ));
        }
        if self.max_trades_per_hour == 0 || self.max_trades_per_hour > hard.max_trades_per_hour {
            errors.push(format!(
                "max_trades_per_hour {} outside [1, {}]",
                self.max_trades_per_hour, hard.max_trades_per_hour
            ));
        }
        if self.min_risk_reward_ratio < hard.min_risk_reward_ratio {
            errors.push(format!(
                "min_risk_reward_ratio {} below hard floor {}",
                self.min_risk_reward_ratio, hard.min_risk_reward_ratio
            ));
        }
        if self.max_position_size_lots <= Decimal::ZERO
            || self.max_position_size_lots > hard.max_position_size_lots
        {
            errors.push(format!(
                "max_position_size_lots {} outside (0, {}]",
                self.max_position_size_lots, hard.max_position_size_lots
            ));
        }
        if self.max_position_size_pct <= Decimal::ZERO
            || self.max_position_size_pct > hard.max_position_size_pct
        {
            errors.push(format!(
                "max_position_size_pct {} outside (0, {}]",
                self.max_position_size_pct, hard.max_position_size_pct
            ));
        }
        if self.strategy_disable_threshold == 0
            || self.strategy_disable_threshold > hard.strategy_auto_disable_threshold
        {
            errors.push(format!(
                "strategy_disable_threshold {} outside [1, {}]",
                self.strategy_disable_threshold, hard.strategy_auto_disable_threshold
            ));
        }
        // A single max-risk trade must not be able to blow the daily budget.
        if self.max_daily_loss_pct < self.max_risk_per_trade_pct {
            errors.push(format!(
                "max_daily_loss_pct {} must be >= max_risk_per_trade_pct {}",
                self.max_daily_loss_pct, self.max_risk_per_trade_pct
            ));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Field-wise overlay of a patch. Returns the changed (old, new) subsets
    /// for the audit row; empty subsets mean an identity patch.
    pub fn apply_patch(&self, patch: &SettingsPatch) -> (Settings, serde_json::Value, serde_json::Value) {
        let mut next = self.clone();
        let mut old = serde_json::Map::new();
        let mut new = serde_json::Map::new();

        macro_rules! overlay {
            ($field:ident) => {
                if let Some(value) = &patch.$field {
                    if *value != next.$field {
                        old.insert(stringify!($field).to_string(), json!(next.$field));
                        new.insert(stringify!($field).to_string(), json!(value));
                        next.$field = value.clone();
                    }
                }
            };
        }

        overlay!(mode);
        overlay!(exec_mode);
        overlay!(broker_type);
        overlay!(max_risk_per_trade_pct);
        overlay!(max_daily_loss_pct);
        overlay!(max_open_positions);
        overlay!(max_trades_per_day);
        overlay!(max_trades_per_hour);
        overlay!(min_risk_reward_ratio);
        overlay!(max_position_size_lots);
        overlay!(max_position_size_pct);
        overlay!(auto_disable_strategies);
        overlay!(strategy_disable_threshold);
        overlay!(cancel_orders_on_mode_switch);
        overlay!(require_confirmation_for_autonomous);

        (
            next,
            serde_json::Value::Object(old),
            serde_json::Value::Object(new),
        )
    }
}

/// Partial update. Unknown keys are a request error, not a silent skip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    pub mode: Option<TradingMode>,
    pub exec_mode: Option<ExecutionMode>,
    pub broker_type: Option<BrokerType>,
    pub max_risk_per_trade_pct: Option<Decimal>,
    pub max_daily_loss_pct: Option<Decimal>,
    pub max_open_positions: Option<u32>,
    pub max_trades_per_day: Option<u32>,
    pub max_trades_per_hour: Option<u32>,
    pub min_risk_reward_ratio: Option<Decimal>,
    pub max_position_size_lots: Option<Decimal>,
    pub max_position_size_pct: Option<Decimal>,
    pub auto_disable_strategies: Option<bool>,
    pub strategy_disable_threshold: Option<u32>,
    pub cancel_orders_on_mode_switch: Option<bool>,
    pub require_confirmation_for_autonomous: Option<bool>,
}

impl SettingsPatch {
    pub fn touches_mode(&self) -> bool {
        self.mode.is_some() || self.exec_mode.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Bootstrap,
    Update,
    ModeChange,
}

/// Append-only record of one settings mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsAudit {
    pub id: Uuid,
    pub version: i64,
    pub changed_by: Option<UserId>,
    pub changed_at: DateTime<Utc>,
    pub change_type: ChangeType,
    pub old_values: serde_json::Value,
    pub new_values: serde_json::Value,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn defaults() -> Settings {
        Settings::defaults(HardLimits::get())
    }

    #[test]
    fn test_defaults_validate() {
        defaults().validate(HardLimits::get()).unwrap();
    }

    #[test]
    fn test_soft_limit_above_hard_rejected() {
        let mut s = defaults();
        s.max_risk_per_trade_pct = dec!(3.0); // hard cap is 2.0
        let errors = s.validate(HardLimits::get()).unwrap_err();
        assert!(errors[0].contains("max_risk_per_trade_pct"));
    }

    #[test]
    fn test_daily_loss_vs_per_trade_consistency() {
        let mut s = defaults();
        s.max_risk_per_trade_pct = dec!(2.0);
        s.max_daily_loss_pct = dec!(1.0);
        assert!(s.validate(HardLimits::get()).is_err());
    }

    #[test]
    fn test_identity_patch_produces_empty_subsets() {
        let s = defaults();
        let patch = SettingsPatch {
            mode: Some(s.mode),
            max_trades_per_day: Some(s.max_trades_per_day),
            ..Default::default()
        };
        let (next, old, new) = s.apply_patch(&patch);
        assert_eq!(next, s);
        assert!(old.as_object().unwrap().is_empty());
        assert!(new.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_patch_captures_changed_subset_only() {
        let s = defaults();
        let patch = SettingsPatch {
            max_trades_per_day: Some(5),
            ..Default::default()
        };
        let (next, old, new) = s.apply_patch(&patch);
        assert_eq!(next.max_trades_per_day, 5);
        assert_eq!(old.as_object().unwrap().len(), 1);
        assert_eq!(new["max_trades_per_day"], json!(5));
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let result: Result<SettingsPatch, _> =
            serde_json::from_str(r#"{"max_trades_per_day": 5, "advanced_tuning": true}"#);
        assert!(result.is_err());
    }
}
