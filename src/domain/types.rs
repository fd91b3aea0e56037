use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque tenant identity. Resolved by the auth layer; every persisted entity
/// carries one and cross-tenant reads filter on it.
pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
        }
    }
}

/// Policy governing whether trades may execute without per-trade user approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Guide,
    Autonomous,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Guide => write!(f, "guide"),
            TradingMode::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl std::str::FromStr for TradingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "guide" => Ok(TradingMode::Guide),
            "autonomous" => Ok(TradingMode::Autonomous),
            _ => anyhow::bail!("Invalid mode: {}. Must be 'guide' or 'autonomous'", s),
        }
    }
}

/// Policy selecting the broker adapter and the real-money gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Simulation,
    Paper,
    Live,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Simulation => write!(f, "simulation"),
            ExecutionMode::Paper => write!(f, "paper"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulation" => Ok(ExecutionMode::Simulation),
            "paper" => Ok(ExecutionMode::Paper),
            "live" => Ok(ExecutionMode::Live),
            _ => anyhow::bail!(
                "Invalid execution mode: {}. Must be 'simulation', 'paper' or 'live'",
                s
            ),
        }
    }
}

/// Which adapter implementation a submission is routed through. `Mock` exists
/// for wiring tests against an in-process fake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerType {
    Simulation,
    Paper,
    Mock,
}

impl fmt::Display for BrokerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerType::Simulation => write!(f, "simulation"),
            BrokerType::Paper => write!(f, "paper"),
            BrokerType::Mock => write!(f, "mock"),
        }
    }
}

impl std::str::FromStr for BrokerType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulation" => Ok(BrokerType::Simulation),
            "paper" => Ok(BrokerType::Paper),
            "mock" => Ok(BrokerType::Mock),
            _ => anyhow::bail!("Invalid broker type: {}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip() {
        assert_eq!("autonomous".parse::<TradingMode>().unwrap(), TradingMode::Autonomous);
        assert_eq!(TradingMode::Guide.to_string(), "guide");
    }

    #[test]
    fn test_exec_mode_rejects_unknown() {
        assert!("production".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_side_serde_is_snake_case() {
        assert_eq!(serde_json::to_string(&Side::Long).unwrap(), "\"long\"");
    }
}
