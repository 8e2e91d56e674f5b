//! Planner configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::FeeSchedule;

/// Defaults applied to new accounts and positions, plus store behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maker fee for new accounts, fraction of notional
    pub maker_fee: Decimal,

    /// Taker fee for new accounts, fraction of notional
    pub taker_fee: Decimal,

    /// Starting balance of the seeded default account
    pub initial_balance: Decimal,

    /// Risk amount of new positions
    pub default_risk: Decimal,

    /// Leverage of new positions
    pub default_leverage: Decimal,

    pub default_symbol: String,

    /// Give up persisting a write after this many seconds of retries
    pub persist_retry_secs: u64,

    /// Rows per page of the closed-position history
    pub history_per_page: usize,
}

impl PlannerConfig {
    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule::new(self.maker_fee, self.taker_fee)
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            maker_fee: dec!(0.0002),       // 0.02%
            taker_fee: dec!(0.0005),       // 0.05%
            initial_balance: dec!(10000),
            default_risk: dec!(100),
            default_leverage: dec!(1),
            default_symbol: "BTCUSDT".to_string(),
            persist_retry_secs: 5,
            history_per_page: 10,
        }
    }
}
