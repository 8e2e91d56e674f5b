//! Trading account: balance, fee schedule and realized bookkeeping.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{new_id, OrderType, Position, PositionStatus};

/// Maker/taker fee rates as fractions of notional (0.0005 = 0.05%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeeSchedule {
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
}

impl FeeSchedule {
    pub fn new(maker_fee: Decimal, taker_fee: Decimal) -> Self {
        Self { maker_fee, taker_fee }
    }

    pub fn rate_for(&self, order_type: OrderType) -> Decimal {
        match order_type {
            OrderType::Maker => self.maker_fee,
            OrderType::Taker => self.taker_fee,
        }
    }
}

/// Account holding positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub initial_balance: Decimal,

    /// Initial balance plus deposits, withdrawals and realized PnL
    pub current_balance: Decimal,
    pub taker_fee: Decimal,
    pub maker_fee: Decimal,
}

/// Realized figures over an account's closed positions.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountStats {
    pub realized_pnl: Decimal,
    pub total_fees: Decimal,
    pub net_deposits: Decimal,
    pub current_balance: Decimal,
    pub closed_positions: usize,
    pub winning_positions: usize,
    /// Winning share of closed positions (0.0 to 1.0)
    pub win_rate: f64,
}

impl Account {
    pub fn new(name: impl Into<String>, initial_balance: Decimal) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            initial_balance,
            current_balance: initial_balance,
            taker_fee: dec!(0.0005),
            maker_fee: dec!(0.0002),
        }
    }

    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule::new(self.maker_fee, self.taker_fee)
    }

    /// Recompute `current_balance` from the closed positions and balance
    /// changes that belong to this account.
    pub fn calculate_stats(&mut self, positions: &[Position], changes: &[AccountChange]) -> AccountStats {
        let closed: Vec<&Position> = positions
            .iter()
            .filter(|p| p.account_id == self.id && p.status == PositionStatus::Closed)
            .filter(|p| p.pnl.is_some())
            .collect();

        let realized_pnl: Decimal = closed.iter().filter_map(|p| p.pnl).sum();
        let total_fees: Decimal = closed.iter().map(|p| p.fee_total).sum();
        let winning_positions = closed
            .iter()
            .filter(|p| p.pnl.is_some_and(|pnl| pnl > Decimal::ZERO))
            .count();
        let net_deposits: Decimal = changes
            .iter()
            .filter(|c| c.account_id == self.id)
            .map(|c| c.signed_amount())
            .sum();

        self.current_balance = self.initial_balance + net_deposits + realized_pnl;

        let win_rate = if closed.is_empty() {
            0.0
        } else {
            winning_positions as f64 / closed.len() as f64
        };

        AccountStats {
            realized_pnl,
            total_fees,
            net_deposits,
            current_balance: self.current_balance,
            closed_positions: closed.len(),
            winning_positions,
            win_rate,
        }
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new("Main Account", dec!(10000))
    }
}

/// Direction of a manual balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountChangeType {
    #[default]
    Deposit,
    Withdrawal,
}

/// Deposit or withdrawal recorded against an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountChange {
    pub id: String,
    pub account_id: String,

    /// Always non-negative; direction comes from `change_type`
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub change_type: AccountChangeType,
    pub note: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl AccountChange {
    pub fn new(account_id: impl Into<String>, amount: Decimal, change_type: AccountChangeType) -> Self {
        Self {
            id: new_id(),
            account_id: account_id.into(),
            amount: amount.abs(),
            change_type,
            note: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Amount with withdrawals negated.
    pub fn signed_amount(&self) -> Decimal {
        match self.change_type {
            AccountChangeType::Deposit => self.amount,
            AccountChangeType::Withdrawal => -self.amount,
        }
    }
}

impl Default for AccountChange {
    fn default() -> Self {
        Self::new(String::new(), Decimal::ZERO, AccountChangeType::Deposit)
    }
}
