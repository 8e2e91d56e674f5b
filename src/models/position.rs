//! Position aggregate: owns the planned steps, chase steps and derived figures.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{new_id, FeeSchedule, ResizingStep, Setup, StepRef};
use crate::fixed::Fixed;
use crate::trading::{self, PositionSizer};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// Loss per unit if the stop is hit after entering at `price`.
    /// Negative when the stop sits on the profitable side of the entry.
    pub fn loss_per_unit(&self, price: Fixed, stop_loss: Fixed) -> Fixed {
        match self {
            Side::Long => price - stop_loss,
            Side::Short => stop_loss - price,
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" | "buy" => Ok(Self::Long),
            "short" | "sell" => Ok(Self::Short),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Position lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    #[default]
    Planning,
    Opened,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Planning => "planning",
            PositionStatus::Opened => "opened",
            PositionStatus::Closed => "closed",
        }
    }
}

/// A planned trade with its entry steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Position {
    pub id: String,
    pub account_id: String,
    pub side: Side,
    pub symbol: String,

    /// May reference a soft-deleted setup
    pub setup_id: String,
    pub status: PositionStatus,

    pub stop_loss_price: Decimal,

    /// Amount the user accepts to lose if the stop is hit
    pub risk_amount: Decimal,
    pub leverage: Decimal,

    /// Auto-sized entries, one per setup step
    pub steps: Vec<ResizingStep>,

    /// Manually priced and sized entries
    pub chase_steps: Vec<ResizingStep>,

    /// Realized net result, required before closing
    pub pnl: Option<Decimal>,

    pub fee_total: Decimal,
    #[serde(rename = "currentBE")]
    pub current_be: Decimal,
    #[serde(rename = "predictedBE")]
    pub predicted_be: Decimal,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Create a planning position with the default risk of 100 at 1x.
    pub fn new(account_id: impl Into<String>, symbol: impl Into<String>, side: Side) -> Self {
        Self {
            id: new_id(),
            account_id: account_id.into(),
            side,
            symbol: symbol.into(),
            setup_id: String::new(),
            status: PositionStatus::Planning,
            stop_loss_price: Decimal::ZERO,
            risk_amount: dec!(100),
            leverage: Decimal::ONE,
            steps: Vec::new(),
            chase_steps: Vec::new(),
            pnl: None,
            fee_total: Decimal::ZERO,
            current_be: Decimal::ZERO,
            predicted_be: Decimal::ZERO,
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Size the step array to the setup's shape.
    pub fn apply_setup(&mut self, setup: &Setup) {
        trading::apply_plan(self, setup);
    }

    /// Re-size every unfilled step against the current risk inputs.
    pub fn recalculate(&mut self, setup: &Setup, account_balance: Decimal, fees: Option<FeeSchedule>) {
        PositionSizer::new(account_balance, fees).recalculate(self, setup);
    }

    /// Notional of the active steps divided by leverage.
    pub fn margin_estimate(&self) -> Decimal {
        trading::margin_estimate(self)
    }

    /// Margin estimate as a percentage of `account_balance`.
    pub fn margin_usage_pct(&self, account_balance: Decimal) -> Decimal {
        if account_balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.margin_estimate() / account_balance * dec!(100)
    }

    /// Planned steps followed by chase steps.
    pub fn all_steps(&self) -> impl Iterator<Item = &ResizingStep> {
        self.steps.iter().chain(self.chase_steps.iter())
    }

    pub fn step(&self, step: StepRef) -> Option<&ResizingStep> {
        match step {
            StepRef::Planned(idx) => self.steps.get(idx),
            StepRef::Chase(idx) => self.chase_steps.get(idx),
        }
    }

    pub fn step_mut(&mut self, step: StepRef) -> Option<&mut ResizingStep> {
        match step {
            StepRef::Planned(idx) => self.steps.get_mut(idx),
            StepRef::Chase(idx) => self.chase_steps.get_mut(idx),
        }
    }

    /// Total size of the non-closed steps.
    pub fn active_size(&self) -> Decimal {
        self.all_steps().filter(|s| s.is_active()).map(|s| s.size).sum()
    }

    /// Total notional of the non-closed steps.
    pub fn active_cost(&self) -> Decimal {
        self.all_steps().filter(|s| s.is_active()).map(|s| s.notional()).sum()
    }

    /// Loss across planned steps if the stop is hit. Steps whose entry is on
    /// the wrong side of the stop contribute nothing.
    pub fn risk_at_stop(&self) -> Decimal {
        let stop = Fixed::from(self.stop_loss_price);
        self.steps
            .iter()
            .filter(|s| s.price > Decimal::ZERO && s.size > Decimal::ZERO)
            .map(|s| {
                let loss = self.side.loss_per_unit(Fixed::from(s.price), stop).max(Fixed::ZERO);
                (Fixed::from(s.size) * loss).into_decimal()
            })
            .sum()
    }

    /// Lowest and highest positive entry price across all steps.
    pub fn step_price_range(&self) -> Option<(Decimal, Decimal)> {
        self.all_steps()
            .map(|s| s.price)
            .filter(|p| *p > Decimal::ZERO)
            .fold(None, |range, price| match range {
                None => Some((price, price)),
                Some((lo, hi)) => Some((lo.min(price), hi.max(price))),
            })
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(String::new(), String::new(), Side::Long)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priced(price: Decimal, size: Decimal) -> ResizingStep {
        ResizingStep {
            price,
            size,
            ..ResizingStep::new()
        }
    }

    #[test]
    fn test_loss_per_unit_by_side() {
        let price = Fixed::from(dec!(100));
        let stop = Fixed::from(dec!(95));
        assert_eq!(Side::Long.loss_per_unit(price, stop).into_decimal(), dec!(5));
        assert_eq!(Side::Short.loss_per_unit(price, stop).into_decimal(), dec!(-5));
    }

    #[test]
    fn test_active_aggregates_skip_closed_steps() {
        let mut pos = Position::new("acc", "BTCUSDT", Side::Long);
        pos.steps.push(priced(dec!(100), dec!(2)));
        pos.steps.push(priced(dec!(90), dec!(1)));
        pos.chase_steps.push(priced(dec!(80), dec!(1)));
        pos.steps[1].is_filled = true;
        pos.steps[1].is_closed = true;

        assert_eq!(pos.active_size(), dec!(3));
        assert_eq!(pos.active_cost(), dec!(280));
        assert_eq!(pos.step_price_range(), Some((dec!(80), dec!(100))));
    }

    #[test]
    fn test_margin_usage_pct() {
        let mut pos = Position::new("acc", "ETHUSDT", Side::Long);
        pos.leverage = dec!(5);
        pos.steps.push(priced(dec!(100), dec!(10)));

        assert_eq!(pos.margin_estimate(), dec!(200));
        assert_eq!(pos.margin_usage_pct(dec!(1000)), dec!(20));
        assert_eq!(pos.margin_usage_pct(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_json_uses_plain_field_names() {
        let mut pos = Position::new("acc-1", "BTCUSDT", Side::Short);
        pos.steps.push(ResizingStep::new());
        let json = serde_json::to_value(&pos).unwrap();

        assert_eq!(json["accountId"], "acc-1");
        assert_eq!(json["side"], "short");
        assert_eq!(json["status"], "planning");
        assert!(json.get("predictedBE").is_some());
        assert!(json.get("currentBE").is_some());
        assert!(json["steps"][0].get("isFilled").is_some());
        assert!(json["closedAt"].is_null());

        let back: Position = serde_json::from_value(json).unwrap();
        assert_eq!(back, Position { created_at: back.created_at, ..pos.clone() });
    }

    #[test]
    fn test_decimals_export_as_json_numbers() {
        let mut pos = Position::new("acc-1", "BTCUSDT", Side::Long);
        pos.risk_amount = dec!(25);
        pos.steps.push(priced(dec!(12.5), dec!(0.00012345)));

        let text = serde_json::to_string(&pos).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert!(json["riskAmount"].is_number());
        assert!(json["steps"][0]["price"].is_number());
        assert!(text.contains(r#""price":12.5"#));
        assert!(text.contains(r#""size":0.00012345"#));

        let back: Position = serde_json::from_str(&text).unwrap();
        assert_eq!(back.steps[0].size, dec!(0.00012345));
    }

    #[test]
    fn test_rehydrate_accepts_string_decimals() {
        let json = r#"{
            "id": "p1", "accountId": "a1", "side": "short", "symbol": "SOL",
            "setupId": "s1", "stopLossPrice": "110.5", "riskAmount": "10",
            "leverage": "3", "createdAt": 1700000000000
        }"#;
        let pos: Position = serde_json::from_str(json).unwrap();

        assert_eq!(pos.stop_loss_price, dec!(110.5));
        assert_eq!(pos.leverage, dec!(3));
    }

    #[test]
    fn test_rehydrate_from_numeric_json() {
        let json = r#"{
            "id": "p1", "accountId": "a1", "side": "long", "symbol": "SOL",
            "setupId": "s1", "status": "opened", "stopLossPrice": 90,
            "riskAmount": 10, "leverage": 2, "createdAt": 1700000000000,
            "steps": [{"id": "st1", "price": 100, "size": 1, "cost": 100,
                       "orderType": "maker", "fee": 1, "isFilled": true,
                       "predictedBE": 101}]
        }"#;
        let pos: Position = serde_json::from_str(json).unwrap();

        assert_eq!(pos.status, PositionStatus::Opened);
        assert_eq!(pos.steps[0].predicted_be, dec!(101));
        assert!(!pos.steps[0].is_closed);
        assert!(pos.chase_steps.is_empty());
        assert_eq!(pos.created_at.timestamp_millis(), 1_700_000_000_000);
    }
}
