//! A single planned or chase entry.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::new_id;

/// Liquidity side of an order, selects the fee rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Maker,
    #[default]
    Taker,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Maker => "maker",
            OrderType::Taker => "taker",
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "maker" => Ok(Self::Maker),
            "taker" => Ok(Self::Taker),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

/// Addresses a step inside a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRef {
    /// Index into the auto-sized plan steps
    Planned(usize),
    /// Index into the manually managed chase steps
    Chase(usize),
}

impl std::fmt::Display for StepRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepRef::Planned(idx) => write!(f, "step {}", idx + 1),
            StepRef::Chase(idx) => write!(f, "chase step {}", idx + 1),
        }
    }
}

/// One entry of a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResizingStep {
    pub id: String,

    /// Entry price
    pub price: Decimal,

    /// Size in base units
    pub size: Decimal,

    /// size x price, cached for display
    pub cost: Decimal,

    pub order_type: OrderType,

    /// Fee charged on `cost` for this order type
    pub fee: Decimal,

    pub is_filled: bool,

    /// Exited; size and price are frozen from here on
    pub is_closed: bool,

    /// Break-even of this step and every step before it
    #[serde(rename = "predictedBE")]
    pub predicted_be: Decimal,
}

impl ResizingStep {
    /// Zero-priced, unfilled taker step.
    pub fn new() -> Self {
        Self {
            id: new_id(),
            price: Decimal::ZERO,
            size: Decimal::ZERO,
            cost: Decimal::ZERO,
            order_type: OrderType::Taker,
            fee: Decimal::ZERO,
            is_filled: false,
            is_closed: false,
            predicted_be: Decimal::ZERO,
        }
    }

    /// Filled and not yet exited.
    pub fn is_open_fill(&self) -> bool {
        self.is_filled && !self.is_closed
    }

    /// Counts towards active size and cost aggregates.
    pub fn is_active(&self) -> bool {
        !self.is_closed
    }

    pub fn notional(&self) -> Decimal {
        self.size * self.price
    }
}

impl Default for ResizingStep {
    fn default() -> Self {
        Self::new()
    }
}
