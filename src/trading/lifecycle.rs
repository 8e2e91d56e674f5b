//! Typed edits to a position and the lifecycle rules they enforce.
//!
//! Every user action on a position is expressed as a [`PositionEdit`]. An
//! edit validates its input against the current position before touching
//! it, so a rejected edit leaves the position unchanged. Status moves
//! forward only: `planning -> opened` on the first fill, `-> closed` on an
//! explicit close once a realized PnL is known.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::models::{OrderType, Position, PositionStatus, ResizingStep, Side, StepRef};

/// Highest leverage accepted; larger requests are clamped.
pub const MAX_LEVERAGE: Decimal = dec!(125);

/// Reasons an edit is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("risk amount must be greater than 0")]
    InvalidRiskAmount,

    #[error("leverage must be greater than 0")]
    InvalidLeverage,

    #[error("stop loss must be below the lowest step price ({lowest}) for a long position")]
    StopLossAboveEntries { lowest: Decimal },

    #[error("stop loss must be above the highest step price ({highest}) for a short position")]
    StopLossBelowEntries { highest: Decimal },

    #[error("{field} must not be negative")]
    Negative { field: &'static str },

    #[error("{0} does not exist")]
    UnknownStep(StepRef),

    #[error("{0} is closed")]
    StepClosed(StepRef),

    #[error("{0} must be filled before it can be closed")]
    StepNotFilled(StepRef),

    #[error("planned step sizes come from the risk budget; only chase steps can be sized by hand")]
    PlannedStepSize,

    #[error("realized PnL must be set before closing the position")]
    MissingPnl,

    #[error("position is closed")]
    PositionClosed,
}

/// A single change requested on a position.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEdit {
    SetSide(Side),
    SetSymbol(String),
    SetRiskAmount(Decimal),
    SetStopLoss(Decimal),
    SetLeverage(Decimal),
    SetStepPrice { step: StepRef, price: Decimal },
    SetStepSize { step: StepRef, size: Decimal },
    SetOrderType { step: StepRef, order_type: OrderType },
    SetFilled { step: StepRef, filled: bool },
    CloseStep(StepRef),
    AddChaseStep,
    RemoveChaseStep(usize),
    SetPnl(Option<Decimal>),
    ClosePosition,
}

impl PositionEdit {
    /// Whether sizes, fees or break-evens may change after this edit.
    pub fn needs_recalculation(&self) -> bool {
        !matches!(
            self,
            PositionEdit::SetSymbol(_) | PositionEdit::SetPnl(_) | PositionEdit::ClosePosition
        )
    }

    /// Validate and apply the edit. `now` stamps `closed_at` on close.
    pub fn apply(self, position: &mut Position, now: DateTime<Utc>) -> Result<(), EditError> {
        if position.is_closed() && !matches!(self, PositionEdit::SetPnl(_)) {
            return Err(EditError::PositionClosed);
        }

        match self {
            PositionEdit::SetSide(side) => position.side = side,
            PositionEdit::SetSymbol(symbol) => position.symbol = symbol.trim().to_uppercase(),
            PositionEdit::SetRiskAmount(amount) => {
                if amount <= Decimal::ZERO {
                    return Err(EditError::InvalidRiskAmount);
                }
                position.risk_amount = amount;
            }
            PositionEdit::SetStopLoss(price) => {
                validate_stop_loss(position, price)?;
                position.stop_loss_price = price;
            }
            PositionEdit::SetLeverage(leverage) => {
                if leverage <= Decimal::ZERO {
                    return Err(EditError::InvalidLeverage);
                }
                position.leverage = leverage.min(MAX_LEVERAGE);
            }
            PositionEdit::SetStepPrice { step, price } => {
                if price < Decimal::ZERO {
                    return Err(EditError::Negative { field: "price" });
                }
                open_step(position, step)?.price = price;
            }
            PositionEdit::SetStepSize { step, size } => {
                if matches!(step, StepRef::Planned(_)) {
                    return Err(EditError::PlannedStepSize);
                }
                if size < Decimal::ZERO {
                    return Err(EditError::Negative { field: "size" });
                }
                open_step(position, step)?.size = size;
            }
            PositionEdit::SetOrderType { step, order_type } => {
                open_step(position, step)?.order_type = order_type;
            }
            PositionEdit::SetFilled { step, filled } => set_filled(position, step, filled)?,
            PositionEdit::CloseStep(step) => {
                let target = position.step_mut(step).ok_or(EditError::UnknownStep(step))?;
                if target.is_closed {
                    return Err(EditError::StepClosed(step));
                }
                if !target.is_filled {
                    return Err(EditError::StepNotFilled(step));
                }
                target.is_closed = true;
            }
            PositionEdit::AddChaseStep => position.chase_steps.push(ResizingStep::new()),
            PositionEdit::RemoveChaseStep(idx) => {
                if idx >= position.chase_steps.len() {
                    return Err(EditError::UnknownStep(StepRef::Chase(idx)));
                }
                position.chase_steps.remove(idx);
            }
            PositionEdit::SetPnl(pnl) => position.pnl = pnl,
            PositionEdit::ClosePosition => {
                if position.pnl.is_none() {
                    return Err(EditError::MissingPnl);
                }
                position.status = PositionStatus::Closed;
                position.closed_at = Some(now);
            }
        }

        Ok(())
    }
}

/// A long stop must sit below every entry, a short stop above every entry.
pub fn validate_stop_loss(position: &Position, stop_loss: Decimal) -> Result<(), EditError> {
    if stop_loss < Decimal::ZERO {
        return Err(EditError::Negative { field: "stop loss" });
    }
    let Some((lowest, highest)) = position.step_price_range() else {
        return Ok(());
    };

    match position.side {
        Side::Long if stop_loss >= lowest => Err(EditError::StopLossAboveEntries { lowest }),
        Side::Short if stop_loss <= highest => Err(EditError::StopLossBelowEntries { highest }),
        _ => Ok(()),
    }
}

fn open_step(position: &mut Position, step: StepRef) -> Result<&mut ResizingStep, EditError> {
    let target = position.step_mut(step).ok_or(EditError::UnknownStep(step))?;
    if target.is_closed {
        return Err(EditError::StepClosed(step));
    }
    Ok(target)
}

fn set_filled(position: &mut Position, step: StepRef, filled: bool) -> Result<(), EditError> {
    let target = position.step_mut(step).ok_or(EditError::UnknownStep(step))?;

    if filled {
        if target.is_closed {
            return Err(EditError::StepClosed(step));
        }
        target.is_filled = true;
        if position.status == PositionStatus::Planning {
            position.status = PositionStatus::Opened;
        }
    } else {
        // Un-filling is the only way back from closed.
        target.is_filled = false;
        target.is_closed = false;
    }

    Ok(())
}
