//! Risk-driven position sizing across the steps of a setup.
//!
//! Given the risk budget, the stop-loss price and the setup's weights, every
//! unfilled step is sized so that the loss at the stop across all steps
//! (filled and newly sized) stays within the budget. The total notional is
//! capped at `account_balance x leverage`. Filled steps keep their size; only
//! their cost and fee are refreshed. Closed steps keep their size, cost and
//! fee but still count toward the running break-even.
//!
//! All ratio and price math runs through [`Fixed`] so that recomputing the
//! same inputs always produces the same figures.

use rust_decimal::Decimal;
use tracing::{debug, trace};

use crate::fixed::Fixed;
use crate::models::{FeeSchedule, Position, ResizingStep, Setup};

/// Replace the position's steps with fresh ones when the setup's step count
/// differs. A matching count leaves prices and fills untouched.
pub fn apply_plan(position: &mut Position, setup: &Setup) {
    position.setup_id = setup.id.clone();

    if position.steps.len() != setup.step_count {
        debug!(
            position = %position.id,
            setup = %setup.name,
            from = position.steps.len(),
            to = setup.step_count,
            "Resetting steps to match setup"
        );
        position.steps = (0..setup.step_count).map(|_| ResizingStep::new()).collect();
    }
}

/// Notional of the non-closed planned steps divided by leverage, or the raw
/// notional when leverage is not positive. Chase steps are not counted.
pub fn margin_estimate(position: &Position) -> Decimal {
    let notional: Fixed = position
        .steps
        .iter()
        .filter(|s| s.is_active())
        .map(|s| Fixed::from(s.size) * Fixed::from(s.price))
        .sum();
    let leverage = Fixed::from(position.leverage);

    if leverage.is_positive() {
        (notional / leverage).into_decimal()
    } else {
        notional.into_decimal()
    }
}

/// Can be re-sized by the engine.
fn is_sizable(step: &ResizingStep) -> bool {
    !step.is_filled && !step.is_closed
}

/// Calculator for risk-driven step sizes.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    account_balance: Fixed,
    fees: FeeSchedule,
}

impl PositionSizer {
    /// Create a sizer for an account balance. Missing fees mean zero rates.
    pub fn new(account_balance: Decimal, fees: Option<FeeSchedule>) -> Self {
        Self {
            account_balance: Fixed::from(account_balance),
            fees: fees.unwrap_or_default(),
        }
    }

    /// Recompute sizes, costs, fees and break-evens of `position` in place.
    ///
    /// Never fails: an empty plan or a stop on the wrong side of every entry
    /// leaves the affected steps as they were. Unfilled steps without a
    /// positive price are cleared.
    pub fn recalculate(&self, position: &mut Position, setup: &Setup) {
        let total_weight: Fixed = setup.weights.iter().map(|w| Fixed::from(*w)).sum();
        if !total_weight.is_positive() {
            debug!(setup = %setup.name, "Setup has no positive weight, skipping sizing");
            return;
        }

        let weights: Vec<Fixed> = (0..position.steps.len())
            .map(|idx| Fixed::from(setup.weight(idx)).max(Fixed::ZERO))
            .collect();
        let unfilled_weight: Fixed = position
            .steps
            .iter()
            .zip(&weights)
            .filter(|(step, _)| is_sizable(step))
            .map(|(_, w)| *w)
            .sum();

        let filled_risk = Self::filled_risk(position);
        let risk_amount = Fixed::from(position.risk_amount);
        let remaining_risk = (risk_amount - filled_risk).max(Fixed::ZERO);
        debug!(
            position = %position.id,
            risk_amount = %risk_amount,
            filled_risk = %filled_risk,
            remaining_risk = %remaining_risk,
            "Remaining risk"
        );

        let loss_per_cost = Self::loss_per_cost(position, &weights, unfilled_weight);

        // Without a positive loss per unit of cost no size can express the
        // remaining risk, so the unfilled steps keep whatever they had.
        let target_cost = if loss_per_cost.is_positive() {
            Some(self.target_cost(position, remaining_risk, loss_per_cost))
        } else {
            debug!(position = %position.id, loss_per_cost = %loss_per_cost, "Unfilled steps cannot be sized");
            None
        };

        self.distribute(position, &weights, unfilled_weight, target_cost);
        self.refresh_chase_steps(position);
    }

    /// Loss already committed by filled, open steps whose entry lies on the
    /// losing side of the stop.
    fn filled_risk(position: &Position) -> Fixed {
        let stop = Fixed::from(position.stop_loss_price);

        position
            .steps
            .iter()
            .filter(|s| s.is_open_fill())
            .filter(|s| s.price > Decimal::ZERO && s.size > Decimal::ZERO)
            .filter_map(|s| {
                let loss = position.side.loss_per_unit(Fixed::from(s.price), stop);
                loss.is_positive().then(|| Fixed::from(s.size) * loss)
            })
            .sum()
    }

    /// Weighted loss per unit of notional over the unfilled steps.
    ///
    /// Weights are normalized over the unfilled total only, so filled steps
    /// do not skew how the remaining budget is spread. A step priced on the
    /// wrong side of the stop contributes negatively.
    fn loss_per_cost(position: &Position, weights: &[Fixed], unfilled_weight: Fixed) -> Fixed {
        if !unfilled_weight.is_positive() {
            return Fixed::ZERO;
        }
        let stop = Fixed::from(position.stop_loss_price);
        let mut loss_per_cost = Fixed::ZERO;

        for (idx, step) in position.steps.iter().enumerate() {
            if !is_sizable(step) {
                continue;
            }
            let price = Fixed::from(step.price);
            let normalized = weights[idx] / unfilled_weight;
            if !price.is_positive() || !normalized.is_positive() {
                continue;
            }

            let loss_per_unit = position.side.loss_per_unit(price, stop);
            let loss_per_price = loss_per_unit / price;
            loss_per_cost = loss_per_cost + normalized * loss_per_price;
            trace!(
                step = idx,
                normalized = %normalized,
                loss_per_unit = %loss_per_unit,
                loss_per_price = %loss_per_price,
                loss_per_cost = %loss_per_cost,
                "Loss per cost"
            );
        }

        loss_per_cost
    }

    /// Notional that spends `remaining_risk`, capped at balance x leverage.
    fn target_cost(&self, position: &Position, remaining_risk: Fixed, loss_per_cost: Fixed) -> Fixed {
        if !remaining_risk.is_positive() {
            return Fixed::ZERO;
        }
        let mut cost = remaining_risk / loss_per_cost;

        let leverage = Fixed::from(position.leverage);
        if self.account_balance.is_positive() && leverage.is_positive() {
            let cap = self.account_balance * leverage;
            if cap.is_positive() && cost > cap {
                debug!(position = %position.id, cost = %cost, cap = %cap, "Capping notional at margin limit");
                cost = cap;
            }
        }

        debug!(position = %position.id, total_cost = %cost, "Total notional cost");
        cost
    }

    /// Spread `target_cost` over the unfilled steps by weight, then walk the
    /// steps in order to produce running break-evens.
    fn distribute(
        &self,
        position: &mut Position,
        weights: &[Fixed],
        unfilled_weight: Fixed,
        target_cost: Option<Fixed>,
    ) {
        let mut cumulative_size = Fixed::ZERO;
        let mut cumulative_cost = Fixed::ZERO;
        let mut filled_size = Fixed::ZERO;
        let mut filled_cost = Fixed::ZERO;
        let mut filled_fee = Fixed::ZERO;

        for (idx, step) in position.steps.iter_mut().enumerate() {
            let price = Fixed::from(step.price);
            if !price.is_positive() {
                if is_sizable(step) {
                    step.size = Decimal::ZERO;
                    step.cost = Decimal::ZERO;
                    step.fee = Decimal::ZERO;
                    step.predicted_be = Decimal::ZERO;
                }
                continue;
            }

            // Closed steps keep their recorded values but still weigh on the
            // running break-even of the steps after them.
            if step.is_closed {
                let size = Fixed::from(step.size);
                cumulative_size = cumulative_size + size;
                cumulative_cost = cumulative_cost + size * price + Fixed::from(step.fee);
                step.predicted_be = (cumulative_cost / cumulative_size).into_decimal();
                continue;
            }

            let fee_rate = Fixed::from(self.fees.rate_for(step.order_type));

            let (size, cost) = if step.is_filled {
                let size = Fixed::from(step.size);
                (size, size * price)
            } else {
                let Some(total_cost) = target_cost else {
                    continue;
                };
                let normalized = weights[idx] / unfilled_weight;
                if !normalized.is_positive() {
                    continue;
                }
                let cost = total_cost * normalized;
                (cost / price, cost)
            };
            let fee = cost * fee_rate;

            step.size = size.into_decimal();
            step.cost = cost.into_decimal();
            step.fee = fee.into_decimal();

            cumulative_size = cumulative_size + size;
            cumulative_cost = cumulative_cost + cost + fee;
            step.predicted_be = (cumulative_cost / cumulative_size).into_decimal();

            if step.is_filled {
                filled_size = filled_size + size;
                filled_cost = filled_cost + cost + fee;
                filled_fee = filled_fee + fee;
            }

            trace!(
                step = idx,
                filled = step.is_filled,
                size = %size,
                cost = %cost,
                fee = %fee,
                predicted_be = %step.predicted_be,
                "Step sized"
            );
        }

        position.predicted_be = (cumulative_cost / cumulative_size).into_decimal();
        position.current_be = (filled_cost / filled_size).into_decimal();
        position.fee_total = filled_fee.into_decimal();
    }

    /// Chase steps are sized by hand; only their cost and fee follow.
    fn refresh_chase_steps(&self, position: &mut Position) {
        for step in position.chase_steps.iter_mut().filter(|s| s.is_active()) {
            let cost = Fixed::from(step.size) * Fixed::from(step.price);
            let fee = cost * Fixed::from(self.fees.rate_for(step.order_type));
            step.cost = cost.into_decimal();
            step.fee = fee.into_decimal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderType, Side};
    use rust_decimal_macros::dec;

    const BALANCE: Decimal = dec!(10000);

    fn planned(side: Side, risk: Decimal, stop: Decimal, setup: &Setup, prices: &[Decimal]) -> Position {
        let mut pos = Position::new("acc", "BTCUSDT", side);
        pos.risk_amount = risk;
        pos.stop_loss_price = stop;
        pos.apply_setup(setup);
        for (step, price) in pos.steps.iter_mut().zip(prices) {
            step.price = *price;
        }
        pos
    }

    fn sizes(pos: &Position) -> Vec<f64> {
        pos.steps.iter().map(|s| Fixed::from(s.size).to_f64()).collect()
    }

    fn assert_close(actual: Decimal, expected: f64, tolerance: f64) {
        let actual = Fixed::from(actual).to_f64();
        assert!(
            (actual - expected).abs() < tolerance,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_sizes(pos: &Position, expected: &[f64]) {
        for (actual, expected) in sizes(pos).iter().zip(expected) {
            assert!((actual - expected).abs() < 1e-3, "expected {expected}, got {actual}");
        }
    }

    fn assert_within_risk(pos: &Position) {
        assert!(
            pos.risk_at_stop() <= pos.risk_amount + dec!(0.000001),
            "risk {} exceeds budget {}",
            pos.risk_at_stop(),
            pos.risk_amount
        );
    }

    #[test]
    fn test_preserves_prices_risk_and_stop() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);

        pos.recalculate(&setup, BALANCE, None);

        assert_eq!(pos.steps[0].price, dec!(120));
        assert_eq!(pos.steps[1].price, dec!(100));
        assert_eq!(pos.risk_amount, dec!(100));
        assert_eq!(pos.stop_loss_price, dec!(95));
        assert_within_risk(&pos);
    }

    #[test]
    fn test_stop_loss_change_resizes_steps() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);

        pos.recalculate(&setup, BALANCE, None);
        assert_sizes(&pos, &[3.2258, 3.8710]);
        assert_within_risk(&pos);

        pos.stop_loss_price = dec!(90);
        pos.recalculate(&setup, BALANCE, None);
        assert_sizes(&pos, &[2.3810, 2.8571]);
        assert_eq!(pos.risk_amount, dec!(100));
        assert_eq!(pos.steps[0].price, dec!(120));
        assert_within_risk(&pos);
    }

    #[test]
    fn test_risk_change_scales_linearly() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);

        pos.recalculate(&setup, BALANCE, None);
        assert_sizes(&pos, &[3.2258, 3.8710]);

        pos.risk_amount = dec!(200);
        pos.recalculate(&setup, BALANCE, None);
        assert_sizes(&pos, &[6.4516, 7.7419]);
        assert_eq!(pos.stop_loss_price, dec!(95));
        assert_eq!(pos.steps[1].price, dec!(100));
        assert_within_risk(&pos);
    }

    #[test]
    fn test_short_positions() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Short, dec!(100), dec!(130), &setup, &[dec!(100), dec!(120)]);

        pos.recalculate(&setup, BALANCE, None);
        assert_sizes(&pos, &[2.6087, 2.1739]);
        assert_within_risk(&pos);

        pos.risk_amount = dec!(200);
        pos.recalculate(&setup, BALANCE, None);
        assert_sizes(&pos, &[5.2174, 4.3478]);
        assert_within_risk(&pos);
    }

    #[test]
    fn test_fees_in_break_even() {
        let setup = Setup::uniform("1-step", 1);
        let mut pos = planned(Side::Long, dec!(10), dec!(90), &setup, &[dec!(100)]);

        pos.recalculate(&setup, BALANCE, None);
        pos.steps[0].is_filled = true;
        pos.recalculate(&setup, BALANCE, Some(FeeSchedule::new(dec!(0.01), dec!(0.01))));

        assert_close(pos.predicted_be, 101.0, 1e-4);
        assert_close(pos.current_be, 101.0, 1e-4);
        assert_eq!(pos.predicted_be, pos.current_be);
        assert_close(pos.fee_total, 1.0, 1e-4);
        assert_within_risk(&pos);
    }

    #[test]
    fn test_fee_shifts_break_even_by_fee_share() {
        let setup = Setup::uniform("2-step", 2);
        let mut plain = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);
        let mut with_fees = plain.clone();

        plain.recalculate(&setup, BALANCE, None);
        with_fees.recalculate(&setup, BALANCE, Some(FeeSchedule::new(dec!(0.001), dec!(0.001))));

        // Sizes do not depend on fees, so the shift is total fee / total size.
        assert_eq!(plain.steps[0].size, with_fees.steps[0].size);
        let total_fee: Decimal = with_fees.steps.iter().map(|s| s.fee).sum();
        let total_size: Decimal = with_fees.steps.iter().map(|s| s.size).sum();
        let shift = with_fees.predicted_be - plain.predicted_be;
        assert!(shift > Decimal::ZERO);
        assert_close(shift, Fixed::from(total_fee / total_size).to_f64(), 1e-6);
    }

    #[test]
    fn test_filled_step_keeps_size() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);

        pos.recalculate(&setup, BALANCE, None);
        let filled_size = pos.steps[0].size;
        let prior_unfilled = pos.steps[1].size;

        pos.steps[0].is_filled = true;
        pos.risk_amount = dec!(200);
        pos.recalculate(&setup, BALANCE, None);

        assert_eq!(pos.steps[0].size, filled_size);
        assert_ne!(pos.steps[1].size, prior_unfilled);
        assert_within_risk(&pos);
    }

    #[test]
    fn test_recalculate_is_idempotent() {
        let setup = Setup::new("3-step", 3, vec![dec!(1), dec!(2), dec!(3)]);
        let mut pos = planned(
            Side::Long,
            dec!(250),
            dec!(87.5),
            &setup,
            &[dec!(101.3), dec!(97.7), dec!(93.1)],
        );
        let fees = Some(FeeSchedule::new(dec!(0.0002), dec!(0.0005)));

        pos.recalculate(&setup, BALANCE, fees);
        let first = pos.clone();
        for _ in 0..10 {
            pos.recalculate(&setup, BALANCE, fees);
        }

        assert_eq!(pos, first);
    }

    #[test]
    fn test_margin_cap_clamps_total_cost() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(1000), dec!(99), &setup, &[dec!(100), dec!(100)]);
        pos.leverage = dec!(2);

        pos.recalculate(&setup, dec!(1000), None);

        let total: Decimal = pos.steps.iter().map(|s| s.cost).sum();
        assert_eq!(total, dec!(2000));
        assert_eq!(pos.steps[0].cost, dec!(1000));
        assert_eq!(pos.steps[0].size, dec!(10));
        assert_eq!(pos.margin_estimate(), dec!(1000));
    }

    #[test]
    fn test_no_cap_without_balance() {
        let setup = Setup::uniform("1-step", 1);
        let mut pos = planned(Side::Long, dec!(1000), dec!(99), &setup, &[dec!(100)]);

        pos.recalculate(&setup, Decimal::ZERO, None);

        assert_eq!(pos.steps[0].cost, dec!(100000));
    }

    #[test]
    fn test_stop_on_wrong_side_leaves_steps_untouched() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);
        pos.recalculate(&setup, BALANCE, None);
        let before: Vec<Decimal> = pos.steps.iter().map(|s| s.size).collect();

        pos.stop_loss_price = dec!(150);
        pos.recalculate(&setup, BALANCE, None);

        let after: Vec<Decimal> = pos.steps.iter().map(|s| s.size).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_mixed_side_entry_counts_negatively() {
        // The 100 entry sits below a 105 stop on a long, which lowers the
        // weighted loss per cost and so raises the total notional.
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(105), &setup, &[dec!(120), dec!(100)]);

        pos.recalculate(&setup, dec!(1000000), None);

        // 0.5 * 15/120 + 0.5 * -5/100 = 0.0375 -> 2666.67 total notional
        let total: Decimal = pos.steps.iter().map(|s| s.cost).sum();
        assert_close(total, 2666.6667, 1e-3);
    }

    #[test]
    fn test_zero_priced_steps_are_skipped() {
        let setup = Setup::uniform("3-step", 3);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);

        pos.recalculate(&setup, BALANCE, None);

        assert_eq!(pos.steps[2].price, Decimal::ZERO);
        assert_eq!(pos.steps[2].size, Decimal::ZERO);
        assert_eq!(pos.steps[2].cost, Decimal::ZERO);
        assert!(pos.steps[0].size > Decimal::ZERO);
        assert_within_risk(&pos);
    }

    #[test]
    fn test_budget_spent_by_fills_zeroes_remaining_steps() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);
        pos.recalculate(&setup, BALANCE, None);

        pos.steps[0].is_filled = true;
        pos.risk_amount = dec!(50);
        pos.recalculate(&setup, BALANCE, None);

        assert_eq!(pos.steps[1].size, Decimal::ZERO);
        assert_eq!(pos.steps[1].cost, Decimal::ZERO);
        assert_eq!(pos.predicted_be, pos.current_be);
    }

    #[test]
    fn test_closed_step_is_frozen() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);
        pos.recalculate(&setup, BALANCE, None);

        pos.steps[0].is_filled = true;
        pos.steps[0].is_closed = true;
        let frozen = pos.steps[0].clone();
        pos.risk_amount = dec!(300);
        pos.recalculate(&setup, BALANCE, Some(FeeSchedule::new(dec!(0.01), dec!(0.01))));

        let closed = &pos.steps[0];
        assert_eq!(closed.price, frozen.price);
        assert_eq!(closed.size, frozen.size);
        assert_eq!(closed.cost, frozen.cost);
        assert_eq!(closed.fee, frozen.fee);
        assert_eq!(pos.fee_total, Decimal::ZERO);
        assert_eq!(pos.current_be, Decimal::ZERO);
        // The closed step no longer uses budget, so the open one takes it all.
        assert_close(pos.steps[1].size, 60.0, 1e-4);
    }

    #[test]
    fn test_closed_step_weighs_on_running_break_even() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);
        pos.recalculate(&setup, BALANCE, None);
        pos.steps[0].is_filled = true;
        pos.steps[0].is_closed = true;

        pos.risk_amount = dec!(300);
        pos.recalculate(&setup, BALANCE, Some(FeeSchedule::new(dec!(0.01), dec!(0.01))));

        let (closed, open) = (&pos.steps[0], &pos.steps[1]);
        assert_eq!(closed.predicted_be, dec!(120));
        let blended = Fixed::from(closed.cost + closed.fee + open.cost + open.fee)
            / Fixed::from(closed.size + open.size);
        assert_close(open.predicted_be, blended.to_f64(), 1e-6);
        assert_close(pos.predicted_be, blended.to_f64(), 1e-6);
        // Without the closed entry the open step alone would break even at 101.
        assert!(pos.predicted_be > dec!(101));
    }

    #[test]
    fn test_unpriced_step_is_cleared() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);
        pos.recalculate(&setup, BALANCE, Some(FeeSchedule::new(dec!(0.01), dec!(0.01))));
        assert!(pos.steps[1].size > Decimal::ZERO);

        pos.steps[1].price = Decimal::ZERO;
        pos.recalculate(&setup, BALANCE, Some(FeeSchedule::new(dec!(0.01), dec!(0.01))));

        let cleared = &pos.steps[1];
        assert_eq!(cleared.size, Decimal::ZERO);
        assert_eq!(cleared.cost, Decimal::ZERO);
        assert_eq!(cleared.fee, Decimal::ZERO);
        assert_eq!(cleared.predicted_be, Decimal::ZERO);
        assert!(pos.steps[0].size > Decimal::ZERO);
        assert_within_risk(&pos);
    }

    #[test]
    fn test_running_break_even_per_step() {
        let setup = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);

        pos.recalculate(&setup, BALANCE, None);

        assert_close(pos.steps[0].predicted_be, 120.0, 1e-6);
        let expected = (pos.steps[0].cost + pos.steps[1].cost) / (pos.steps[0].size + pos.steps[1].size);
        assert_close(pos.steps[1].predicted_be, Fixed::from(expected).to_f64(), 1e-6);
        assert_eq!(pos.predicted_be, pos.steps[1].predicted_be);
        assert_eq!(pos.current_be, Decimal::ZERO);
    }

    #[test]
    fn test_non_positive_total_weight_is_noop() {
        let setup = Setup::new("broken", 2, vec![dec!(0), dec!(0)]);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &setup, &[dec!(120), dec!(100)]);
        pos.fee_total = dec!(7);
        let before = pos.clone();

        pos.recalculate(&setup, BALANCE, None);

        assert_eq!(pos, before);
    }

    #[test]
    fn test_chase_steps_refresh_cost_and_fee_only() {
        let setup = Setup::uniform("1-step", 1);
        let mut pos = planned(Side::Long, dec!(10), dec!(90), &setup, &[dec!(100)]);
        let mut chase = ResizingStep::new();
        chase.price = dec!(95);
        chase.size = dec!(2);
        chase.order_type = OrderType::Maker;
        pos.chase_steps.push(chase);

        pos.recalculate(&setup, BALANCE, Some(FeeSchedule::new(dec!(0.001), dec!(0.01))));

        assert_eq!(pos.chase_steps[0].size, dec!(2));
        assert_eq!(pos.chase_steps[0].cost, dec!(190));
        assert_eq!(pos.chase_steps[0].fee, dec!(0.19));
        // Chase entries do not eat into the planned budget.
        assert_eq!(pos.steps[0].size, dec!(1));
    }

    #[test]
    fn test_apply_plan_resets_only_on_shape_change() {
        let two = Setup::uniform("2-step", 2);
        let mut pos = planned(Side::Long, dec!(100), dec!(95), &two, &[dec!(120), dec!(100)]);
        pos.steps[0].is_filled = true;

        let other_two = Setup::new("weighted", 2, vec![dec!(1), dec!(3)]);
        apply_plan(&mut pos, &other_two);
        assert_eq!(pos.setup_id, other_two.id);
        assert_eq!(pos.steps[0].price, dec!(120));
        assert!(pos.steps[0].is_filled);

        let three = Setup::uniform("3-step", 3);
        apply_plan(&mut pos, &three);
        assert_eq!(pos.steps.len(), 3);
        assert!(pos.steps.iter().all(|s| s.price.is_zero() && !s.is_filled && !s.is_closed));
        assert!(pos.steps.iter().all(|s| s.order_type == OrderType::Taker));
    }

    #[test]
    fn test_margin_estimate_without_leverage() {
        let mut pos = Position::new("acc", "BTCUSDT", Side::Long);
        pos.leverage = Decimal::ZERO;
        let mut step = ResizingStep::new();
        step.price = dec!(50);
        step.size = dec!(3);
        pos.steps.push(step);

        assert_eq!(margin_estimate(&pos), dec!(150));
    }

    #[test]
    fn test_margin_estimate_ignores_chase_steps() {
        let mut pos = Position::new("acc", "BTCUSDT", Side::Long);
        pos.leverage = dec!(1);
        let mut step = ResizingStep::new();
        step.price = dec!(100);
        step.size = dec!(1);
        pos.steps.push(step.clone());
        step.size = dec!(5);
        pos.chase_steps.push(step);

        assert_eq!(margin_estimate(&pos), dec!(100));
    }
}
