//! Fixed-precision decimal arithmetic for money math.
//!
//! Every value is held at [`SCALE`] decimal places and rounded half away from
//! zero after each product and quotient, so a weighted ratio chain gives the
//! same figures no matter how many times it is recomputed.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Sub};

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places kept by every [`Fixed`] value.
pub const SCALE: u32 = 8;

/// A decimal with a constant scale of 8 places.
///
/// Division by zero and arithmetic overflow both yield [`Fixed::ZERO`];
/// callers treat a zero result as "undefined, skip".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(Decimal);

fn round(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero)
}

impl Fixed {
    pub const ZERO: Fixed = Fixed(Decimal::ZERO);

    /// Convert a float. Non-finite input maps to zero.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Self::ZERO;
        }
        Decimal::from_f64(value).map(Self::from).unwrap_or(Self::ZERO)
    }

    /// Convert back to a float for display.
    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    /// The underlying decimal, already rounded to [`SCALE`] places.
    pub fn into_decimal(self) -> Decimal {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Strictly greater than zero.
    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn max(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

impl From<Decimal> for Fixed {
    fn from(value: Decimal) -> Self {
        Self(round(value))
    }
}

impl From<Fixed> for Decimal {
    fn from(value: Fixed) -> Self {
        value.0
    }
}

impl Add for Fixed {
    type Output = Fixed;

    fn add(self, rhs: Fixed) -> Fixed {
        self.0.checked_add(rhs.0).map(Fixed).unwrap_or(Fixed::ZERO)
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    fn sub(self, rhs: Fixed) -> Fixed {
        self.0.checked_sub(rhs.0).map(Fixed).unwrap_or(Fixed::ZERO)
    }
}

impl Mul for Fixed {
    type Output = Fixed;

    fn mul(self, rhs: Fixed) -> Fixed {
        self.0.checked_mul(rhs.0).map(Fixed::from).unwrap_or(Fixed::ZERO)
    }
}

impl Div for Fixed {
    type Output = Fixed;

    fn div(self, rhs: Fixed) -> Fixed {
        if rhs.0.is_zero() {
            return Fixed::ZERO;
        }
        self.0.checked_div(rhs.0).map(Fixed::from).unwrap_or(Fixed::ZERO)
    }
}

impl Sum for Fixed {
    fn sum<I: Iterator<Item = Fixed>>(iter: I) -> Fixed {
        iter.fold(Fixed::ZERO, |acc, x| acc + x)
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fx(d: Decimal) -> Fixed {
        Fixed::from(d)
    }

    #[test]
    fn test_division_rounds_half_away_from_zero() {
        assert_eq!((fx(dec!(1)) / fx(dec!(3))).into_decimal(), dec!(0.33333333));
        assert_eq!((fx(dec!(2)) / fx(dec!(3))).into_decimal(), dec!(0.66666667));
        assert_eq!((fx(dec!(-2)) / fx(dec!(3))).into_decimal(), dec!(-0.66666667));
    }

    #[test]
    fn test_divide_by_zero_is_zero() {
        assert_eq!(fx(dec!(100)) / Fixed::ZERO, Fixed::ZERO);
        assert!((Fixed::ZERO / Fixed::ZERO).is_zero());
    }

    #[test]
    fn test_construction_rounds_to_scale() {
        assert_eq!(fx(dec!(0.123456785)).into_decimal(), dec!(0.12345679));
        assert_eq!(Fixed::from_f64(0.1).into_decimal(), dec!(0.1));
        assert_eq!(Fixed::from_f64(f64::NAN), Fixed::ZERO);
        assert_eq!(Fixed::from_f64(f64::INFINITY), Fixed::ZERO);
    }

    #[test]
    fn test_repeated_chain_is_stable() {
        // The same weighted ratio computed over and over must not drift.
        let weight = fx(dec!(1)) / fx(dec!(3));
        let first: Fixed = (0..3).map(|_| weight * fx(dec!(25)) / fx(dec!(120))).sum();
        for _ in 0..100 {
            let again: Fixed = (0..3).map(|_| weight * fx(dec!(25)) / fx(dec!(120))).sum();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_float_round_trip() {
        let value = Fixed::from_f64(3.22580645);
        assert!((value.to_f64() - 3.22580645).abs() < 1e-12);
    }
}
