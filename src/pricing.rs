//! # Pricing Calculator
//!
//! Pure functions deriving retail price, line totals, profit and margin from
//! wholesale cost, quantity and the account's markup table. Every amount is a
//! `Decimal`, so repeated sums never drift the way binary floats do.
//!
//! Unit and line prices keep full precision. Amounts that are stored or shown
//! to a person go through [`to_cents`], which rounds half a cent away from zero.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::PricingError;
use crate::model::{Category, MarkupSettings, OrderLine};

impl MarkupSettings {
    /// Multiplier for a category, rejecting zero and negative values
    pub fn multiplier(&self, category: Category) -> Result<Decimal, PricingError> {
        let value = self.raw(category);
        if value <= Decimal::ZERO {
            return Err(PricingError::InvalidMultiplier { category, value });
        }
        Ok(value)
    }

    /// Check every category at once
    pub fn validate(&self) -> Result<(), PricingError> {
        for category in Category::ALL {
            self.multiplier(category)?;
        }
        Ok(())
    }
}

/// Prices for one line of an order or recipe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinePricing {
    pub unit_retail: Decimal,
    pub line_wholesale: Decimal,
    pub line_retail: Decimal,
}

impl LinePricing {
    pub fn profit(&self) -> Decimal {
        self.line_retail - self.line_wholesale
    }
}

/// Aggregate amounts stored with an order
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub total_wholesale: Decimal,
    pub total_retail: Decimal,
    pub profit: Decimal,
}

impl OrderTotals {
    pub fn margin_percent(&self) -> Decimal {
        margin_percent(self.profit, self.total_retail)
    }
}

/// Round an amount to whole cents, halves away from zero
pub fn to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a percentage to one decimal place for display
pub fn round_percent(percent: Decimal) -> Decimal {
    percent.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
}

/// `wholesale_cost * markup[category]`
pub fn retail_unit_price(
    wholesale_cost: Decimal,
    category: Category,
    markup: &MarkupSettings,
) -> Result<Decimal, PricingError> {
    Ok(wholesale_cost * markup.multiplier(category)?)
}

pub fn price_line(
    wholesale_cost: Decimal,
    quantity: u32,
    category: Category,
    markup: &MarkupSettings,
) -> Result<LinePricing, PricingError> {
    let unit_retail = retail_unit_price(wholesale_cost, category, markup)?;
    let quantity = Decimal::from(quantity);
    Ok(LinePricing {
        unit_retail,
        line_wholesale: wholesale_cost * quantity,
        line_retail: unit_retail * quantity,
    })
}

/// Totals for a list of order lines, in whole cents
///
/// Lines are summed at full precision and each total is rounded once.
/// `profit` is taken from the rounded totals so it always equals their
/// difference.
pub fn order_totals(
    lines: &[OrderLine],
    markup: &MarkupSettings,
) -> Result<OrderTotals, PricingError> {
    let mut total_wholesale = Decimal::ZERO;
    let mut total_retail = Decimal::ZERO;

    for line in lines {
        let priced = price_line(line.wholesale_cost, line.quantity, line.category, markup)?;
        total_wholesale += priced.line_wholesale;
        total_retail += priced.line_retail;
    }

    let total_wholesale = to_cents(total_wholesale);
    let total_retail = to_cents(total_retail);
    Ok(OrderTotals {
        total_wholesale,
        total_retail,
        profit: total_retail - total_wholesale,
    })
}

/// Profit as a percentage of retail revenue; zero when there is no revenue
pub fn margin_percent(profit: Decimal, total_retail: Decimal) -> Decimal {
    if total_retail > Decimal::ZERO {
        profit / total_retail * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: i64, scale: u32) -> Decimal {
        Decimal::new(value, scale)
    }

    #[test]
    fn test_retail_and_profit_follow_multiplier() {
        let markup = MarkupSettings::default();
        let costs = [dec(0, 0), dec(125, 2), dec(250, 2), dec(1999, 2)];
        let quantities = [0u32, 1, 7, 144];

        for category in Category::ALL {
            let m = markup.multiplier(category).unwrap();
            for cost in costs {
                for qty in quantities {
                    let q = Decimal::from(qty);
                    let priced = price_line(cost, qty, category, &markup).unwrap();
                    assert_eq!(priced.line_retail, cost * m * q);
                    assert_eq!(priced.profit(), cost * q * (m - Decimal::ONE));
                }
            }
        }
    }

    #[test]
    fn test_order_totals_sum_lines() {
        let markup = MarkupSettings::default();
        let lines = vec![
            OrderLine::new("Red Rose", dec(250, 2), 12, Category::Stem),
            OrderLine::new("Glass Vase", dec(800, 2), 1, Category::Vase),
            OrderLine::new("Satin Ribbon", dec(50, 2), 2, Category::Accessory),
        ];

        let totals = order_totals(&lines, &markup).unwrap();
        assert_eq!(totals.total_wholesale, dec(3900, 2));
        // 75.00 + 16.00 + 3.00
        assert_eq!(totals.total_retail, dec(9400, 2));
        assert_eq!(totals.profit, totals.total_retail - totals.total_wholesale);
    }

    #[test]
    fn test_to_cents_rounds_half_away_from_zero() {
        assert_eq!(to_cents(dec(3125, 3)), dec(313, 2));
        assert_eq!(to_cents(dec(2675, 3)), dec(268, 2));
        assert_eq!(to_cents(dec(3124, 3)), dec(312, 2));
        assert_eq!(to_cents(dec(-125, 3)), dec(-13, 2));
        assert_eq!(to_cents(dec(16, 0)), dec(1600, 2));
    }

    #[test]
    fn test_round_percent() {
        // 1.25 profit on 3.75 revenue
        let margin = margin_percent(dec(125, 2), dec(375, 2));
        assert_eq!(round_percent(margin), dec(333, 1));
        assert_eq!(round_percent(dec(6665, 2)), dec(667, 1));
        assert_eq!(format!("{:.1}", round_percent(dec(6665, 2))), "66.7");
    }

    #[test]
    fn test_order_totals_are_whole_cents() {
        let markup = MarkupSettings {
            stem: dec(5, 1),
            ..MarkupSettings::default()
        };
        // 0.25 * 0.5 = 0.125 retail
        let lines = vec![OrderLine::new("Wax Flower", dec(25, 2), 1, Category::Stem)];

        let totals = order_totals(&lines, &markup).unwrap();
        assert_eq!(totals.total_wholesale, dec(25, 2));
        assert_eq!(totals.total_retail, dec(13, 2));
        assert_eq!(totals.total_retail.scale(), 2);
        assert_eq!(totals.profit, dec(-12, 2));
        assert_eq!(totals.profit, totals.total_retail - totals.total_wholesale);
    }

    #[test]
    fn test_order_totals_round_the_sum_not_each_line() {
        let markup = MarkupSettings::default();
        // Two lines of 3.125 retail each
        let lines = vec![
            OrderLine::new("Wax Flower", dec(125, 2), 1, Category::Stem),
            OrderLine::new("Wax Flower", dec(125, 2), 1, Category::Stem),
        ];

        let totals = order_totals(&lines, &markup).unwrap();
        assert_eq!(totals.total_retail, dec(625, 2));
        assert_eq!(totals.total_retail.scale(), 2);
        assert_eq!(totals.profit, dec(375, 2));
    }

    #[test]
    fn test_margin_percent() {
        assert_eq!(margin_percent(dec(60, 0), dec(100, 0)), dec(60, 0));
        assert_eq!(margin_percent(dec(10, 0), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(OrderTotals::default().margin_percent(), Decimal::ZERO);
    }

    #[test]
    fn test_non_positive_multiplier_fails_fast() {
        let markup = MarkupSettings {
            vase: Decimal::ZERO,
            ..MarkupSettings::default()
        };

        assert!(retail_unit_price(dec(800, 2), Category::Stem, &markup).is_ok());
        let err = retail_unit_price(dec(800, 2), Category::Vase, &markup).unwrap_err();
        assert_eq!(
            err,
            PricingError::InvalidMultiplier {
                category: Category::Vase,
                value: Decimal::ZERO
            }
        );
        assert!(markup.validate().is_err());
    }

    #[test]
    fn test_empty_order_has_zero_totals() {
        let totals = order_totals(&[], &MarkupSettings::default()).unwrap();
        assert_eq!(totals, OrderTotals::default());
    }
}
