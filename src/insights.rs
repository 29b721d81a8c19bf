//! # Business Insights
//!
//! Summary statistics over saved orders. All figures come from the totals
//! stored with each order, so later markup changes do not rewrite history.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::model::OrderRecord;
use crate::pricing::margin_percent;

/// Orders below this margin are flagged for pricing review
pub const LOW_MARGIN_PERCENT: Decimal = Decimal::from_parts(40, 0, 0, false, 0);

/// Window for "recent" orders
pub const RECENT_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct BusinessSummary {
    pub order_count: usize,
    pub total_revenue: Decimal,
    pub total_costs: Decimal,
    pub total_profit: Decimal,
    pub average_margin_percent: Decimal,
    pub average_order_value: Decimal,
    /// Ids of orders with margin below [`LOW_MARGIN_PERCENT`]
    pub low_margin_orders: Vec<String>,
    pub recent_order_count: usize,
    pub best_order: Option<String>,
    pub worst_order: Option<String>,
}

pub fn summarize(orders: &[OrderRecord], now: DateTime<Utc>) -> BusinessSummary {
    let total_revenue: Decimal = orders.iter().map(|o| o.total_retail).sum();
    let total_costs: Decimal = orders.iter().map(|o| o.total_wholesale).sum();
    let total_profit = total_revenue - total_costs;

    let average_order_value = if orders.is_empty() {
        Decimal::ZERO
    } else {
        total_revenue / Decimal::from(orders.len())
    };

    let low_margin_orders = orders
        .iter()
        .filter(|o| margin_percent(o.profit, o.total_retail) < LOW_MARGIN_PERCENT)
        .map(|o| o.id.clone())
        .collect();

    let cutoff = now - Duration::days(RECENT_DAYS);
    let recent_order_count = orders.iter().filter(|o| o.created_at >= cutoff).count();

    // Ties keep the earliest order in the list
    let best_order = orders
        .iter()
        .fold(None::<&OrderRecord>, |best, o| match best {
            Some(b) if b.profit >= o.profit => Some(b),
            _ => Some(o),
        })
        .map(|o| o.id.clone());
    let worst_order = orders
        .iter()
        .fold(None::<&OrderRecord>, |worst, o| match worst {
            Some(w) if w.profit <= o.profit => Some(w),
            _ => Some(o),
        })
        .map(|o| o.id.clone());

    BusinessSummary {
        order_count: orders.len(),
        total_revenue,
        total_costs,
        total_profit,
        average_margin_percent: margin_percent(total_profit, total_revenue),
        average_order_value,
        low_margin_orders,
        recent_order_count,
        best_order,
        worst_order,
    }
}
