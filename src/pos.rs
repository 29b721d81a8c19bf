//! # POS Handoff
//!
//! Renders a saved order as a plain-text ticket that staff paste into
//! third-party point-of-sale software. Staff are trained against this layout,
//! so the section order, rule widths and labels must not change.

use std::fmt::Write;

use crate::errors::{PricingError, StoreError};
use crate::model::{MarkupSettings, OrderRecord, PosSettings};
use crate::pricing::{price_line, to_cents};

const RULE_WIDTH: usize = 50;
const NO_STAFF: &str = "N/A";

/// Fail unless POS handoff has been configured for the account
pub fn ensure_handoff_ready(settings: &PosSettings) -> Result<(), StoreError> {
    if !settings.is_configured {
        return Err(StoreError::validation(
            "POS handoff is not configured for this account",
        ));
    }
    Ok(())
}

/// Format `order` as a POS ticket
///
/// Unit and line retail prices come from the current markup table. The
/// total is the retail total stored with the order. Every amount is shown
/// rounded to the cent.
pub fn format_pos_ticket(
    order: &OrderRecord,
    markup: &MarkupSettings,
) -> Result<String, PricingError> {
    let heavy = "=".repeat(RULE_WIDTH);
    let light = "-".repeat(RULE_WIDTH);
    let staff = order.staff_name.as_deref().unwrap_or(NO_STAFF);

    let mut lines: Vec<String> = Vec::new();
    lines.push(heavy.clone());
    lines.push(format!("ARRANGEMENT: {}", order.name));
    let mut staff_line = format!("STAFF: {staff}");
    if let Some(id) = &order.staff_id {
        // Writing to a String cannot fail
        let _ = write!(staff_line, " (ID: {id})");
    }
    lines.push(staff_line);
    lines.push(format!(
        "DATE: {}",
        order.created_at.format("%-m/%-d/%Y %-I:%M:%S %p")
    ));
    lines.push(format!("ORDER ID: #{}", order.id));
    lines.push(heavy.clone());
    lines.push(String::new());

    if let Some(notes) = order.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        lines.push("CUSTOMER NOTES:".to_string());
        lines.push(notes.to_string());
        lines.push(String::new());
    }

    lines.push("ITEMS:".to_string());
    lines.push(light.clone());
    for (index, item) in order.lines.iter().enumerate() {
        let priced = price_line(item.wholesale_cost, item.quantity, item.category, markup)?;
        lines.push(format!("{}. {} ({})", index + 1, item.name, item.category));
        lines.push(format!(
            "   Qty: {} x ${:.2} = ${:.2}",
            item.quantity,
            to_cents(priced.unit_retail),
            to_cents(priced.line_retail)
        ));
        lines.push(String::new());
    }

    lines.push(light);
    lines.push(format!("TOTAL AMOUNT: ${:.2}", to_cents(order.total_retail)));
    lines.push(format!("STAFF: {staff}"));
    lines.push(heavy);

    Ok(lines.join("\n"))
}
