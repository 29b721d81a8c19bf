//! # Inventory Reconciler
//!
//! Decrements stock counts when an order is committed. Matching is exact on
//! name and category. A fuzzy match here would silently take stock from the
//! wrong product.
//!
//! Reconciliation runs once, when an order is first saved. Editing or deleting
//! an order later does not adjust stock again.

use log::debug;

use crate::model::{OrderRecord, ProductTemplate};

/// Stock change applied to one catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockAdjustment {
    pub template_id: String,
    pub previous: u32,
    pub updated: u32,
}

/// Inventory state of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockStatus {
    /// No inventory count is kept for this product
    Untracked,
    InStock,
    /// At or below the low-stock threshold
    Low,
    OutOfStock,
}

/// Catalog after applying `order`, floored at zero
pub fn reconcile(order: &OrderRecord, catalog: &[ProductTemplate]) -> Vec<ProductTemplate> {
    let mut updated = catalog.to_vec();
    for adjustment in plan_adjustments(order, catalog) {
        if let Some(template) = updated.iter_mut().find(|t| t.id == adjustment.template_id) {
            template.inventory_count = Some(adjustment.updated);
        }
    }
    updated
}

/// Net stock changes `order` causes, one entry per affected template
///
/// Each line consumes from the first entry with identical name and category.
/// Untracked entries are skipped. Several lines for the same product
/// accumulate.
pub fn plan_adjustments(order: &OrderRecord, catalog: &[ProductTemplate]) -> Vec<StockAdjustment> {
    let mut adjustments: Vec<StockAdjustment> = Vec::new();

    for line in &order.lines {
        let Some(template) = catalog
            .iter()
            .find(|t| t.name == line.name && t.category == line.category)
        else {
            debug!("No catalog entry for order line '{}' ({})", line.name, line.category);
            continue;
        };

        let Some(count) = template.inventory_count else {
            continue;
        };

        match adjustments.iter_mut().find(|a| a.template_id == template.id) {
            Some(existing) => existing.updated = existing.updated.saturating_sub(line.quantity),
            None => adjustments.push(StockAdjustment {
                template_id: template.id.clone(),
                previous: count,
                updated: count.saturating_sub(line.quantity),
            }),
        }
    }

    adjustments
}

pub fn stock_status(template: &ProductTemplate) -> StockStatus {
    match (template.inventory_count, template.low_stock_threshold) {
        (None, _) => StockStatus::Untracked,
        (Some(0), _) => StockStatus::OutOfStock,
        (Some(count), Some(threshold)) if count <= threshold => StockStatus::Low,
        (Some(_), _) => StockStatus::InStock,
    }
}

/// Entries that need restocking, in catalog order
pub fn needs_restock(catalog: &[ProductTemplate]) -> Vec<&ProductTemplate> {
    catalog
        .iter()
        .filter(|t| matches!(stock_status(t), StockStatus::Low | StockStatus::OutOfStock))
        .collect()
}
