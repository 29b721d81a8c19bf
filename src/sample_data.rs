//! Example florist dataset bundled into the binary.
//!
//! Local sessions start from this data the first time a collection is read,
//! so a new install has a catalog, a markup table, orders and recipes to look
//! at before anything is entered.

use log::info;
use serde::Deserialize;

use crate::errors::StoreError;
use crate::model::{ArrangementRecipe, MarkupSettings, OrderRecord, ProductTemplate};

const SAMPLE_JSON: &str = include_str!("../data/sample_florist_data.json");

#[derive(Debug, Clone, Deserialize)]
pub struct SampleData {
    pub templates: Vec<ProductTemplate>,
    pub markup_settings: MarkupSettings,
    pub saved_orders: Vec<OrderRecord>,
    pub arrangement_recipes: Vec<ArrangementRecipe>,
}

/// Parse the bundled dataset
pub fn sample_data() -> Result<SampleData, StoreError> {
    let data: SampleData = serde_json::from_str(SAMPLE_JSON)
        .map_err(|e| StoreError::adapter("parse bundled sample data", e))?;

    info!(
        "Loaded sample data: {} templates, {} orders, {} recipes",
        data.templates.len(),
        data.saved_orders.len(),
        data.arrangement_recipes.len()
    );
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::order_totals;

    #[test]
    fn test_sample_data_parses() {
        let data = sample_data().unwrap();
        assert!(!data.templates.is_empty());
        assert!(!data.saved_orders.is_empty());
        assert!(!data.arrangement_recipes.is_empty());
        assert!(data.markup_settings.validate().is_ok());
    }

    #[test]
    fn test_sample_order_totals_match_markup() {
        let data = sample_data().unwrap();
        for order in &data.saved_orders {
            let totals = order_totals(&order.lines, &data.markup_settings).unwrap();
            assert_eq!(totals, order.totals(), "order {}", order.id);
        }
    }
}
