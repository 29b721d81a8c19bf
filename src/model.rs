//! # Florist Domain Model
//!
//! This module defines the five entity collections owned by an account and the
//! draft/patch types used to create and modify them.
//!
//! ## Core Concepts
//!
//! - **ProductTemplate**: a catalog entry with a wholesale unit cost
//! - **MarkupSettings**: one retail multiplier per category
//! - **OrderRecord**: an immutable snapshot of a sale, totals stored at save time
//! - **ArrangementRecipe**: a reusable composition of free-text ingredients
//! - **PosSettings**: point-of-sale handoff configuration
//!
//! ## Patches
//!
//! Patch types distinguish "field omitted" from "field cleared". A plain
//! `Option<T>` field is left alone when `None`. A nullable field is wrapped in
//! `Option<Option<T>>`, where `Some(None)` clears the stored value.
//!
//! ```rust
//! use flowercost::model::{Category, NewProductTemplate, ProductTemplatePatch};
//! use rust_decimal::Decimal;
//!
//! let rose = NewProductTemplate::new("Red Rose", Decimal::new(250, 2), Category::Stem)
//!     .with_inventory(48)
//!     .with_low_stock_threshold(12);
//!
//! let clear_threshold = ProductTemplatePatch {
//!     low_stock_threshold: Some(None),
//!     ..Default::default()
//! };
//! assert!(!clear_threshold.is_empty());
//! # let _ = rose;
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::pricing::OrderTotals;

/// Product category, each with its own markup multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Individual flower stems
    Stem,
    /// Vases and containers
    Vase,
    /// Ribbons, wraps, picks and similar extras
    Accessory,
    /// Anything else
    Other,
}

impl Category {
    /// Every category, in display order
    pub const ALL: [Category; 4] = [
        Category::Stem,
        Category::Vase,
        Category::Accessory,
        Category::Other,
    ];

    /// Lowercase name as stored in both backends
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Stem => "stem",
            Category::Vase => "vase",
            Category::Accessory => "accessory",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stem" => Ok(Category::Stem),
            "vase" => Ok(Category::Vase),
            "accessory" => Ok(Category::Accessory),
            "other" => Ok(Category::Other),
            unknown => Err(format!("unknown product category '{unknown}'")),
        }
    }
}

/// A catalog entry a business can order against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductTemplate {
    pub id: String,
    pub name: String,
    /// Purchase price per unit
    pub wholesale_cost: Decimal,
    pub category: Category,
    pub last_used: DateTime<Utc>,
    /// Units on hand. `None` means inventory is not tracked for this product
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_stock_threshold: Option<u32>,
}

/// Fields supplied when creating a product template
#[derive(Debug, Clone, PartialEq)]
pub struct NewProductTemplate {
    pub name: String,
    pub wholesale_cost: Decimal,
    pub category: Category,
    pub last_used: DateTime<Utc>,
    pub inventory_count: Option<u32>,
    pub low_stock_threshold: Option<u32>,
}

impl NewProductTemplate {
    /// Create an untracked template draft, last used now
    pub fn new(name: &str, wholesale_cost: Decimal, category: Category) -> Self {
        Self {
            name: name.to_string(),
            wholesale_cost,
            category,
            last_used: Utc::now(),
            inventory_count: None,
            low_stock_threshold: None,
        }
    }

    /// Start tracking inventory with the given count
    pub fn with_inventory(mut self, count: u32) -> Self {
        self.inventory_count = Some(count);
        self
    }

    pub fn with_low_stock_threshold(mut self, threshold: u32) -> Self {
        self.low_stock_threshold = Some(threshold);
        self
    }
}

/// Partial update of a product template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductTemplatePatch {
    pub name: Option<String>,
    pub wholesale_cost: Option<Decimal>,
    pub category: Option<Category>,
    pub last_used: Option<DateTime<Utc>>,
    pub inventory_count: Option<Option<u32>>,
    pub low_stock_threshold: Option<Option<u32>>,
}

impl ProductTemplatePatch {
    /// Patch that only sets a new inventory count
    pub fn inventory(count: u32) -> Self {
        Self {
            inventory_count: Some(Some(count)),
            ..Default::default()
        }
    }

    /// True when no field would change
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.wholesale_cost.is_none()
            && self.category.is_none()
            && self.last_used.is_none()
            && self.inventory_count.is_none()
            && self.low_stock_threshold.is_none()
    }

    /// Merge the present fields into `template`
    pub fn apply_to(self, template: &mut ProductTemplate) {
        if let Some(name) = self.name {
            template.name = name;
        }
        if let Some(cost) = self.wholesale_cost {
            template.wholesale_cost = cost;
        }
        if let Some(category) = self.category {
            template.category = category;
        }
        if let Some(last_used) = self.last_used {
            template.last_used = last_used;
        }
        if let Some(count) = self.inventory_count {
            template.inventory_count = count;
        }
        if let Some(threshold) = self.low_stock_threshold {
            template.low_stock_threshold = threshold;
        }
    }
}

/// Retail multipliers, one per category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkupSettings {
    pub stem: Decimal,
    pub vase: Decimal,
    pub accessory: Decimal,
    pub other: Decimal,
}

impl Default for MarkupSettings {
    fn default() -> Self {
        Self {
            stem: Decimal::new(25, 1),
            vase: Decimal::new(20, 1),
            accessory: Decimal::new(30, 1),
            other: Decimal::new(20, 1),
        }
    }
}

impl MarkupSettings {
    /// Raw multiplier for a category, unvalidated
    pub fn raw(&self, category: Category) -> Decimal {
        match category {
            Category::Stem => self.stem,
            Category::Vase => self.vase,
            Category::Accessory => self.accessory,
            Category::Other => self.other,
        }
    }
}

/// One line of a saved order. Copied from the catalog at order time, never a live reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub name: String,
    pub wholesale_cost: Decimal,
    pub quantity: u32,
    pub category: Category,
}

impl OrderLine {
    pub fn new(name: &str, wholesale_cost: Decimal, quantity: u32, category: Category) -> Self {
        Self {
            name: name.to_string(),
            wholesale_cost,
            quantity,
            category,
        }
    }
}

/// A committed sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
    pub total_wholesale: Decimal,
    pub total_retail: Decimal,
    /// Always `total_retail - total_wholesale` as of save time
    pub profit: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_id: Option<String>,
}

impl OrderRecord {
    /// Stored totals as a single value
    pub fn totals(&self) -> OrderTotals {
        OrderTotals {
            total_wholesale: self.total_wholesale,
            total_retail: self.total_retail,
            profit: self.profit,
        }
    }

    /// Sum of line quantities
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }
}

/// An order as entered, before pricing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewOrder {
    pub name: String,
    pub lines: Vec<OrderLine>,
    pub photo: Option<String>,
    pub notes: Option<String>,
    pub staff_name: Option<String>,
    pub staff_id: Option<String>,
}

impl NewOrder {
    pub fn new(name: &str, lines: Vec<OrderLine>) -> Self {
        Self {
            name: name.to_string(),
            lines,
            ..Default::default()
        }
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn with_staff(mut self, name: &str, id: Option<&str>) -> Self {
        self.staff_name = Some(name.to_string());
        self.staff_id = id.map(str::to_string);
        self
    }
}

/// A priced order ready for storage
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    pub order: NewOrder,
    pub totals: OrderTotals,
}

/// Partial update of a saved order
///
/// Totals cannot be set directly: the coordinator recomputes them whenever
/// `lines` is replaced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPatch {
    pub name: Option<String>,
    pub lines: Option<Vec<OrderLine>>,
    pub photo: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub staff_name: Option<Option<String>>,
    pub staff_id: Option<Option<String>>,
    pub(crate) totals: Option<OrderTotals>,
}

impl OrderPatch {
    /// Patch replacing all line items
    pub fn replace_lines(lines: Vec<OrderLine>) -> Self {
        Self {
            lines: Some(lines),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set notes, or clear them with `None`
    pub fn with_notes(mut self, notes: Option<&str>) -> Self {
        self.notes = Some(notes.map(str::to_string));
        self
    }

    pub fn with_photo(mut self, photo: Option<&str>) -> Self {
        self.photo = Some(photo.map(str::to_string));
        self
    }

    pub fn with_staff(mut self, name: Option<&str>, id: Option<&str>) -> Self {
        self.staff_name = Some(name.map(str::to_string));
        self.staff_id = Some(id.map(str::to_string));
        self
    }

    /// Totals recomputed for the replacement lines, if any
    pub fn totals(&self) -> Option<&OrderTotals> {
        self.totals.as_ref()
    }

    pub(crate) fn with_totals(mut self, totals: OrderTotals) -> Self {
        self.totals = Some(totals);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.lines.is_none()
            && self.photo.is_none()
            && self.notes.is_none()
            && self.staff_name.is_none()
            && self.staff_id.is_none()
    }

    pub fn apply_to(self, order: &mut OrderRecord) {
        if let Some(name) = self.name {
            order.name = name;
        }
        if let Some(lines) = self.lines {
            order.lines = lines;
        }
        if let Some(totals) = self.totals {
            order.total_wholesale = totals.total_wholesale;
            order.total_retail = totals.total_retail;
            order.profit = totals.profit;
        }
        if let Some(photo) = self.photo {
            order.photo = photo;
        }
        if let Some(notes) = self.notes {
            order.notes = notes;
        }
        if let Some(staff_name) = self.staff_name {
            order.staff_name = staff_name;
        }
        if let Some(staff_id) = self.staff_id {
            order.staff_id = staff_id;
        }
    }
}

/// One ingredient line of a recipe, resolved against the catalog by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub name: String,
    pub quantity: u32,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RecipeIngredient {
    pub fn new(name: &str, quantity: u32, category: Category) -> Self {
        Self {
            name: name.to_string(),
            quantity,
            category,
            notes: None,
        }
    }
}

/// A named arrangement design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrangementRecipe {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Price the arrangement sells for elsewhere (e.g. the shop website)
    pub reference_price: Decimal,
    pub ingredients: Vec<RecipeIngredient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRecipe {
    pub name: String,
    pub description: Option<String>,
    pub reference_price: Decimal,
    pub ingredients: Vec<RecipeIngredient>,
    pub photo: Option<String>,
    pub website_url: Option<String>,
}

impl NewRecipe {
    pub fn new(name: &str, reference_price: Decimal, ingredients: Vec<RecipeIngredient>) -> Self {
        Self {
            name: name.to_string(),
            reference_price,
            ingredients,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipePatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub reference_price: Option<Decimal>,
    pub ingredients: Option<Vec<RecipeIngredient>>,
    pub photo: Option<Option<String>>,
    pub website_url: Option<Option<String>>,
}

impl RecipePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.reference_price.is_none()
            && self.ingredients.is_none()
            && self.photo.is_none()
            && self.website_url.is_none()
    }

    /// Merge present fields and stamp `last_updated`
    pub fn apply_to(self, recipe: &mut ArrangementRecipe, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            recipe.name = name;
        }
        if let Some(description) = self.description {
            recipe.description = description;
        }
        if let Some(price) = self.reference_price {
            recipe.reference_price = price;
        }
        if let Some(ingredients) = self.ingredients {
            recipe.ingredients = ingredients;
        }
        if let Some(photo) = self.photo {
            recipe.photo = photo;
        }
        if let Some(url) = self.website_url {
            recipe.website_url = url;
        }
        recipe.last_updated = now;
    }
}

/// Point-of-sale handoff configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub store_name: String,
    pub is_configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rose() -> ProductTemplate {
        ProductTemplate {
            id: "t-1".to_string(),
            name: "Red Rose".to_string(),
            wholesale_cost: Decimal::new(250, 2),
            category: Category::Stem,
            last_used: Utc.with_ymd_and_hms(2024, 2, 10, 9, 30, 0).unwrap(),
            inventory_count: Some(24),
            low_stock_threshold: Some(6),
        }
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("stem".parse::<Category>().unwrap(), Category::Stem);
        assert_eq!(" Vase ".parse::<Category>().unwrap(), Category::Vase);
        assert_eq!("ACCESSORY".parse::<Category>().unwrap(), Category::Accessory);
        assert!("greenery".parse::<Category>().is_err());
        assert_eq!(Category::Other.to_string(), "other");
    }

    #[test]
    fn test_empty_template_patch_changes_nothing() {
        let mut template = rose();
        let patch = ProductTemplatePatch::default();
        assert!(patch.is_empty());

        patch.apply_to(&mut template);
        assert_eq!(template, rose());
    }

    #[test]
    fn test_template_patch_omitted_versus_cleared() {
        let mut template = rose();
        ProductTemplatePatch {
            wholesale_cost: Some(Decimal::new(275, 2)),
            low_stock_threshold: Some(None),
            ..Default::default()
        }
        .apply_to(&mut template);

        assert_eq!(template.wholesale_cost, Decimal::new(275, 2));
        assert_eq!(template.low_stock_threshold, None);
        // Omitted field stays as it was
        assert_eq!(template.inventory_count, Some(24));
    }

    #[test]
    fn test_order_patch_keeps_totals_without_lines() {
        let mut order = OrderRecord {
            id: "o-1".to_string(),
            name: "Birthday".to_string(),
            created_at: Utc::now(),
            lines: vec![OrderLine::new("Tulip", Decimal::new(150, 2), 10, Category::Stem)],
            total_wholesale: Decimal::new(1500, 2),
            total_retail: Decimal::new(3750, 2),
            profit: Decimal::new(2250, 2),
            photo: None,
            notes: Some("Gift wrap".to_string()),
            staff_name: None,
            staff_id: None,
        };

        OrderPatch {
            notes: Some(None),
            ..Default::default()
        }
        .apply_to(&mut order);

        assert_eq!(order.notes, None);
        assert_eq!(order.total_retail, Decimal::new(3750, 2));
        assert_eq!(order.item_count(), 10);
    }

    #[test]
    fn test_product_template_json_uses_iso_dates() {
        let json = serde_json::to_string(&rose()).unwrap();
        assert!(json.contains("2024-02-10T09:30:00Z"));
        assert!(json.contains("\"category\":\"stem\""));

        let parsed: ProductTemplate = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rose());
    }

    #[test]
    fn test_markup_defaults() {
        let markup = MarkupSettings::default();
        assert_eq!(markup.raw(Category::Stem), Decimal::new(25, 1));
        assert_eq!(markup.raw(Category::Accessory), Decimal::new(3, 0));
    }
}
