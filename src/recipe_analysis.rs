//! # Recipe Cost Analysis
//!
//! Evaluates an arrangement recipe against the current catalog and markup
//! table, and turns a recipe into order lines.
//!
//! Ingredients that cannot be found in the catalog are collected rather than
//! treated as failures. When any are missing, the dollar figures cover only
//! part of the recipe and should not be shown as the recipe's cost.

use rust_decimal::Decimal;

use crate::errors::PricingError;
use crate::matcher::IngredientMatcher;
use crate::model::{ArrangementRecipe, MarkupSettings, OrderLine, ProductTemplate};
use crate::pricing::price_line;

/// Cost breakdown of a recipe
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeCostAnalysis {
    pub total_wholesale: Decimal,
    pub total_retail: Decimal,
    /// Profit at the shop's own markup
    pub profit: Decimal,
    /// Profit if sold at the recipe's reference price
    pub reference_profit: Decimal,
    /// `reference_profit - profit`; positive when the reference price earns more
    pub profit_delta: Decimal,
    /// Ingredient names with no catalog entry, in recipe order
    pub missing_ingredients: Vec<String>,
    /// True iff every ingredient was resolved
    pub complete: bool,
}

/// Recipe converted into order lines
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecipeOrderLines {
    pub lines: Vec<OrderLine>,
    pub missing: Vec<String>,
}

impl RecipeOrderLines {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Price every resolvable ingredient of `recipe`
///
/// Each ingredient uses the markup of its own category, not that of the
/// matched catalog entry.
pub fn analyze(
    recipe: &ArrangementRecipe,
    catalog: &[ProductTemplate],
    markup: &MarkupSettings,
    matcher: &dyn IngredientMatcher,
) -> Result<RecipeCostAnalysis, PricingError> {
    let mut total_wholesale = Decimal::ZERO;
    let mut total_retail = Decimal::ZERO;
    let mut missing_ingredients = Vec::new();

    for ingredient in &recipe.ingredients {
        match matcher.find(&ingredient.name, catalog) {
            Some(template) => {
                let priced = price_line(
                    template.wholesale_cost,
                    ingredient.quantity,
                    ingredient.category,
                    markup,
                )?;
                total_wholesale += priced.line_wholesale;
                total_retail += priced.line_retail;
            }
            None => missing_ingredients.push(ingredient.name.clone()),
        }
    }

    let profit = total_retail - total_wholesale;
    let reference_profit = recipe.reference_price - total_wholesale;

    Ok(RecipeCostAnalysis {
        total_wholesale,
        total_retail,
        profit,
        reference_profit,
        profit_delta: reference_profit - profit,
        complete: missing_ingredients.is_empty(),
        missing_ingredients,
    })
}

/// Build order lines from a recipe, using catalog costs
pub fn order_lines_for_recipe(
    recipe: &ArrangementRecipe,
    catalog: &[ProductTemplate],
    matcher: &dyn IngredientMatcher,
) -> RecipeOrderLines {
    let mut result = RecipeOrderLines::default();

    for ingredient in &recipe.ingredients {
        match matcher.find(&ingredient.name, catalog) {
            Some(template) => result.lines.push(OrderLine {
                name: ingredient.name.clone(),
                wholesale_cost: template.wholesale_cost,
                quantity: ingredient.quantity,
                category: ingredient.category,
            }),
            None => result.missing.push(ingredient.name.clone()),
        }
    }

    result
}
