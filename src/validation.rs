//! Input validation applied before anything reaches a store.

use rust_decimal::Decimal;

use crate::errors::StoreError;
use crate::model::{
    MarkupSettings, NewOrder, NewProductTemplate, NewRecipe, OrderLine, OrderPatch,
    ProductTemplatePatch, RecipeIngredient, RecipePatch,
};

pub const MAX_NAME_LENGTH: usize = 255;

/// Trim a display name and check it is usable
pub fn validate_name(what: &str, name: &str) -> Result<String, StoreError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(StoreError::validation(format!("{what} name is empty")));
    }

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(StoreError::validation(format!(
            "{what} name is longer than {MAX_NAME_LENGTH} characters"
        )));
    }

    Ok(trimmed.to_string())
}

pub fn validate_cost(what: &str, cost: Decimal) -> Result<(), StoreError> {
    if cost <= Decimal::ZERO {
        return Err(StoreError::validation(format!(
            "{what} wholesale cost must be positive, got {cost}"
        )));
    }
    Ok(())
}

fn validate_price(what: &str, price: Decimal) -> Result<(), StoreError> {
    if price < Decimal::ZERO {
        return Err(StoreError::validation(format!(
            "{what} reference price cannot be negative, got {price}"
        )));
    }
    Ok(())
}

pub fn validate_new_template(draft: &mut NewProductTemplate) -> Result<(), StoreError> {
    draft.name = validate_name("product", &draft.name)?;
    validate_cost(&draft.name, draft.wholesale_cost)
}

pub fn validate_template_patch(patch: &mut ProductTemplatePatch) -> Result<(), StoreError> {
    if let Some(name) = &patch.name {
        patch.name = Some(validate_name("product", name)?);
    }
    if let Some(cost) = patch.wholesale_cost {
        validate_cost("product", cost)?;
    }
    Ok(())
}

fn validate_lines(lines: &mut [OrderLine]) -> Result<(), StoreError> {
    if lines.is_empty() {
        return Err(StoreError::validation("order has no line items"));
    }
    for line in lines.iter_mut() {
        line.name = validate_name("order item", &line.name)?;
        validate_cost(&line.name, line.wholesale_cost)?;
        if line.quantity == 0 {
            return Err(StoreError::validation(format!(
                "order item '{}' has zero quantity",
                line.name
            )));
        }
    }
    Ok(())
}

pub fn validate_new_order(order: &mut NewOrder) -> Result<(), StoreError> {
    order.name = validate_name("order", &order.name)?;
    validate_lines(&mut order.lines)
}

pub fn validate_order_patch(patch: &mut OrderPatch) -> Result<(), StoreError> {
    if let Some(name) = &patch.name {
        patch.name = Some(validate_name("order", name)?);
    }
    if let Some(lines) = patch.lines.as_mut() {
        validate_lines(lines)?;
    }
    Ok(())
}

fn validate_ingredients(ingredients: &mut [RecipeIngredient]) -> Result<(), StoreError> {
    for ingredient in ingredients.iter_mut() {
        ingredient.name = validate_name("ingredient", &ingredient.name)?;
        if ingredient.quantity == 0 {
            return Err(StoreError::validation(format!(
                "ingredient '{}' needs a quantity of at least 1",
                ingredient.name
            )));
        }
    }
    Ok(())
}

pub fn validate_new_recipe(recipe: &mut NewRecipe) -> Result<(), StoreError> {
    recipe.name = validate_name("recipe", &recipe.name)?;
    validate_price(&recipe.name, recipe.reference_price)?;
    validate_ingredients(&mut recipe.ingredients)
}

pub fn validate_recipe_patch(patch: &mut RecipePatch) -> Result<(), StoreError> {
    if let Some(name) = &patch.name {
        patch.name = Some(validate_name("recipe", name)?);
    }
    if let Some(price) = patch.reference_price {
        validate_price("recipe", price)?;
    }
    if let Some(ingredients) = patch.ingredients.as_mut() {
        validate_ingredients(ingredients)?;
    }
    Ok(())
}

/// Markup tables are rejected on save, not discovered broken at pricing time
pub fn validate_markup(markup: &MarkupSettings) -> Result<(), StoreError> {
    markup
        .validate()
        .map_err(|e| StoreError::validation(e.to_string()))
}
