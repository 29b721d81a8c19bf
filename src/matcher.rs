//! # Ingredient Matcher
//!
//! Resolves free-text ingredient names against the product catalog.
//!
//! The default [`SubstringMatcher`] treats two names as matching when either
//! one contains the other, ignoring case and surrounding whitespace. This is
//! loose on purpose ("Rose" matches "Roses" and "Spray Rose" alike), so it sits
//! behind the [`IngredientMatcher`] trait and the coordinator accepts any
//! implementation.
//!
//! The first catalog entry that matches wins, so callers should pass a catalog
//! in a fixed order. [`sorted_catalog`] sorts by name.

use crate::model::ProductTemplate;

/// Strategy for resolving an ingredient name to a catalog entry
pub trait IngredientMatcher: Send + Sync {
    /// First entry of `catalog` matching `ingredient_name`, if any
    fn find<'a>(
        &self,
        ingredient_name: &str,
        catalog: &'a [ProductTemplate],
    ) -> Option<&'a ProductTemplate>;
}

/// Case-insensitive substring containment in either direction
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringMatcher;

impl IngredientMatcher for SubstringMatcher {
    fn find<'a>(
        &self,
        ingredient_name: &str,
        catalog: &'a [ProductTemplate],
    ) -> Option<&'a ProductTemplate> {
        let wanted = normalize(ingredient_name);
        // An empty needle would be contained in every name
        if wanted.is_empty() {
            return None;
        }

        catalog.iter().find(|template| {
            let candidate = normalize(&template.name);
            !candidate.is_empty() && (candidate.contains(&wanted) || wanted.contains(&candidate))
        })
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Convenience wrapper around [`SubstringMatcher`]
pub fn match_ingredient<'a>(
    ingredient_name: &str,
    catalog: &'a [ProductTemplate],
) -> Option<&'a ProductTemplate> {
    SubstringMatcher.find(ingredient_name, catalog)
}

/// Copy of the catalog ordered by lowercase name, then id
pub fn sorted_catalog(catalog: &[ProductTemplate]) -> Vec<ProductTemplate> {
    let mut sorted = catalog.to_vec();
    sorted.sort_by(|a, b| {
        normalize(&a.name)
            .cmp(&normalize(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    sorted
}
