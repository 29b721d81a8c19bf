//! # Persistence Coordinator Module
//!
//! The stateful core of a session. It holds the in-memory snapshot of all
//! five collections and is the only way callers change them.
//!
//! ## Write path
//!
//! 1. Validate and normalize the input (no store call on failure)
//! 2. Write through the session's repository
//! 3. On success, replace the snapshot entry with the store's response
//! 4. Run follow-up work such as inventory reconciliation
//!
//! A failed write leaves the snapshot exactly as it was.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowercost::coordinator::PersistenceCoordinator;
//! use flowercost::local_cache::MemoryCache;
//! use flowercost::repository::{Repositories, Session};
//!
//! # async fn demo() -> Result<(), flowercost::errors::StoreError> {
//! let repos = Repositories::local(Arc::new(MemoryCache::new()));
//! let mut coordinator = PersistenceCoordinator::new(Session::local(), repos);
//! coordinator.load_all().await?;
//! println!("{} products", coordinator.templates().len());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::errors::StoreError;
use crate::insights::{summarize, BusinessSummary};
use crate::inventory::{needs_restock, plan_adjustments};
use crate::matcher::{sorted_catalog, IngredientMatcher, SubstringMatcher};
use crate::model::{
    ArrangementRecipe, MarkupSettings, NewOrder, NewProductTemplate, NewRecipe, OrderDraft,
    OrderPatch, OrderRecord, PosSettings, ProductTemplate, ProductTemplatePatch, RecipePatch,
};
use crate::pos::{ensure_handoff_ready, format_pos_ticket};
use crate::pricing::order_totals;
use crate::recipe_analysis::{analyze, order_lines_for_recipe, RecipeCostAnalysis, RecipeOrderLines};
use crate::repository::{Entity, Repositories, Session};
use crate::validation::{
    validate_markup, validate_new_order, validate_new_recipe, validate_new_template,
    validate_order_patch, validate_recipe_patch, validate_template_patch,
};

/// The five collections held in the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Templates,
    Markup,
    Orders,
    Recipes,
    Pos,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Templates,
        Collection::Markup,
        Collection::Orders,
        Collection::Recipes,
        Collection::Pos,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Templates => "product templates",
            Collection::Markup => "markup settings",
            Collection::Orders => "orders",
            Collection::Recipes => "recipes",
            Collection::Pos => "POS settings",
        }
    }
}

/// Lifecycle of one collection within a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    /// Load failed; the message describes why
    Error(String),
}

#[derive(Debug, Clone, Default)]
struct LoadStates {
    templates: LoadState,
    markup: LoadState,
    orders: LoadState,
    recipes: LoadState,
    pos: LoadState,
}

impl LoadStates {
    fn get(&self, collection: Collection) -> &LoadState {
        match collection {
            Collection::Templates => &self.templates,
            Collection::Markup => &self.markup,
            Collection::Orders => &self.orders,
            Collection::Recipes => &self.recipes,
            Collection::Pos => &self.pos,
        }
    }

    fn set(&mut self, collection: Collection, state: LoadState) {
        let slot = match collection {
            Collection::Templates => &mut self.templates,
            Collection::Markup => &mut self.markup,
            Collection::Orders => &mut self.orders,
            Collection::Recipes => &mut self.recipes,
            Collection::Pos => &mut self.pos,
        };
        *slot = state;
    }
}

/// In-memory copy of everything the session has loaded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub templates: Vec<ProductTemplate>,
    pub markup: MarkupSettings,
    /// Newest first
    pub orders: Vec<OrderRecord>,
    pub recipes: Vec<ArrangementRecipe>,
    pub pos: PosSettings,
}

/// Stock write that failed after an order was saved
#[derive(Debug)]
pub struct ReconcileFailure {
    pub template_id: String,
    pub error: StoreError,
}

impl fmt::Display for ReconcileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template {}: {}", self.template_id, self.error)
    }
}

/// Result of saving an order
///
/// The order itself is committed even when some stock updates failed.
#[derive(Debug)]
pub struct CommittedOrder {
    pub order: OrderRecord,
    /// Templates whose stock was decremented, as stored
    pub reconciled: Vec<ProductTemplate>,
    pub failed: Vec<ReconcileFailure>,
}

impl CommittedOrder {
    pub fn fully_reconciled(&self) -> bool {
        self.failed.is_empty()
    }
}

fn failed(operation: &str, error: StoreError) -> StoreError {
    warn!(operation, error = %error, "Store operation failed");
    error
}

/// Owner of a session's snapshot and its repositories
pub struct PersistenceCoordinator {
    session: Session,
    repos: Repositories,
    matcher: Arc<dyn IngredientMatcher>,
    snapshot: Snapshot,
    states: LoadStates,
}

impl PersistenceCoordinator {
    /// New coordinator with every collection uninitialized
    pub fn new(session: Session, repos: Repositories) -> Self {
        Self {
            session,
            repos,
            matcher: Arc::new(SubstringMatcher),
            snapshot: Snapshot::default(),
            states: LoadStates::default(),
        }
    }

    /// Replace the ingredient matching strategy
    pub fn with_matcher(mut self, matcher: Arc<dyn IngredientMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn templates(&self) -> &[ProductTemplate] {
        &self.snapshot.templates
    }

    pub fn orders(&self) -> &[OrderRecord] {
        &self.snapshot.orders
    }

    pub fn recipes(&self) -> &[ArrangementRecipe] {
        &self.snapshot.recipes
    }

    pub fn pos_settings(&self) -> &PosSettings {
        &self.snapshot.pos
    }

    pub fn state(&self, collection: Collection) -> &LoadState {
        self.states.get(collection)
    }

    /// True once every collection has loaded
    pub fn is_ready(&self) -> bool {
        Collection::ALL
            .iter()
            .all(|c| *self.states.get(*c) == LoadState::Ready)
    }

    /// Markup table usable for pricing
    pub fn markup(&self) -> Result<&MarkupSettings, StoreError> {
        match self.states.get(Collection::Markup) {
            LoadState::Ready => Ok(&self.snapshot.markup),
            LoadState::Error(msg) => Err(StoreError::Configuration(format!(
                "markup settings unavailable: {msg}"
            ))),
            _ => Err(StoreError::Configuration(
                "markup settings have not been loaded".to_string(),
            )),
        }
    }

    /// Load all five collections concurrently
    ///
    /// Every collection is settled even when another fails. The first error
    /// is returned after all of them have been recorded.
    pub async fn load_all(&mut self) -> Result<(), StoreError> {
        for collection in Collection::ALL {
            self.states.set(collection, LoadState::Loading);
        }

        let repos = self.repos.clone();
        let (templates, markup, orders, recipes, pos) = tokio::join!(
            repos.templates.load(),
            repos.markup.load(),
            repos.orders.load(),
            repos.recipes.load(),
            repos.pos.load(),
        );

        let mut first_error = None;

        if let Some(templates) = self.settle(Collection::Templates, templates, &mut first_error) {
            self.snapshot.templates = templates;
        }

        // Stored tables are checked here so a bad multiplier is caught before any pricing
        let markup = markup.and_then(|stored| match stored {
            Some(markup) => markup.validate().map(|_| markup).map_err(StoreError::from),
            None => Ok(MarkupSettings::default()),
        });
        if let Some(markup) = self.settle(Collection::Markup, markup, &mut first_error) {
            self.snapshot.markup = markup;
        }

        if let Some(mut orders) = self.settle(Collection::Orders, orders, &mut first_error) {
            orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            self.snapshot.orders = orders;
        }

        if let Some(recipes) = self.settle(Collection::Recipes, recipes, &mut first_error) {
            self.snapshot.recipes = recipes;
        }

        if let Some(pos) = self.settle(Collection::Pos, pos, &mut first_error) {
            self.snapshot.pos = pos.unwrap_or_default();
        }

        info!(
            authenticated = self.session.is_authenticated(),
            templates = self.snapshot.templates.len(),
            orders = self.snapshot.orders.len(),
            recipes = self.snapshot.recipes.len(),
            "Snapshot loaded"
        );

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn settle<T>(
        &mut self,
        collection: Collection,
        result: Result<T, StoreError>,
        first_error: &mut Option<StoreError>,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                self.states.set(collection, LoadState::Ready);
                Some(value)
            }
            Err(error) => {
                warn!(collection = collection.name(), error = %error, "Failed to load collection");
                self.states
                    .set(collection, LoadState::Error(error.to_string()));
                first_error.get_or_insert(error);
                None
            }
        }
    }

    /// Switch to another identity, discarding everything loaded so far
    pub async fn change_session(
        &mut self,
        session: Session,
        repos: Repositories,
    ) -> Result<(), StoreError> {
        info!(
            from_authenticated = self.session.is_authenticated(),
            to_authenticated = session.is_authenticated(),
            "Changing session"
        );
        self.session = session;
        self.repos = repos;
        self.snapshot = Snapshot::default();
        self.states = LoadStates::default();
        self.load_all().await
    }

    fn position<E: Entity>(items: &[E], id: &str) -> Result<usize, StoreError> {
        items
            .iter()
            .position(|item| item.id() == id)
            .ok_or_else(|| StoreError::not_found(E::COLLECTION, id))
    }

    // Product templates

    pub async fn create_template(
        &mut self,
        mut draft: NewProductTemplate,
    ) -> Result<ProductTemplate, StoreError> {
        validate_new_template(&mut draft)?;

        let template = self
            .repos
            .templates
            .create(draft)
            .await
            .map_err(|e| failed("create product template", e))?;

        info!(id = %template.id, name = %template.name, "Product template created");
        self.snapshot.templates.push(template.clone());
        Ok(template)
    }

    pub async fn update_template(
        &mut self,
        id: &str,
        mut patch: ProductTemplatePatch,
    ) -> Result<ProductTemplate, StoreError> {
        validate_template_patch(&mut patch)?;
        let index = Self::position(&self.snapshot.templates, id)?;
        if patch.is_empty() {
            return Ok(self.snapshot.templates[index].clone());
        }

        let template = self
            .repos
            .templates
            .update(id, patch)
            .await
            .map_err(|e| failed("update product template", e))?;

        info!(id, "Product template updated");
        self.snapshot.templates[index] = template.clone();
        Ok(template)
    }

    pub async fn delete_template(&mut self, id: &str) -> Result<(), StoreError> {
        let index = Self::position(&self.snapshot.templates, id)?;

        self.repos
            .templates
            .delete(id)
            .await
            .map_err(|e| failed("delete product template", e))?;

        info!(id, "Product template deleted");
        self.snapshot.templates.remove(index);
        Ok(())
    }

    /// Create a template, or refresh the one with the same name and category
    ///
    /// Names are compared ignoring case. An existing template gets the new
    /// cost and last-used time, and the inventory fields when given.
    pub async fn add_product(
        &mut self,
        mut draft: NewProductTemplate,
    ) -> Result<ProductTemplate, StoreError> {
        validate_new_template(&mut draft)?;

        let wanted = draft.name.to_lowercase();
        let existing = self
            .snapshot
            .templates
            .iter()
            .find(|t| t.category == draft.category && t.name.to_lowercase() == wanted)
            .map(|t| t.id.clone());

        match existing {
            Some(id) => {
                let patch = ProductTemplatePatch {
                    wholesale_cost: Some(draft.wholesale_cost),
                    last_used: Some(draft.last_used),
                    inventory_count: draft.inventory_count.map(Some),
                    low_stock_threshold: draft.low_stock_threshold.map(Some),
                    ..Default::default()
                };
                self.update_template(&id, patch).await
            }
            None => self.create_template(draft).await,
        }
    }

    /// Templates at or below their low-stock threshold, or out of stock
    pub fn low_stock(&self) -> Vec<&ProductTemplate> {
        needs_restock(&self.snapshot.templates)
    }

    // Settings

    pub async fn save_markup(&mut self, markup: MarkupSettings) -> Result<MarkupSettings, StoreError> {
        validate_markup(&markup)?;

        let saved = self
            .repos
            .markup
            .save(markup)
            .await
            .map_err(|e| failed("save markup settings", e))?;

        info!("Markup settings saved");
        self.snapshot.markup = saved;
        self.states.set(Collection::Markup, LoadState::Ready);
        Ok(saved)
    }

    pub async fn save_pos_settings(&mut self, mut settings: PosSettings) -> Result<PosSettings, StoreError> {
        settings.store_name = settings.store_name.trim().to_string();
        settings.system = settings
            .system
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let saved = self
            .repos
            .pos
            .save(settings)
            .await
            .map_err(|e| failed("save POS settings", e))?;

        info!(configured = saved.is_configured, "POS settings saved");
        self.snapshot.pos = saved.clone();
        self.states.set(Collection::Pos, LoadState::Ready);
        Ok(saved)
    }

    // Orders

    /// Price, store and reconcile a new order
    ///
    /// Totals are computed from the current markup table and stored with the
    /// order. After the order is stored, each tracked template it consumes is
    /// decremented. A failed stock write is logged and reported in
    /// [`CommittedOrder::failed`]; the order stays saved.
    pub async fn save_order(&mut self, mut order: NewOrder) -> Result<CommittedOrder, StoreError> {
        validate_new_order(&mut order)?;
        let totals = order_totals(&order.lines, self.markup()?)?;

        let record = self
            .repos
            .orders
            .create(OrderDraft { order, totals })
            .await
            .map_err(|e| failed("create order", e))?;

        info!(
            id = %record.id,
            total_retail = %record.total_retail,
            profit = %record.profit,
            "Order saved"
        );
        self.snapshot.orders.insert(0, record.clone());

        let mut reconciled = Vec::new();
        let mut failures = Vec::new();

        for adjustment in plan_adjustments(&record, &self.snapshot.templates) {
            let patch = ProductTemplatePatch {
                inventory_count: Some(Some(adjustment.updated)),
                last_used: Some(record.created_at),
                ..Default::default()
            };

            match self.repos.templates.update(&adjustment.template_id, patch).await {
                Ok(template) => {
                    if let Some(slot) = self
                        .snapshot
                        .templates
                        .iter_mut()
                        .find(|t| t.id == template.id)
                    {
                        *slot = template.clone();
                    }
                    reconciled.push(template);
                }
                Err(error) => {
                    warn!(
                        order = %record.id,
                        template = %adjustment.template_id,
                        error = %error,
                        "Stock update failed after order was saved"
                    );
                    failures.push(ReconcileFailure {
                        template_id: adjustment.template_id,
                        error,
                    });
                }
            }
        }

        Ok(CommittedOrder {
            order: record,
            reconciled,
            failed: failures,
        })
    }

    /// Edit a saved order
    ///
    /// Replacing the lines recomputes the stored totals at the current
    /// markup. Stock is not adjusted.
    pub async fn update_order(
        &mut self,
        id: &str,
        mut patch: OrderPatch,
    ) -> Result<OrderRecord, StoreError> {
        validate_order_patch(&mut patch)?;
        let index = Self::position(&self.snapshot.orders, id)?;
        if patch.is_empty() {
            return Ok(self.snapshot.orders[index].clone());
        }

        if let Some(lines) = &patch.lines {
            let totals = order_totals(lines, self.markup()?)?;
            patch = patch.with_totals(totals);
        }

        let order = self
            .repos
            .orders
            .update(id, patch)
            .await
            .map_err(|e| failed("update order", e))?;

        info!(id, "Order updated");
        self.snapshot.orders[index] = order.clone();
        Ok(order)
    }

    /// Remove a saved order. Consumed stock is not restored
    pub async fn delete_order(&mut self, id: &str) -> Result<(), StoreError> {
        let index = Self::position(&self.snapshot.orders, id)?;

        self.repos
            .orders
            .delete(id)
            .await
            .map_err(|e| failed("delete order", e))?;

        info!(id, "Order deleted");
        self.snapshot.orders.remove(index);
        Ok(())
    }

    pub fn insights(&self) -> BusinessSummary {
        summarize(&self.snapshot.orders, Utc::now())
    }

    /// Render a saved order as a POS ticket
    pub fn pos_handoff(&self, order_id: &str) -> Result<String, StoreError> {
        ensure_handoff_ready(&self.snapshot.pos)?;
        let index = Self::position(&self.snapshot.orders, order_id)?;
        Ok(format_pos_ticket(&self.snapshot.orders[index], self.markup()?)?)
    }

    // Recipes

    pub async fn create_recipe(&mut self, mut draft: NewRecipe) -> Result<ArrangementRecipe, StoreError> {
        validate_new_recipe(&mut draft)?;

        let recipe = self
            .repos
            .recipes
            .create(draft)
            .await
            .map_err(|e| failed("create recipe", e))?;

        info!(id = %recipe.id, name = %recipe.name, "Recipe created");
        self.snapshot.recipes.push(recipe.clone());
        Ok(recipe)
    }

    pub async fn update_recipe(
        &mut self,
        id: &str,
        mut patch: RecipePatch,
    ) -> Result<ArrangementRecipe, StoreError> {
        validate_recipe_patch(&mut patch)?;
        let index = Self::position(&self.snapshot.recipes, id)?;
        if patch.is_empty() {
            return Ok(self.snapshot.recipes[index].clone());
        }

        let recipe = self
            .repos
            .recipes
            .update(id, patch)
            .await
            .map_err(|e| failed("update recipe", e))?;

        info!(id, "Recipe updated");
        self.snapshot.recipes[index] = recipe.clone();
        Ok(recipe)
    }

    pub async fn delete_recipe(&mut self, id: &str) -> Result<(), StoreError> {
        let index = Self::position(&self.snapshot.recipes, id)?;

        self.repos
            .recipes
            .delete(id)
            .await
            .map_err(|e| failed("delete recipe", e))?;

        info!(id, "Recipe deleted");
        self.snapshot.recipes.remove(index);
        Ok(())
    }

    /// Cost a recipe against the catalog sorted by name
    pub fn analyze_recipe(&self, recipe_id: &str) -> Result<RecipeCostAnalysis, StoreError> {
        let index = Self::position(&self.snapshot.recipes, recipe_id)?;
        let catalog = sorted_catalog(&self.snapshot.templates);
        Ok(analyze(
            &self.snapshot.recipes[index],
            &catalog,
            self.markup()?,
            self.matcher.as_ref(),
        )?)
    }

    /// Order lines for a recipe, with every unmatched ingredient listed
    pub fn recipe_order_lines(&self, recipe_id: &str) -> Result<RecipeOrderLines, StoreError> {
        let index = Self::position(&self.snapshot.recipes, recipe_id)?;
        let catalog = sorted_catalog(&self.snapshot.templates);
        Ok(order_lines_for_recipe(
            &self.snapshot.recipes[index],
            &catalog,
            self.matcher.as_ref(),
        ))
    }
}
