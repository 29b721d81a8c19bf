//! # Remote Store Adapter Module
//!
//! PostgreSQL implementation of the repository contract for authenticated
//! sessions. One [`RemoteStore`] serves all five collections of a single
//! account: every query filters on `account_id`, and the account is fixed
//! when the store is built.
//!
//! ## Resilience
//!
//! All calls go through a [`CircuitBreaker`]. Loads are idempotent and are
//! retried on transient connection failures with exponential backoff plus
//! jitter. Writes are attempted once; a failed write is reported to the
//! caller, who decides whether to repeat it.
//!
//! ## Schema
//!
//! Currency columns are `NUMERIC(12,2)` and multipliers `NUMERIC(6,3)`, so
//! amounts round-trip without binary float error. Orders and recipes keep
//! their line items in child tables written in the same transaction as the
//! parent row.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgConnection};
use tracing::{error, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{RecoveryConfig, StoreConfig};
use crate::errors::{PricingError, StoreError};
use crate::model::{
    ArrangementRecipe, Category, MarkupSettings, NewProductTemplate, NewRecipe, OrderDraft,
    OrderLine, OrderPatch, OrderRecord, PosSettings, ProductTemplate, ProductTemplatePatch,
    RecipeIngredient, RecipePatch,
};
use crate::repository::{Entity, Repository, SettingsRepository};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS product_templates (
        id BIGSERIAL PRIMARY KEY,
        account_id TEXT NOT NULL,
        name TEXT NOT NULL,
        wholesale_cost NUMERIC(12,2) NOT NULL CHECK (wholesale_cost >= 0),
        category TEXT NOT NULL,
        last_used TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        inventory_count BIGINT CHECK (inventory_count >= 0),
        low_stock_threshold BIGINT CHECK (low_stock_threshold >= 0)
    )",
    "CREATE INDEX IF NOT EXISTS product_templates_account_idx
        ON product_templates (account_id)",
    "CREATE TABLE IF NOT EXISTS markup_settings (
        account_id TEXT PRIMARY KEY,
        stem NUMERIC(6,3),
        vase NUMERIC(6,3),
        accessory NUMERIC(6,3),
        other NUMERIC(6,3),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS orders (
        id BIGSERIAL PRIMARY KEY,
        account_id TEXT NOT NULL,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        total_wholesale NUMERIC(12,2) NOT NULL,
        total_retail NUMERIC(12,2) NOT NULL,
        profit NUMERIC(12,2) NOT NULL,
        photo TEXT,
        notes TEXT,
        staff_name TEXT,
        staff_id TEXT
    )",
    "CREATE INDEX IF NOT EXISTS orders_account_idx
        ON orders (account_id, created_at DESC)",
    "CREATE TABLE IF NOT EXISTS order_products (
        id BIGSERIAL PRIMARY KEY,
        order_id BIGINT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        line_no INTEGER NOT NULL,
        name TEXT NOT NULL,
        wholesale_cost NUMERIC(12,2) NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        category TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS order_products_order_idx
        ON order_products (order_id)",
    "CREATE TABLE IF NOT EXISTS arrangement_recipes (
        id BIGSERIAL PRIMARY KEY,
        account_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        reference_price NUMERIC(12,2) NOT NULL,
        photo TEXT,
        website_url TEXT,
        last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS arrangement_recipes_account_idx
        ON arrangement_recipes (account_id)",
    "CREATE TABLE IF NOT EXISTS recipe_ingredients (
        id BIGSERIAL PRIMARY KEY,
        recipe_id BIGINT NOT NULL REFERENCES arrangement_recipes(id) ON DELETE CASCADE,
        line_no INTEGER NOT NULL,
        name TEXT NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        category TEXT NOT NULL,
        notes TEXT
    )",
    "CREATE INDEX IF NOT EXISTS recipe_ingredients_recipe_idx
        ON recipe_ingredients (recipe_id)",
    "CREATE TABLE IF NOT EXISTS pos_settings (
        account_id TEXT PRIMARY KEY,
        pos_system TEXT,
        store_name TEXT NOT NULL DEFAULT '',
        is_configured BOOLEAN NOT NULL DEFAULT FALSE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
];

/// Create all tables and indexes if they don't exist
pub async fn init_database_schema(pool: &PgPool) -> anyhow::Result<()> {
    info!("Initializing database schema...");

    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| {
                let head = statement.lines().next().unwrap_or_default();
                format!("Failed to run schema statement: {head}")
            })?;
    }

    info!("Database schema initialized successfully");
    Ok(())
}

#[derive(Debug, FromRow)]
struct TemplateRow {
    id: i64,
    name: String,
    wholesale_cost: Decimal,
    category: String,
    last_used: DateTime<Utc>,
    inventory_count: Option<i64>,
    low_stock_threshold: Option<i64>,
}

impl TryFrom<TemplateRow> for ProductTemplate {
    type Error = StoreError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        Ok(ProductTemplate {
            id: row.id.to_string(),
            name: row.name,
            wholesale_cost: row.wholesale_cost,
            category: decode_category("product_templates", &row.category)?,
            last_used: row.last_used,
            inventory_count: row
                .inventory_count
                .map(|v| decode_count("product_templates.inventory_count", v))
                .transpose()?,
            low_stock_threshold: row
                .low_stock_threshold
                .map(|v| decode_count("product_templates.low_stock_threshold", v))
                .transpose()?,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    name: String,
    created_at: DateTime<Utc>,
    total_wholesale: Decimal,
    total_retail: Decimal,
    profit: Decimal,
    photo: Option<String>,
    notes: Option<String>,
    staff_name: Option<String>,
    staff_id: Option<String>,
}

impl OrderRow {
    fn into_record(self, lines: Vec<OrderLine>) -> OrderRecord {
        OrderRecord {
            id: self.id.to_string(),
            name: self.name,
            created_at: self.created_at,
            lines,
            total_wholesale: self.total_wholesale,
            total_retail: self.total_retail,
            profit: self.profit,
            photo: self.photo,
            notes: self.notes,
            staff_name: self.staff_name,
            staff_id: self.staff_id,
        }
    }
}

#[derive(Debug, FromRow)]
struct OrderLineRow {
    order_id: i64,
    name: String,
    wholesale_cost: Decimal,
    quantity: i64,
    category: String,
}

impl TryFrom<OrderLineRow> for OrderLine {
    type Error = StoreError;

    fn try_from(row: OrderLineRow) -> Result<Self, Self::Error> {
        Ok(OrderLine {
            name: row.name,
            wholesale_cost: row.wholesale_cost,
            quantity: decode_count("order_products.quantity", row.quantity)?,
            category: decode_category("order_products", &row.category)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct RecipeRow {
    id: i64,
    name: String,
    description: Option<String>,
    reference_price: Decimal,
    photo: Option<String>,
    website_url: Option<String>,
    last_updated: DateTime<Utc>,
}

impl RecipeRow {
    fn into_recipe(self, ingredients: Vec<RecipeIngredient>) -> ArrangementRecipe {
        ArrangementRecipe {
            id: self.id.to_string(),
            name: self.name,
            description: self.description,
            reference_price: self.reference_price,
            ingredients,
            photo: self.photo,
            website_url: self.website_url,
            last_updated: self.last_updated,
        }
    }
}

#[derive(Debug, FromRow)]
struct IngredientRow {
    recipe_id: i64,
    name: String,
    quantity: i64,
    category: String,
    notes: Option<String>,
}

impl TryFrom<IngredientRow> for RecipeIngredient {
    type Error = StoreError;

    fn try_from(row: IngredientRow) -> Result<Self, Self::Error> {
        Ok(RecipeIngredient {
            name: row.name,
            quantity: decode_count("recipe_ingredients.quantity", row.quantity)?,
            category: decode_category("recipe_ingredients", &row.category)?,
            notes: row.notes,
        })
    }
}

/// Multipliers are nullable so a half-written row surfaces as a pricing
/// error instead of a decode failure
#[derive(Debug, FromRow)]
struct MarkupRow {
    stem: Option<Decimal>,
    vase: Option<Decimal>,
    accessory: Option<Decimal>,
    other: Option<Decimal>,
}

impl TryFrom<MarkupRow> for MarkupSettings {
    type Error = PricingError;

    fn try_from(row: MarkupRow) -> Result<Self, Self::Error> {
        Ok(MarkupSettings {
            stem: row.stem.ok_or(PricingError::MissingMultiplier(Category::Stem))?,
            vase: row.vase.ok_or(PricingError::MissingMultiplier(Category::Vase))?,
            accessory: row
                .accessory
                .ok_or(PricingError::MissingMultiplier(Category::Accessory))?,
            other: row.other.ok_or(PricingError::MissingMultiplier(Category::Other))?,
        })
    }
}

#[derive(Debug, FromRow)]
struct PosRow {
    pos_system: Option<String>,
    store_name: String,
    is_configured: bool,
}

impl From<PosRow> for PosSettings {
    fn from(row: PosRow) -> Self {
        PosSettings {
            system: row.pos_system,
            store_name: row.store_name,
            is_configured: row.is_configured,
        }
    }
}

fn decode_category(table: &str, raw: &str) -> Result<Category, StoreError> {
    raw.parse()
        .map_err(|msg: String| StoreError::adapter(format!("decode {table} row"), anyhow::anyhow!(msg)))
}

fn decode_count(column: &str, raw: i64) -> Result<u32, StoreError> {
    u32::try_from(raw).map_err(|e| StoreError::adapter(format!("decode {column}"), e))
}

/// Remote ids are numeric; anything else cannot exist in the store
fn parse_id(collection: &'static str, id: &str) -> Result<i64, StoreError> {
    id.trim()
        .parse::<i64>()
        .map_err(|_| StoreError::not_found(collection, id))
}

fn db_error(operation: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::adapter(operation, e)
}

/// Connection-level failures that may clear up on their own
fn is_transient(err: &StoreError) -> bool {
    match err {
        StoreError::Adapter { source, .. } => matches!(
            source.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
        ),
        _ => false,
    }
}

/// PostgreSQL-backed repositories for one account
pub struct RemoteStore {
    pool: PgPool,
    account_id: String,
    breaker: CircuitBreaker,
    recovery: RecoveryConfig,
}

impl RemoteStore {
    pub fn new(pool: PgPool, account_id: &str, recovery: RecoveryConfig) -> Self {
        Self {
            pool,
            account_id: account_id.to_string(),
            breaker: CircuitBreaker::new(recovery.clone()),
            recovery,
        }
    }

    /// Open a connection pool for `account_id`
    pub async fn connect(
        database_url: &str,
        account_id: &str,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(database_url)
            .await
            .map_err(db_error("connect to remote store"))?;

        info!(account = account_id, "Connected to remote store");
        Ok(Self::new(pool, account_id, config.recovery.clone()))
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        init_database_schema(&self.pool)
            .await
            .map_err(|e| StoreError::adapter("initialize schema", e))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn check_breaker(&self, operation: &str) -> Result<(), StoreError> {
        if self.breaker.is_open() {
            warn!(operation, "Circuit breaker open, failing fast");
            return Err(StoreError::adapter(
                operation,
                anyhow::anyhow!("remote store unavailable (circuit breaker open)"),
            ));
        }
        Ok(())
    }

    fn record<T>(&self, operation: &str, result: &Result<T, StoreError>) {
        match result {
            Err(e @ StoreError::Adapter { .. }) => {
                self.breaker.record_failure();
                error!(operation, error = %e, "Remote store call failed");
            }
            _ => self.breaker.record_success(),
        }
    }

    /// Run a write once behind the circuit breaker
    async fn guarded<T, Fut>(&self, operation: &str, call: Fut) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.check_breaker(operation)?;
        let result = call.await;
        self.record(operation, &result);
        result
    }

    /// Run an idempotent read, retrying transient failures
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            self.check_breaker(operation)?;

            match call().await {
                Err(e) if is_transient(&e) && attempt < self.recovery.max_retries => {
                    self.breaker.record_failure();
                    let delay = self.retry_delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient remote store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => {
                    self.record(operation, &result);
                    return result;
                }
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.recovery.backoff_ms(attempt);
        // Up to 25% jitter so clients that failed together do not retry together
        let jitter = rand::thread_rng().gen_range(0..=base / 4);
        Duration::from_millis(base + jitter)
    }

    // Product templates

    async fn fetch_templates(&self) -> Result<Vec<ProductTemplate>, StoreError> {
        let rows: Vec<TemplateRow> = sqlx::query_as(
            "SELECT id, name, wholesale_cost, category, last_used, inventory_count, low_stock_threshold
             FROM product_templates
             WHERE account_id = $1
             ORDER BY name, id",
        )
        .bind(&self.account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("load product templates"))?;

        rows.into_iter().map(ProductTemplate::try_from).collect()
    }

    async fn insert_template(&self, draft: NewProductTemplate) -> Result<ProductTemplate, StoreError> {
        let row: TemplateRow = sqlx::query_as(
            "INSERT INTO product_templates
                (account_id, name, wholesale_cost, category, last_used, inventory_count, low_stock_threshold)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id, name, wholesale_cost, category, last_used, inventory_count, low_stock_threshold",
        )
        .bind(&self.account_id)
        .bind(&draft.name)
        .bind(draft.wholesale_cost)
        .bind(draft.category.as_str())
        .bind(draft.last_used)
        .bind(draft.inventory_count.map(i64::from))
        .bind(draft.low_stock_threshold.map(i64::from))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("create product template"))?;

        ProductTemplate::try_from(row)
    }

    async fn modify_template(
        &self,
        id: &str,
        patch: ProductTemplatePatch,
    ) -> Result<ProductTemplate, StoreError> {
        let operation = "update product template";
        let key = parse_id(ProductTemplate::COLLECTION, id)?;
        let mut tx = self.pool.begin().await.map_err(db_error(operation))?;

        let row: Option<TemplateRow> = sqlx::query_as(
            "SELECT id, name, wholesale_cost, category, last_used, inventory_count, low_stock_threshold
             FROM product_templates
             WHERE id = $1 AND account_id = $2
             FOR UPDATE",
        )
        .bind(key)
        .bind(&self.account_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error(operation))?;

        let mut template = match row {
            Some(row) => ProductTemplate::try_from(row)?,
            None => return Err(StoreError::not_found(ProductTemplate::COLLECTION, id)),
        };
        if patch.is_empty() {
            return Ok(template);
        }
        patch.apply_to(&mut template);

        let row: TemplateRow = sqlx::query_as(
            "UPDATE product_templates
             SET name = $3, wholesale_cost = $4, category = $5, last_used = $6,
                 inventory_count = $7, low_stock_threshold = $8
             WHERE id = $1 AND account_id = $2
             RETURNING id, name, wholesale_cost, category, last_used, inventory_count, low_stock_threshold",
        )
        .bind(key)
        .bind(&self.account_id)
        .bind(&template.name)
        .bind(template.wholesale_cost)
        .bind(template.category.as_str())
        .bind(template.last_used)
        .bind(template.inventory_count.map(i64::from))
        .bind(template.low_stock_threshold.map(i64::from))
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error(operation))?;

        tx.commit().await.map_err(db_error(operation))?;
        ProductTemplate::try_from(row)
    }

    async fn remove_row(
        &self,
        table: &str,
        collection: &'static str,
        id: &str,
    ) -> Result<(), StoreError> {
        let key = parse_id(collection, id)?;
        // Child rows go with the parent through ON DELETE CASCADE
        let result = sqlx::query(&format!(
            "DELETE FROM {table} WHERE id = $1 AND account_id = $2"
        ))
        .bind(key)
        .bind(&self.account_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("delete row"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(collection, id));
        }
        Ok(())
    }

    // Orders

    async fn fetch_orders(&self) -> Result<Vec<OrderRecord>, StoreError> {
        let operation = "load orders";
        let rows: Vec<OrderRow> = sqlx::query_as(
            "SELECT id, name, created_at, total_wholesale, total_retail, profit,
                    photo, notes, staff_name, staff_id
             FROM orders
             WHERE account_id = $1
             ORDER BY created_at DESC, id DESC",
        )
        .bind(&self.account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error(operation))?;

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let line_rows: Vec<OrderLineRow> = sqlx::query_as(
            "SELECT order_id, name, wholesale_cost, quantity, category
             FROM order_products
             WHERE order_id = ANY($1)
             ORDER BY order_id, line_no",
        )
        .bind(ids.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error(operation))?;

        let mut lines: HashMap<i64, Vec<OrderLine>> = HashMap::new();
        for row in line_rows {
            let order_id = row.order_id;
            lines.entry(order_id).or_default().push(OrderLine::try_from(row)?);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let order_lines = lines.remove(&row.id).unwrap_or_default();
                row.into_record(order_lines)
            })
            .collect())
    }

    async fn select_order_lines(
        conn: &mut PgConnection,
        order_id: i64,
    ) -> Result<Vec<OrderLine>, StoreError> {
        let rows: Vec<OrderLineRow> = sqlx::query_as(
            "SELECT order_id, name, wholesale_cost, quantity, category
             FROM order_products
             WHERE order_id = $1
             ORDER BY line_no",
        )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_error("load order lines"))?;

        rows.into_iter().map(OrderLine::try_from).collect()
    }

    async fn insert_order_lines(
        conn: &mut PgConnection,
        order_id: i64,
        lines: &[OrderLine],
    ) -> Result<Vec<OrderLine>, StoreError> {
        let mut stored = Vec::with_capacity(lines.len());
        for (line_no, line) in lines.iter().enumerate() {
            let row: OrderLineRow = sqlx::query_as(
                "INSERT INTO order_products
                    (order_id, line_no, name, wholesale_cost, quantity, category)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING order_id, name, wholesale_cost, quantity, category",
            )
            .bind(order_id)
            .bind(line_no as i32)
            .bind(&line.name)
            .bind(line.wholesale_cost)
            .bind(i64::from(line.quantity))
            .bind(line.category.as_str())
            .fetch_one(&mut *conn)
            .await
            .map_err(db_error("store order lines"))?;
            stored.push(OrderLine::try_from(row)?);
        }
        Ok(stored)
    }

    async fn insert_order(&self, draft: OrderDraft) -> Result<OrderRecord, StoreError> {
        let operation = "create order";
        let OrderDraft { order, totals } = draft;
        let mut tx = self.pool.begin().await.map_err(db_error(operation))?;

        let row: OrderRow = sqlx::query_as(
            "INSERT INTO orders
                (account_id, name, total_wholesale, total_retail, profit,
                 photo, notes, staff_name, staff_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id, name, created_at, total_wholesale, total_retail, profit,
                       photo, notes, staff_name, staff_id",
        )
        .bind(&self.account_id)
        .bind(&order.name)
        .bind(totals.total_wholesale)
        .bind(totals.total_retail)
        .bind(totals.profit)
        .bind(&order.photo)
        .bind(&order.notes)
        .bind(&order.staff_name)
        .bind(&order.staff_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error(operation))?;

        let lines = Self::insert_order_lines(&mut tx, row.id, &order.lines).await?;
        tx.commit().await.map_err(db_error(operation))?;

        Ok(row.into_record(lines))
    }

    async fn modify_order(&self, id: &str, patch: OrderPatch) -> Result<OrderRecord, StoreError> {
        let operation = "update order";
        let key = parse_id(OrderRecord::COLLECTION, id)?;
        let mut tx = self.pool.begin().await.map_err(db_error(operation))?;

        let row: Option<OrderRow> = sqlx::query_as(
            "SELECT id, name, created_at, total_wholesale, total_retail, profit,
                    photo, notes, staff_name, staff_id
             FROM orders
             WHERE id = $1 AND account_id = $2
             FOR UPDATE",
        )
        .bind(key)
        .bind(&self.account_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error(operation))?;

        let Some(row) = row else {
            return Err(StoreError::not_found(OrderRecord::COLLECTION, id));
        };
        let existing_lines = Self::select_order_lines(&mut tx, key).await?;
        let mut order = row.into_record(existing_lines);
        if patch.is_empty() {
            return Ok(order);
        }

        let replacement = patch.lines.clone();
        patch.apply_to(&mut order);

        let row: OrderRow = sqlx::query_as(
            "UPDATE orders
             SET name = $3, total_wholesale = $4, total_retail = $5, profit = $6,
                 photo = $7, notes = $8, staff_name = $9, staff_id = $10
             WHERE id = $1 AND account_id = $2
             RETURNING id, name, created_at, total_wholesale, total_retail, profit,
                       photo, notes, staff_name, staff_id",
        )
        .bind(key)
        .bind(&self.account_id)
        .bind(&order.name)
        .bind(order.total_wholesale)
        .bind(order.total_retail)
        .bind(order.profit)
        .bind(&order.photo)
        .bind(&order.notes)
        .bind(&order.staff_name)
        .bind(&order.staff_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error(operation))?;

        let lines = match replacement {
            Some(lines) => {
                sqlx::query("DELETE FROM order_products WHERE order_id = $1")
                    .bind(key)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error(operation))?;
                Self::insert_order_lines(&mut tx, key, &lines).await?
            }
            None => order.lines,
        };

        tx.commit().await.map_err(db_error(operation))?;
        Ok(row.into_record(lines))
    }

    // Recipes

    async fn fetch_recipes(&self) -> Result<Vec<ArrangementRecipe>, StoreError> {
        let operation = "load recipes";
        let rows: Vec<RecipeRow> = sqlx::query_as(
            "SELECT id, name, description, reference_price, photo, website_url, last_updated
             FROM arrangement_recipes
             WHERE account_id = $1
             ORDER BY name, id",
        )
        .bind(&self.account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error(operation))?;

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let ingredient_rows: Vec<IngredientRow> = sqlx::query_as(
            "SELECT recipe_id, name, quantity, category, notes
             FROM recipe_ingredients
             WHERE recipe_id = ANY($1)
             ORDER BY recipe_id, line_no",
        )
        .bind(ids.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error(operation))?;

        let mut ingredients: HashMap<i64, Vec<RecipeIngredient>> = HashMap::new();
        for row in ingredient_rows {
            let recipe_id = row.recipe_id;
            ingredients
                .entry(recipe_id)
                .or_default()
                .push(RecipeIngredient::try_from(row)?);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let recipe_ingredients = ingredients.remove(&row.id).unwrap_or_default();
                row.into_recipe(recipe_ingredients)
            })
            .collect())
    }

    async fn select_ingredients(
        conn: &mut PgConnection,
        recipe_id: i64,
    ) -> Result<Vec<RecipeIngredient>, StoreError> {
        let rows: Vec<IngredientRow> = sqlx::query_as(
            "SELECT recipe_id, name, quantity, category, notes
             FROM recipe_ingredients
             WHERE recipe_id = $1
             ORDER BY line_no",
        )
        .bind(recipe_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_error("load recipe ingredients"))?;

        rows.into_iter().map(RecipeIngredient::try_from).collect()
    }

    async fn insert_ingredients(
        conn: &mut PgConnection,
        recipe_id: i64,
        ingredients: &[RecipeIngredient],
    ) -> Result<Vec<RecipeIngredient>, StoreError> {
        let mut stored = Vec::with_capacity(ingredients.len());
        for (line_no, ingredient) in ingredients.iter().enumerate() {
            let row: IngredientRow = sqlx::query_as(
                "INSERT INTO recipe_ingredients
                    (recipe_id, line_no, name, quantity, category, notes)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING recipe_id, name, quantity, category, notes",
            )
            .bind(recipe_id)
            .bind(line_no as i32)
            .bind(&ingredient.name)
            .bind(i64::from(ingredient.quantity))
            .bind(ingredient.category.as_str())
            .bind(&ingredient.notes)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_error("store recipe ingredients"))?;
            stored.push(RecipeIngredient::try_from(row)?);
        }
        Ok(stored)
    }

    async fn insert_recipe(&self, draft: NewRecipe) -> Result<ArrangementRecipe, StoreError> {
        let operation = "create recipe";
        let mut tx = self.pool.begin().await.map_err(db_error(operation))?;

        let row: RecipeRow = sqlx::query_as(
            "INSERT INTO arrangement_recipes
                (account_id, name, description, reference_price, photo, website_url)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, name, description, reference_price, photo, website_url, last_updated",
        )
        .bind(&self.account_id)
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(draft.reference_price)
        .bind(&draft.photo)
        .bind(&draft.website_url)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error(operation))?;

        let ingredients = Self::insert_ingredients(&mut tx, row.id, &draft.ingredients).await?;
        tx.commit().await.map_err(db_error(operation))?;

        Ok(row.into_recipe(ingredients))
    }

    async fn modify_recipe(
        &self,
        id: &str,
        patch: RecipePatch,
    ) -> Result<ArrangementRecipe, StoreError> {
        let operation = "update recipe";
        let key = parse_id(ArrangementRecipe::COLLECTION, id)?;
        let mut tx = self.pool.begin().await.map_err(db_error(operation))?;

        let row: Option<RecipeRow> = sqlx::query_as(
            "SELECT id, name, description, reference_price, photo, website_url, last_updated
             FROM arrangement_recipes
             WHERE id = $1 AND account_id = $2
             FOR UPDATE",
        )
        .bind(key)
        .bind(&self.account_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error(operation))?;

        let Some(row) = row else {
            return Err(StoreError::not_found(ArrangementRecipe::COLLECTION, id));
        };
        let existing = Self::select_ingredients(&mut tx, key).await?;
        let mut recipe = row.into_recipe(existing);
        if patch.is_empty() {
            return Ok(recipe);
        }

        let replacement = patch.ingredients.clone();
        patch.apply_to(&mut recipe, Utc::now());

        let row: RecipeRow = sqlx::query_as(
            "UPDATE arrangement_recipes
             SET name = $3, description = $4, reference_price = $5,
                 photo = $6, website_url = $7, last_updated = $8
             WHERE id = $1 AND account_id = $2
             RETURNING id, name, description, reference_price, photo, website_url, last_updated",
        )
        .bind(key)
        .bind(&self.account_id)
        .bind(&recipe.name)
        .bind(&recipe.description)
        .bind(recipe.reference_price)
        .bind(&recipe.photo)
        .bind(&recipe.website_url)
        .bind(recipe.last_updated)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error(operation))?;

        let ingredients = match replacement {
            Some(ingredients) => {
                sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
                    .bind(key)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error(operation))?;
                Self::insert_ingredients(&mut tx, key, &ingredients).await?
            }
            None => recipe.ingredients,
        };

        tx.commit().await.map_err(db_error(operation))?;
        Ok(row.into_recipe(ingredients))
    }

    // Settings

    async fn fetch_markup(&self) -> Result<Option<MarkupSettings>, StoreError> {
        let row: Option<MarkupRow> = sqlx::query_as(
            "SELECT stem, vase, accessory, other FROM markup_settings WHERE account_id = $1",
        )
        .bind(&self.account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load markup settings"))?;

        Ok(row.map(MarkupSettings::try_from).transpose()?)
    }

    async fn upsert_markup(&self, markup: MarkupSettings) -> Result<MarkupSettings, StoreError> {
        let row: MarkupRow = sqlx::query_as(
            "INSERT INTO markup_settings (account_id, stem, vase, accessory, other, updated_at)
             VALUES ($1, $2, $3, $4, $5, NOW())
             ON CONFLICT (account_id) DO UPDATE
             SET stem = EXCLUDED.stem, vase = EXCLUDED.vase, accessory = EXCLUDED.accessory,
                 other = EXCLUDED.other, updated_at = EXCLUDED.updated_at
             RETURNING stem, vase, accessory, other",
        )
        .bind(&self.account_id)
        .bind(markup.stem)
        .bind(markup.vase)
        .bind(markup.accessory)
        .bind(markup.other)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("save markup settings"))?;

        Ok(MarkupSettings::try_from(row)?)
    }

    async fn fetch_pos(&self) -> Result<Option<PosSettings>, StoreError> {
        let row: Option<PosRow> = sqlx::query_as(
            "SELECT pos_system, store_name, is_configured FROM pos_settings WHERE account_id = $1",
        )
        .bind(&self.account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load POS settings"))?;

        Ok(row.map(PosSettings::from))
    }

    async fn upsert_pos(&self, settings: PosSettings) -> Result<PosSettings, StoreError> {
        let row: PosRow = sqlx::query_as(
            "INSERT INTO pos_settings (account_id, pos_system, store_name, is_configured, updated_at)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (account_id) DO UPDATE
             SET pos_system = EXCLUDED.pos_system, store_name = EXCLUDED.store_name,
                 is_configured = EXCLUDED.is_configured, updated_at = EXCLUDED.updated_at
             RETURNING pos_system, store_name, is_configured",
        )
        .bind(&self.account_id)
        .bind(&settings.system)
        .bind(&settings.store_name)
        .bind(settings.is_configured)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("save POS settings"))?;

        Ok(row.into())
    }
}

#[async_trait]
impl Repository<ProductTemplate> for RemoteStore {
    async fn load(&self) -> Result<Vec<ProductTemplate>, StoreError> {
        let templates = self
            .with_retry("load product templates", || self.fetch_templates())
            .await?;
        info!(account = %self.account_id, count = templates.len(), "Loaded product templates");
        Ok(templates)
    }

    async fn create(&self, draft: NewProductTemplate) -> Result<ProductTemplate, StoreError> {
        let template = self
            .guarded("create product template", self.insert_template(draft))
            .await?;
        info!(account = %self.account_id, id = %template.id, "Created product template");
        Ok(template)
    }

    async fn update(
        &self,
        id: &str,
        patch: ProductTemplatePatch,
    ) -> Result<ProductTemplate, StoreError> {
        let template = self
            .guarded("update product template", self.modify_template(id, patch))
            .await?;
        info!(account = %self.account_id, id, "Updated product template");
        Ok(template)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.guarded(
            "delete product template",
            self.remove_row("product_templates", ProductTemplate::COLLECTION, id),
        )
        .await?;
        info!(account = %self.account_id, id, "Deleted product template");
        Ok(())
    }
}

#[async_trait]
impl Repository<OrderRecord> for RemoteStore {
    async fn load(&self) -> Result<Vec<OrderRecord>, StoreError> {
        let orders = self.with_retry("load orders", || self.fetch_orders()).await?;
        info!(account = %self.account_id, count = orders.len(), "Loaded orders");
        Ok(orders)
    }

    async fn create(&self, draft: OrderDraft) -> Result<OrderRecord, StoreError> {
        let order = self.guarded("create order", self.insert_order(draft)).await?;
        info!(account = %self.account_id, id = %order.id, "Created order");
        Ok(order)
    }

    async fn update(&self, id: &str, patch: OrderPatch) -> Result<OrderRecord, StoreError> {
        let order = self
            .guarded("update order", self.modify_order(id, patch))
            .await?;
        info!(account = %self.account_id, id, "Updated order");
        Ok(order)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.guarded(
            "delete order",
            self.remove_row("orders", OrderRecord::COLLECTION, id),
        )
        .await?;
        info!(account = %self.account_id, id, "Deleted order");
        Ok(())
    }
}

#[async_trait]
impl Repository<ArrangementRecipe> for RemoteStore {
    async fn load(&self) -> Result<Vec<ArrangementRecipe>, StoreError> {
        let recipes = self.with_retry("load recipes", || self.fetch_recipes()).await?;
        info!(account = %self.account_id, count = recipes.len(), "Loaded recipes");
        Ok(recipes)
    }

    async fn create(&self, draft: NewRecipe) -> Result<ArrangementRecipe, StoreError> {
        let recipe = self.guarded("create recipe", self.insert_recipe(draft)).await?;
        info!(account = %self.account_id, id = %recipe.id, "Created recipe");
        Ok(recipe)
    }

    async fn update(&self, id: &str, patch: RecipePatch) -> Result<ArrangementRecipe, StoreError> {
        let recipe = self
            .guarded("update recipe", self.modify_recipe(id, patch))
            .await?;
        info!(account = %self.account_id, id, "Updated recipe");
        Ok(recipe)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.guarded(
            "delete recipe",
            self.remove_row("arrangement_recipes", ArrangementRecipe::COLLECTION, id),
        )
        .await?;
        info!(account = %self.account_id, id, "Deleted recipe");
        Ok(())
    }
}

#[async_trait]
impl SettingsRepository<MarkupSettings> for RemoteStore {
    async fn load(&self) -> Result<Option<MarkupSettings>, StoreError> {
        let markup = self
            .with_retry("load markup settings", || self.fetch_markup())
            .await?;
        info!(account = %self.account_id, found = markup.is_some(), "Loaded markup settings");
        Ok(markup)
    }

    async fn save(&self, settings: MarkupSettings) -> Result<MarkupSettings, StoreError> {
        let markup = self
            .guarded("save markup settings", self.upsert_markup(settings))
            .await?;
        info!(account = %self.account_id, "Saved markup settings");
        Ok(markup)
    }
}

#[async_trait]
impl SettingsRepository<PosSettings> for RemoteStore {
    async fn load(&self) -> Result<Option<PosSettings>, StoreError> {
        let settings = self.with_retry("load POS settings", || self.fetch_pos()).await?;
        info!(account = %self.account_id, found = settings.is_some(), "Loaded POS settings");
        Ok(settings)
    }

    async fn save(&self, settings: PosSettings) -> Result<PosSettings, StoreError> {
        let saved = self
            .guarded("save POS settings", self.upsert_pos(settings))
            .await?;
        info!(account = %self.account_id, "Saved POS settings");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_numeric_id_is_not_found() {
        let err = parse_id("saved_orders", "order-1001").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(parse_id("saved_orders", "42").unwrap(), 42);
    }

    #[test]
    fn test_markup_row_with_null_multiplier() {
        let row = MarkupRow {
            stem: Some(Decimal::new(25, 1)),
            vase: None,
            accessory: Some(Decimal::new(3, 0)),
            other: Some(Decimal::new(2, 0)),
        };
        assert_eq!(
            MarkupSettings::try_from(row).unwrap_err(),
            PricingError::MissingMultiplier(Category::Vase)
        );
    }

    #[test]
    fn test_template_row_rejects_unknown_category() {
        let row = TemplateRow {
            id: 7,
            name: "Moss".to_string(),
            wholesale_cost: Decimal::ONE,
            category: "greenery".to_string(),
            last_used: Utc::now(),
            inventory_count: None,
            low_stock_threshold: None,
        };
        assert!(matches!(
            ProductTemplate::try_from(row),
            Err(StoreError::Adapter { .. })
        ));
    }

    #[test]
    fn test_only_connection_failures_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(is_transient(&StoreError::adapter("load", sqlx::Error::Io(io))));
        assert!(is_transient(&StoreError::adapter("load", sqlx::Error::PoolTimedOut)));
        assert!(!is_transient(&StoreError::adapter("load", sqlx::Error::RowNotFound)));
        assert!(!is_transient(&StoreError::validation("bad input")));
    }

    /// Store whose pool points at a port nothing listens on
    fn unreachable_store(max_retries: u32, breaker_threshold: u32) -> RemoteStore {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(100))
            .connect_lazy("postgres://flowercost@127.0.0.1:1/flowercost")
            .unwrap();
        let recovery = RecoveryConfig {
            max_retries,
            base_retry_delay_ms: 1,
            max_retry_delay_ms: 5,
            circuit_breaker_threshold: breaker_threshold,
            circuit_breaker_reset_secs: 60,
        };
        RemoteStore::new(pool, "acct-1", recovery)
    }

    fn rose() -> NewProductTemplate {
        NewProductTemplate::new("Red Rose", Decimal::new(250, 2), Category::Stem)
    }

    #[tokio::test]
    async fn test_load_retries_transient_failures() {
        let store = unreachable_store(2, 100);

        let err = Repository::<ProductTemplate>::load(&store).await.unwrap_err();

        assert!(matches!(err, StoreError::Adapter { .. }));
        assert!(is_transient(&err));
        // First attempt plus two retries, each counted once
        assert_eq!(store.breaker.failure_count(), 3);
    }

    #[tokio::test]
    async fn test_write_is_attempted_once() {
        let store = unreachable_store(3, 100);

        let err = Repository::<ProductTemplate>::create(&store, rose())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Adapter { .. }));
        assert_eq!(store.breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast() {
        let store = unreachable_store(0, 2);
        for _ in 0..2 {
            assert!(Repository::<ProductTemplate>::load(&store).await.is_err());
        }
        assert!(store.breaker.is_open());

        let err = Repository::<OrderRecord>::load(&store).await.unwrap_err();
        match &err {
            StoreError::Adapter { operation, source } => {
                assert_eq!(operation, "load orders");
                assert!(source.to_string().contains("circuit breaker open"));
            }
            other => panic!("expected adapter error, got {other:?}"),
        }

        let err = Repository::<ProductTemplate>::create(&store, rose())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("circuit breaker open"));

        // Neither call reached the pool
        assert_eq!(store.breaker.failure_count(), 2);
    }
}
