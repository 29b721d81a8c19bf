use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

use flowercost::coordinator::{Collection, LoadState, PersistenceCoordinator};
use flowercost::errors::StoreError;
use flowercost::local_cache::{CacheBackend, MemoryCache, MARKUP_SETTINGS_KEY};
use flowercost::model::{
    Category, MarkupSettings, NewOrder, NewProductTemplate, NewRecipe, OrderLine, OrderPatch,
    PosSettings, ProductTemplate, ProductTemplatePatch, RecipeIngredient, RecipePatch,
};
use flowercost::repository::{Repositories, Repository, Session};

fn money(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn memory() -> Arc<dyn CacheBackend> {
    Arc::new(MemoryCache::new())
}

async fn empty_coordinator(backend: Arc<dyn CacheBackend>) -> Result<PersistenceCoordinator> {
    let mut coordinator =
        PersistenceCoordinator::new(Session::local(), Repositories::local_unseeded(backend));
    coordinator.load_all().await?;
    Ok(coordinator)
}

/// Red Rose (tracked, 3 on hand) and Glass Vase (untracked)
async fn stocked_coordinator(backend: Arc<dyn CacheBackend>) -> Result<PersistenceCoordinator> {
    let mut coordinator = empty_coordinator(backend).await?;
    coordinator
        .create_template(
            NewProductTemplate::new("Red Rose", money(250), Category::Stem)
                .with_inventory(3)
                .with_low_stock_threshold(5),
        )
        .await?;
    coordinator
        .create_template(NewProductTemplate::new("Glass Vase", money(800), Category::Vase))
        .await?;
    Ok(coordinator)
}

fn rose_and_vase_order(roses: u32) -> NewOrder {
    NewOrder::new(
        "Anniversary",
        vec![
            OrderLine::new("Red Rose", money(250), roses, Category::Stem),
            OrderLine::new("Glass Vase", money(800), 1, Category::Vase),
        ],
    )
}

fn template<'a>(coordinator: &'a PersistenceCoordinator, name: &str) -> &'a ProductTemplate {
    coordinator
        .templates()
        .iter()
        .find(|t| t.name == name)
        .expect("template should exist")
}

#[tokio::test]
async fn test_load_marks_every_collection_ready() -> Result<()> {
    let coordinator = empty_coordinator(memory()).await?;

    assert!(coordinator.is_ready());
    for collection in Collection::ALL {
        assert_eq!(*coordinator.state(collection), LoadState::Ready);
    }
    // No saved markup table means the default one
    assert_eq!(*coordinator.markup()?, MarkupSettings::default());
    assert_eq!(*coordinator.pos_settings(), PosSettings::default());
    Ok(())
}

#[tokio::test]
async fn test_seeded_local_session_has_sample_data() -> Result<()> {
    let mut coordinator =
        PersistenceCoordinator::new(Session::local(), Repositories::local(memory()));
    coordinator.load_all().await?;

    assert!(!coordinator.templates().is_empty());
    assert!(!coordinator.orders().is_empty());
    assert!(!coordinator.recipes().is_empty());

    // Newest order first
    let orders = coordinator.orders();
    assert!(orders.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    Ok(())
}

#[tokio::test]
async fn test_save_order_stores_totals_and_reconciles_stock() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;

    let committed = coordinator.save_order(rose_and_vase_order(10)).await?;

    assert_eq!(committed.order.total_wholesale, money(3300));
    assert_eq!(committed.order.total_retail, money(7850));
    assert_eq!(committed.order.profit, money(4550));
    assert!(committed.fully_reconciled());

    // Stock 3, quantity 10: floored at zero
    assert_eq!(committed.reconciled.len(), 1);
    assert_eq!(template(&coordinator, "Red Rose").inventory_count, Some(0));
    assert_eq!(template(&coordinator, "Glass Vase").inventory_count, None);

    assert_eq!(coordinator.orders()[0].id, committed.order.id);
    Ok(())
}

#[tokio::test]
async fn test_identical_orders_get_distinct_ids() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;

    let first = coordinator.save_order(rose_and_vase_order(1)).await?;
    let second = coordinator.save_order(rose_and_vase_order(1)).await?;

    assert_ne!(first.order.id, second.order.id);
    assert_eq!(coordinator.orders().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_empty_patch_never_changes_stored_entity() -> Result<()> {
    let backend = memory();
    let mut coordinator = stocked_coordinator(backend.clone()).await?;
    let rose = template(&coordinator, "Red Rose").clone();

    let unchanged = coordinator
        .update_template(&rose.id, ProductTemplatePatch::default())
        .await?;
    assert_eq!(unchanged, rose);

    let recipe = coordinator
        .create_recipe(NewRecipe::new(
            "Bud Vase",
            money(2500),
            vec![RecipeIngredient::new("Red Rose", 3, Category::Stem)],
        ))
        .await?;
    let same = coordinator
        .update_recipe(&recipe.id, RecipePatch::default())
        .await?;
    assert_eq!(same.last_updated, recipe.last_updated);

    // The stored copy agrees after a reload
    let reloaded = empty_coordinator(backend).await?;
    assert_eq!(template(&reloaded, "Red Rose"), &rose);
    Ok(())
}

#[tokio::test]
async fn test_patch_distinguishes_omitted_from_cleared() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;
    let rose_id = template(&coordinator, "Red Rose").id.clone();

    let updated = coordinator
        .update_template(
            &rose_id,
            ProductTemplatePatch {
                low_stock_threshold: Some(None),
                ..Default::default()
            },
        )
        .await?;

    assert_eq!(updated.low_stock_threshold, None);
    assert_eq!(updated.inventory_count, Some(3));
    assert_eq!(updated.wholesale_cost, money(250));
    Ok(())
}

#[tokio::test]
async fn test_validation_happens_before_any_write() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;
    let before = coordinator.snapshot().clone();

    let err = coordinator
        .create_template(NewProductTemplate::new("   ", money(100), Category::Stem))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = coordinator
        .save_order(NewOrder::new("Empty", Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = coordinator
        .save_markup(MarkupSettings {
            vase: Decimal::ZERO,
            ..MarkupSettings::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    assert_eq!(coordinator.snapshot(), &before);
    Ok(())
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;

    let err = coordinator
        .update_template("nope", ProductTemplatePatch::inventory(1))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    let err = coordinator.delete_order("nope").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    let err = coordinator.analyze_recipe("nope").unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_update_order_recomputes_totals_without_touching_stock() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;
    let committed = coordinator.save_order(rose_and_vase_order(1)).await?;
    assert_eq!(template(&coordinator, "Red Rose").inventory_count, Some(2));

    let updated = coordinator
        .update_order(
            &committed.order.id,
            OrderPatch::replace_lines(vec![OrderLine::new(
                "Red Rose",
                money(250),
                2,
                Category::Stem,
            )])
            .with_notes(Some("Add a card")),
        )
        .await?;

    assert_eq!(updated.total_wholesale, money(500));
    assert_eq!(updated.total_retail, money(1250));
    assert_eq!(updated.profit, money(750));
    assert_eq!(updated.notes.as_deref(), Some("Add a card"));
    assert_eq!(updated.created_at, committed.order.created_at);
    assert_eq!(template(&coordinator, "Red Rose").inventory_count, Some(2));

    let cleared = coordinator
        .update_order(&committed.order.id, OrderPatch::default().with_notes(None))
        .await?;
    assert_eq!(cleared.notes, None);
    assert_eq!(cleared.total_retail, money(1250));
    Ok(())
}

#[tokio::test]
async fn test_delete_order_does_not_restore_stock() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;
    let committed = coordinator.save_order(rose_and_vase_order(2)).await?;

    coordinator.delete_order(&committed.order.id).await?;

    assert!(coordinator.orders().is_empty());
    assert_eq!(template(&coordinator, "Red Rose").inventory_count, Some(1));
    Ok(())
}

#[tokio::test]
async fn test_add_product_updates_existing_template() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;
    let rose_id = template(&coordinator, "Red Rose").id.clone();

    let updated = coordinator
        .add_product(NewProductTemplate::new("red rose", money(275), Category::Stem))
        .await?;
    assert_eq!(updated.id, rose_id);
    assert_eq!(updated.wholesale_cost, money(275));
    assert_eq!(updated.inventory_count, Some(3));
    assert_eq!(updated.name, "Red Rose");

    // Same name, different category is a different product
    let accessory = coordinator
        .add_product(NewProductTemplate::new("Red Rose", money(50), Category::Accessory))
        .await?;
    assert_ne!(accessory.id, rose_id);
    assert_eq!(coordinator.templates().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_recipe_analysis_against_catalog() -> Result<()> {
    let mut coordinator = empty_coordinator(memory()).await?;
    coordinator
        .create_template(NewProductTemplate::new("Red Rose", money(250), Category::Stem))
        .await?;
    coordinator
        .create_template(NewProductTemplate::new("Vase", money(800), Category::Vase))
        .await?;

    let recipe = coordinator
        .create_recipe(NewRecipe::new(
            "Classic Dozen",
            money(7500),
            vec![
                RecipeIngredient::new("Red Rose", 12, Category::Stem),
                RecipeIngredient::new("Vase", 1, Category::Vase),
            ],
        ))
        .await?;

    let analysis = coordinator.analyze_recipe(&recipe.id)?;
    assert_eq!(analysis.total_wholesale, money(3800));
    assert_eq!(analysis.total_retail, money(9100));
    assert_eq!(analysis.profit, money(5300));
    assert_eq!(analysis.reference_profit, money(3700));
    assert_eq!(analysis.profit_delta, money(-1600));
    assert!(analysis.complete);
    Ok(())
}

#[tokio::test]
async fn test_recipe_order_lines_report_every_missing_ingredient() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;
    let recipe = coordinator
        .create_recipe(NewRecipe::new(
            "Mixed",
            money(4000),
            vec![
                RecipeIngredient::new("rose", 6, Category::Stem),
                RecipeIngredient::new("Lily", 3, Category::Stem),
                RecipeIngredient::new("Peony", 2, Category::Stem),
            ],
        ))
        .await?;

    let prepared = coordinator.recipe_order_lines(&recipe.id)?;
    assert!(!prepared.is_complete());
    assert_eq!(prepared.missing, vec!["Lily", "Peony"]);
    assert_eq!(prepared.lines.len(), 1);
    assert_eq!(prepared.lines[0].wholesale_cost, money(250));
    assert_eq!(prepared.lines[0].quantity, 6);
    Ok(())
}

#[tokio::test]
async fn test_pos_handoff_requires_configuration() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;
    let committed = coordinator
        .save_order(rose_and_vase_order(1).with_staff("Jordan", Some("S-7")))
        .await?;

    let err = coordinator.pos_handoff(&committed.order.id).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    coordinator
        .save_pos_settings(PosSettings {
            system: Some(" Square ".to_string()),
            store_name: " Petal & Stem ".to_string(),
            is_configured: true,
        })
        .await?;
    assert_eq!(coordinator.pos_settings().store_name, "Petal & Stem");

    let ticket = coordinator.pos_handoff(&committed.order.id)?;
    assert!(ticket.contains("ARRANGEMENT: Anniversary"));
    assert!(ticket.contains("STAFF: Jordan (ID: S-7)"));
    assert!(ticket.contains("TOTAL AMOUNT: $22.25"));
    Ok(())
}

#[tokio::test]
async fn test_half_cent_orders_are_stored_and_ticketed_in_cents() -> Result<()> {
    let mut coordinator = empty_coordinator(memory()).await?;
    coordinator
        .save_pos_settings(PosSettings {
            system: None,
            store_name: "Petal & Stem".to_string(),
            is_configured: true,
        })
        .await?;

    // 1.25 at stem markup 2.5 is 3.125 per stem
    let wax = || OrderLine::new("Wax Flower", money(125), 1, Category::Stem);
    let single = coordinator
        .save_order(NewOrder::new("Single", vec![wax()]))
        .await?;
    assert_eq!(single.order.total_retail, money(313));
    assert_eq!(single.order.total_retail.scale(), 2);
    assert_eq!(single.order.profit, money(188));
    assert_eq!(
        single.order.profit,
        single.order.total_retail - single.order.total_wholesale
    );

    let pair = coordinator
        .save_order(NewOrder::new("Pair", vec![wax(), wax()]))
        .await?;
    assert_eq!(pair.order.total_retail, money(625));
    assert_eq!(pair.order.total_retail.scale(), 2);
    assert_eq!(pair.order.profit, money(375));

    let ticket = coordinator.pos_handoff(&pair.order.id)?;
    assert!(ticket.contains("   Qty: 1 x $3.13 = $3.13\n"));
    assert!(ticket.contains("TOTAL AMOUNT: $6.25\n"));

    let edited = coordinator
        .update_order(&single.order.id, OrderPatch::replace_lines(vec![wax(), wax(), wax()]))
        .await?;
    assert_eq!(edited.total_retail, money(938));
    assert_eq!(edited.total_retail.scale(), 2);
    Ok(())
}

#[tokio::test]
async fn test_markup_missing_category_blocks_pricing() -> Result<()> {
    let backend = memory();
    backend.set(
        MARKUP_SETTINGS_KEY,
        r#"{"stem":"2.5","vase":"2.0","accessory":"3.0"}"#,
    )?;

    let mut coordinator =
        PersistenceCoordinator::new(Session::local(), Repositories::local_unseeded(backend));
    let err = coordinator.load_all().await.unwrap_err();
    assert!(matches!(err, StoreError::Configuration(_)));
    assert!(matches!(
        coordinator.state(Collection::Markup),
        LoadState::Error(_)
    ));
    // Other collections still loaded
    assert_eq!(*coordinator.state(Collection::Templates), LoadState::Ready);

    let err = coordinator
        .save_order(NewOrder::new(
            "Blocked",
            vec![OrderLine::new("Tulip", money(100), 1, Category::Other)],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Configuration(_)));
    assert!(coordinator.orders().is_empty());

    // Saving a complete table recovers
    coordinator.save_markup(MarkupSettings::default()).await?;
    assert!(coordinator.markup().is_ok());
    Ok(())
}

#[tokio::test]
async fn test_markup_change_does_not_rewrite_history() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;
    let committed = coordinator.save_order(rose_and_vase_order(1)).await?;

    coordinator
        .save_markup(MarkupSettings {
            stem: Decimal::new(4, 0),
            ..MarkupSettings::default()
        })
        .await?;

    assert_eq!(coordinator.orders()[0].total_retail, committed.order.total_retail);
    let summary = coordinator.insights();
    assert_eq!(summary.total_revenue, committed.order.total_retail);
    Ok(())
}

#[tokio::test]
async fn test_low_stock_lists_low_and_empty_templates() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;
    // 3 on hand, threshold 5
    let low: Vec<&str> = coordinator.low_stock().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(low, vec!["Red Rose"]);

    coordinator.save_order(rose_and_vase_order(3)).await?;
    assert_eq!(template(&coordinator, "Red Rose").inventory_count, Some(0));
    assert_eq!(coordinator.low_stock().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_change_session_discards_snapshot() -> Result<()> {
    let mut coordinator = stocked_coordinator(memory()).await?;
    assert_eq!(coordinator.templates().len(), 2);

    coordinator
        .change_session(Session::local(), Repositories::local_unseeded(memory()))
        .await?;

    assert!(coordinator.templates().is_empty());
    assert!(coordinator.is_ready());
    Ok(())
}

/// Templates repository that reads normally but rejects every write
struct ReadOnlyTemplates {
    inner: Arc<dyn Repository<ProductTemplate>>,
}

fn refused(operation: &str) -> StoreError {
    StoreError::adapter(operation, anyhow::anyhow!("connection refused"))
}

#[async_trait]
impl Repository<ProductTemplate> for ReadOnlyTemplates {
    async fn load(&self) -> Result<Vec<ProductTemplate>, StoreError> {
        self.inner.load().await
    }

    async fn create(&self, _draft: NewProductTemplate) -> Result<ProductTemplate, StoreError> {
        Err(refused("create product template"))
    }

    async fn update(
        &self,
        _id: &str,
        _patch: ProductTemplatePatch,
    ) -> Result<ProductTemplate, StoreError> {
        Err(refused("update product template"))
    }

    async fn delete(&self, _id: &str) -> Result<(), StoreError> {
        Err(refused("delete product template"))
    }
}

#[tokio::test]
async fn test_failed_writes_leave_snapshot_unchanged() -> Result<()> {
    let backend = memory();
    stocked_coordinator(backend.clone()).await?;

    let mut repos = Repositories::local_unseeded(backend);
    repos.templates = Arc::new(ReadOnlyTemplates {
        inner: repos.templates.clone(),
    });
    let mut coordinator = PersistenceCoordinator::new(Session::local(), repos);
    coordinator.load_all().await?;
    let templates_before = coordinator.templates().to_vec();

    let err = coordinator
        .create_template(NewProductTemplate::new("Tulip", money(120), Category::Stem))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(coordinator.templates(), templates_before.as_slice());

    // The order commits even though its stock update cannot be written
    let committed = coordinator.save_order(rose_and_vase_order(1)).await?;
    assert!(!committed.fully_reconciled());
    assert_eq!(committed.failed.len(), 1);
    assert_eq!(coordinator.orders().len(), 1);
    assert_eq!(template(&coordinator, "Red Rose").inventory_count, Some(3));
    Ok(())
}
