use anyhow::{Context, Result};
use std::env;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flowercost::config::StoreConfig;
use flowercost::coordinator::PersistenceCoordinator;
use flowercost::inventory::{stock_status, StockStatus};
use flowercost::pricing::{retail_unit_price, round_percent, to_cents};
use flowercost::repository::{open, Session};

/// Install the tracing subscriber; `log` records from the library are
/// forwarded into it
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let json = env::var("FLOWERCOST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_logging();
    info!("Starting FlowerCost");

    let config = StoreConfig::from_env();
    let session = Session::from_config(&config);
    match session.account() {
        Some(account) => info!(account, "Using remote store"),
        None => info!(data_dir = %config.data_dir.display(), "Using local cache"),
    }

    let repos = open(&session, &config)
        .await
        .context("Failed to open repositories")?;
    let mut coordinator = PersistenceCoordinator::new(session, repos);
    coordinator
        .load_all()
        .await
        .context("Failed to load florist data")?;

    print_report(&coordinator)
}

fn print_report(coordinator: &PersistenceCoordinator) -> Result<()> {
    let markup = coordinator.markup().context("Markup settings unusable")?;

    println!("CATALOG ({} products)", coordinator.templates().len());
    for template in coordinator.templates() {
        let stock = match (stock_status(template), template.inventory_count) {
            (StockStatus::Untracked, _) => "untracked".to_string(),
            (StockStatus::OutOfStock, _) => "OUT OF STOCK".to_string(),
            (StockStatus::Low, Some(count)) => format!("{count} on hand (low)"),
            (_, count) => format!("{} on hand", count.unwrap_or_default()),
        };
        println!(
            "  {:<28} {:<10} ${:>8.2} x{} -> ${:>8.2}  {}",
            template.name,
            template.category,
            to_cents(template.wholesale_cost),
            markup.raw(template.category),
            to_cents(retail_unit_price(
                template.wholesale_cost,
                template.category,
                markup
            )?),
            stock
        );
    }

    let low_stock = coordinator.low_stock();
    if !low_stock.is_empty() {
        println!();
        println!("RESTOCK NEEDED");
        for template in low_stock {
            println!("  {}", template.name);
        }
    }

    let summary = coordinator.insights();
    println!();
    println!("ORDERS");
    println!("  Orders:              {}", summary.order_count);
    println!("  Revenue:             ${:.2}", to_cents(summary.total_revenue));
    println!("  Costs:               ${:.2}", to_cents(summary.total_costs));
    println!("  Profit:              ${:.2}", to_cents(summary.total_profit));
    println!("  Average margin:      {:.1}%", round_percent(summary.average_margin_percent));
    println!("  Average order value: ${:.2}", to_cents(summary.average_order_value));
    println!("  Last 30 days:        {}", summary.recent_order_count);
    if !summary.low_margin_orders.is_empty() {
        println!("  Low-margin orders:   {}", summary.low_margin_orders.join(", "));
    }
    for order in coordinator.orders().iter().take(5) {
        println!(
            "  {} {:<28} {:>3} items  ${:>8.2}  profit ${:.2}",
            order.created_at.format("%Y-%m-%d"),
            order.name,
            order.item_count(),
            to_cents(order.total_retail),
            to_cents(order.profit)
        );
    }

    println!();
    println!("RECIPES");
    for recipe in coordinator.recipes() {
        let analysis = coordinator
            .analyze_recipe(&recipe.id)
            .with_context(|| format!("Failed to analyze recipe '{}'", recipe.name))?;
        println!(
            "  {:<28} cost ${:.2}  retail ${:.2}  reference ${:.2}  delta ${:.2}",
            recipe.name,
            to_cents(analysis.total_wholesale),
            to_cents(analysis.total_retail),
            to_cents(recipe.reference_price),
            to_cents(analysis.profit_delta)
        );
        if !analysis.complete {
            println!(
                "    partial: no catalog entry for {}",
                analysis.missing_ingredients.join(", ")
            );
        }
    }

    Ok(())
}
