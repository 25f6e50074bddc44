//! # Seed Data Generator
//!
//! Populates a database with a small farm-stall catalogue for development.
//!
//! ## Usage
//! ```bash
//! # Seed ./harvest_dev.db
//! cargo run -p harvest-db --bin seed
//!
//! # Specify database path
//! cargo run -p harvest-db --bin seed -- --db ./data/harvest.db
//! ```
//!
//! ## Generated Data
//! - One default business profile (15% VAT, `INV` numbering)
//! - Products across honey, preserves and bakery, each with two batches
//!   whose expiry dates are staggered so FIFO depletion is visible
//! - A weekly Saturday market for the next eight weeks
//! - A handful of paid orders linked to the market

use chrono::{Datelike, Duration, Utc, Weekday};
use std::env;

use harvest_core::recurrence::{EventType, RecurrencePattern};
use harvest_core::{
    NewBatch, NewBusinessSettings, NewMarketEvent, NewOrder, NewOrderItem, NewProduct,
    PaymentMethod,
};
use harvest_db::{Database, DbConfig, PaymentRequest};

/// (sku, name, category, price cents, cost cents)
const PRODUCTS: &[(&str, &str, &str, i64, i64)] = &[
    ("HONEY-250", "Raw Fynbos Honey 250g", "Honey", 5500, 2600),
    ("HONEY-500", "Raw Fynbos Honey 500g", "Honey", 8500, 4100),
    ("HONEY-COMB", "Honeycomb Slab", "Honey", 12000, 6000),
    ("JAM-FIG", "Green Fig Preserve", "Preserves", 6500, 2800),
    ("JAM-APRI", "Apricot Jam", "Preserves", 5500, 2200),
    ("CHUT-PEACH", "Peach Chutney", "Preserves", 6000, 2500),
    ("BREAD-SOUR", "Sourdough Loaf", "Bakery", 4500, 1800),
    ("RUSK-BUTTER", "Buttermilk Rusks 500g", "Bakery", 7000, 3000),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./harvest_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Harvest POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./harvest_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Harvest POS Seed Data Generator");
    println!("===============================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.products().list(true).await?;
    if !existing.is_empty() {
        println!("⚠ Database already has {} products", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    db.settings()
        .create(&NewBusinessSettings {
            profile_name: "Main".into(),
            business_name: "Fynbos Farm Stall".into(),
            email: Some("hello@fynbos.example".into()),
            phone: Some("021 555 0199".into()),
            address: Some("12 Church Street, Stellenbosch".into()),
            vat_number: Some("4123456789".into()),
            vat_rate_bps: None,
            currency: None,
            invoice_prefix: Some("FFS".into()),
            auto_send_invoice: false,
            is_default: true,
        })
        .await?;
    println!("✓ Business profile");

    let today = Utc::now().date_naive();
    let mut product_ids = Vec::new();
    for (index, (sku, name, category, price, cost)) in PRODUCTS.iter().enumerate() {
        let product = db
            .products()
            .create(&NewProduct {
                sku: sku.to_string(),
                name: name.to_string(),
                description: None,
                category: Some(category.to_string()),
                unit_price_cents: *price,
                cost_price_cents: *cost,
                low_stock_threshold: 5,
            })
            .await?;

        // An older batch close to expiry and a fresh one.
        let offset = index as i64;
        for (quantity, expires_in) in [(4 + offset, 10 + offset), (20, 120 + offset)] {
            db.batches()
                .create(&NewBatch {
                    product_id: product.product.id.clone(),
                    batch_number: None,
                    quantity,
                    production_date: Some(today - Duration::days(30)),
                    expiry_date: Some(today + Duration::days(expires_in)),
                    cost_price_cents: None,
                    notes: None,
                })
                .await?;
        }
        product_ids.push(product.product.id);
    }
    println!("✓ {} products with batches", product_ids.len());

    let weekday = today.weekday().num_days_from_monday();
    let days_to_saturday = (Weekday::Sat.num_days_from_monday() + 7 - weekday) % 7;
    let first_saturday = today + Duration::days(i64::from(days_to_saturday));
    let market = db
        .events()
        .create(&NewMarketEvent {
            name: "Saturday Farmers Market".into(),
            location: Some("Oude Libertas".into()),
            event_type: EventType::Recurring,
            start_date: first_saturday,
            end_date: None,
            start_time: None,
            end_time: None,
            recurrence_pattern: Some(RecurrencePattern::Weekly),
            recurrence_end_date: Some(first_saturday + Duration::weeks(7)),
            stall_fee_cents: 35000,
            notes: None,
        })
        .await?;
    println!("✓ Market event with {} days", market.days.len());

    let methods = [PaymentMethod::Cash, PaymentMethod::Card, PaymentMethod::Eft];
    for (n, method) in methods.into_iter().enumerate() {
        let order = db
            .orders()
            .create_order(
                &NewOrder {
                    items: vec![
                        NewOrderItem {
                            product_id: product_ids[n].clone(),
                            quantity: 2,
                            unit_price_cents: None,
                        },
                        NewOrderItem {
                            product_id: product_ids[n + 3].clone(),
                            quantity: 1,
                            unit_price_cents: None,
                        },
                    ],
                    market_event_id: Some(market.event.id.clone()),
                    ..Default::default()
                },
                None,
            )
            .await?;
        db.orders().pay_order(&order.order.id, &PaymentRequest::new(method)).await?;
    }
    println!("✓ {} paid orders", methods.len());

    println!();
    println!("✓ Seed complete!");
    Ok(())
}
