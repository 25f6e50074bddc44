//! # Import Module
//!
//! Turns a vendor POS sales export (CSV) into synthetic orders.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  CSV text                                                               │
//! │     │  parse_sales_csv      header aliases, per-row errors collected    │
//! │     ▼                                                                   │
//! │  ParsedImport { rows, errors }                                          │
//! │     │  group_into_orders    receipt number, else date + time            │
//! │     ▼                                                                   │
//! │  Vec<ImportOrder>                                                       │
//! │     │  build_preview        mapping → SKU → name, stock impact,         │
//! │     ▼                       duplicate receipts                          │
//! │  ImportPreview  ──────────► shown to the user, then committed by        │
//! │                             harvest-db in one transaction               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Row problems never abort the import: they are returned as [`RowError`]s
//! alongside the rows that did parse. Only an unreadable file or a missing
//! required column is fatal.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use ts_rs::TS;

use crate::money::Money;
use crate::payment::PaymentMethod;
use crate::types::ProductWithStock;
use crate::MAX_ITEM_QUANTITY;

// =============================================================================
// Errors
// =============================================================================

/// Fatal import errors.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("CSV file is empty")]
    Empty,

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Could not read CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// A row that could not be used, with its 1-based line number in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

// =============================================================================
// Header Detection
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Column {
    Date,
    Time,
    Receipt,
    Sku,
    Name,
    Quantity,
    UnitPrice,
    LineTotal,
    Payment,
}

const ALIASES: &[(Column, &[&str])] = &[
    (Column::Date, &["date", "sale date", "created at"]),
    (Column::Time, &["time"]),
    (
        Column::Receipt,
        &["receipt", "receipt number", "receipt no", "bill number", "order"],
    ),
    (Column::Sku, &["sku", "product code", "item code"]),
    (
        Column::Name,
        &["item", "item name", "product", "product name", "description"],
    ),
    (Column::Quantity, &["qty", "quantity"]),
    (Column::UnitPrice, &["price", "unit price", "item price"]),
    (Column::LineTotal, &["total", "line total", "gross", "amount"]),
    (
        Column::Payment,
        &["payment", "payment type", "payment method", "tender"],
    ),
];

fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .trim()
        .to_ascii_lowercase()
        .replace(['_', '.'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps each known column to its index in the header row.
fn detect_columns(headers: &csv::StringRecord) -> Result<HashMap<Column, usize>, ImportError> {
    let mut columns = HashMap::new();
    for (index, header) in headers.iter().enumerate() {
        let header = normalize_header(header);
        if let Some((column, _)) = ALIASES
            .iter()
            .find(|(_, aliases)| aliases.contains(&header.as_str()))
        {
            columns.entry(*column).or_insert(index);
        }
    }

    if !columns.contains_key(&Column::Date) {
        return Err(ImportError::MissingColumn("date".to_string()));
    }
    if !columns.contains_key(&Column::Sku) && !columns.contains_key(&Column::Name) {
        return Err(ImportError::MissingColumn("item or sku".to_string()));
    }
    if !columns.contains_key(&Column::Quantity) {
        return Err(ImportError::MissingColumn("quantity".to_string()));
    }
    if !columns.contains_key(&Column::UnitPrice) && !columns.contains_key(&Column::LineTotal) {
        return Err(ImportError::MissingColumn("price or total".to_string()));
    }

    Ok(columns)
}

/// Semicolon-separated exports are common with comma decimal locales.
fn detect_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.matches(';').count() > first_line.matches(',').count() {
        b';'
    } else {
        b','
    }
}

// =============================================================================
// Row Parsing
// =============================================================================

/// One usable line of the export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ImportRow {
    pub line: usize,
    pub receipt: Option<String>,
    #[ts(as = "String")]
    pub date: NaiveDate,
    #[ts(as = "Option<String>")]
    pub time: Option<NaiveTime>,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
    pub payment_method: PaymentMethod,
}

impl ImportRow {
    /// The value users map from: SKU when present, otherwise the item name.
    pub fn external_key(&self) -> String {
        self.sku
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_default()
    }

    pub fn occurred_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time.unwrap_or(NaiveTime::MIN))
    }
}

/// Result of reading a CSV export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ParsedImport {
    pub rows: Vec<ImportRow>,
    pub errors: Vec<RowError>,
}

/// Parses a vendor sales export.
///
/// ## Example
/// ```rust
/// use harvest_core::import::parse_sales_csv;
///
/// let csv = "Date,Receipt No,Item,Qty,Price\n2024-03-02,R1,Raw Honey 500g,2,85.00\n";
/// let parsed = parse_sales_csv(csv).unwrap();
/// assert_eq!(parsed.rows.len(), 1);
/// assert_eq!(parsed.rows[0].line_total_cents, 17000);
/// ```
pub fn parse_sales_csv(text: &str) -> Result<ParsedImport, ImportError> {
    if text.trim().is_empty() {
        return Err(ImportError::Empty);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(text))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let columns = detect_columns(reader.headers()?)?;
    let mut parsed = ParsedImport::default();

    for (index, record) in reader.records().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                parsed.errors.push(RowError {
                    line,
                    message: format!("unreadable row: {e}"),
                });
                continue;
            }
        };

        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        match parse_row(line, &record, &columns) {
            Ok(row) => parsed.rows.push(row),
            Err(message) => parsed.errors.push(RowError { line, message }),
        }
    }

    Ok(parsed)
}

fn parse_row(
    line: usize,
    record: &csv::StringRecord,
    columns: &HashMap<Column, usize>,
) -> Result<ImportRow, String> {
    let cell = |column: Column| -> Option<String> {
        columns
            .get(&column)
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let (date, inline_time) = match cell(Column::Date) {
        Some(raw) => parse_date_time(&raw).ok_or_else(|| format!("invalid date '{raw}'"))?,
        None => return Err("date is empty".to_string()),
    };
    let time = match cell(Column::Time) {
        Some(raw) => Some(parse_time(&raw).ok_or_else(|| format!("invalid time '{raw}'"))?),
        None => inline_time,
    };

    let sku = cell(Column::Sku);
    let name = cell(Column::Name);
    if sku.is_none() && name.is_none() {
        return Err("item is empty".to_string());
    }

    let quantity = match cell(Column::Quantity) {
        Some(raw) => parse_quantity(&raw).ok_or_else(|| format!("invalid quantity '{raw}'"))?,
        None => return Err("quantity is empty".to_string()),
    };
    if quantity <= 0 {
        return Err(format!("quantity must be positive, got {quantity}"));
    }
    if quantity > MAX_ITEM_QUANTITY {
        return Err(format!("quantity {quantity} exceeds the maximum of {MAX_ITEM_QUANTITY}"));
    }

    let unit_price = match cell(Column::UnitPrice) {
        Some(raw) => {
            Some(Money::parse_decimal(&raw).ok_or_else(|| format!("invalid price '{raw}'"))?)
        }
        None => None,
    };
    let line_total = match cell(Column::LineTotal) {
        Some(raw) => {
            Some(Money::parse_decimal(&raw).ok_or_else(|| format!("invalid total '{raw}'"))?)
        }
        None => None,
    };

    let (unit_price, line_total) = match (unit_price, line_total) {
        (Some(price), Some(total)) => (price, total),
        (Some(price), None) => {
            let total = price
                .checked_multiply_quantity(quantity)
                .ok_or_else(|| format!("line total for {quantity} x {price} is out of range"))?;
            (price, total)
        }
        (None, Some(total)) => {
            let per_unit = total
                .cents()
                .checked_add(quantity / 2)
                .ok_or_else(|| format!("total {total} is out of range"))?
                / quantity;
            (Money::from_cents(per_unit), total)
        }
        (None, None) => return Err("price and total are both empty".to_string()),
    };
    if unit_price.is_negative() || line_total.is_negative() {
        return Err("amounts must not be negative".to_string());
    }

    let payment_method = cell(Column::Payment)
        .map(|label| PaymentMethod::from_import_label(&label))
        .unwrap_or(PaymentMethod::Card);

    Ok(ImportRow {
        line,
        receipt: cell(Column::Receipt),
        date,
        time,
        sku,
        name,
        quantity,
        unit_price_cents: unit_price.cents(),
        line_total_cents: line_total.cents(),
        payment_method,
    })
}

/// Whole-number quantities; "2.0" and "2,00" are tolerated.
fn parse_quantity(raw: &str) -> Option<i64> {
    if let Ok(qty) = raw.parse::<i64>() {
        return Some(qty);
    }
    let as_money = Money::parse_decimal(raw)?;
    if as_money.cents() % 100 == 0 {
        Some(as_money.cents() / 100)
    } else {
        None
    }
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

fn parse_time(raw: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw.trim(), fmt).ok())
}

/// Parses `date` or `date time` (space or `T` separated).
fn parse_date_time(raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let raw = raw.trim();
    let (date_part, time_part) = match raw.split_once([' ', 'T']) {
        Some((d, t)) => (d, Some(t)),
        None => (raw, None),
    };

    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())?;

    let time = match time_part.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => {
            // Strip a trailing zone or fractional seconds: "10:15:00Z", "10:15:00.000"
            let t = t.trim_end_matches('Z');
            let t = t.split('.').next().unwrap_or(t);
            Some(parse_time(t)?)
        }
        None => None,
    };

    Some((date, time))
}

// =============================================================================
// Grouping
// =============================================================================

/// A set of rows that becomes one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ImportOrder {
    /// Receipt number, or `IMPORT-<date>T<time>` for exports without one.
    pub external_reference: String,
    #[ts(as = "String")]
    pub occurred_at: NaiveDateTime,
    pub payment_method: PaymentMethod,
    pub rows: Vec<ImportRow>,
}

impl ImportOrder {
    pub fn total(&self) -> Money {
        self.rows
            .iter()
            .map(|r| Money::from_cents(r.line_total_cents))
            .sum()
    }
}

/// Groups rows into orders, sorted by time.
///
/// Rows sharing a receipt number form one order; rows without a receipt are
/// grouped by their date and time.
pub fn group_into_orders(rows: Vec<ImportRow>) -> Vec<ImportOrder> {
    let mut groups: BTreeMap<String, Vec<ImportRow>> = BTreeMap::new();
    for row in rows {
        let key = match &row.receipt {
            Some(receipt) => receipt.clone(),
            None => format!("IMPORT-{}", row.occurred_at().format("%Y-%m-%dT%H:%M:%S")),
        };
        groups.entry(key).or_default().push(row);
    }

    let mut orders: Vec<ImportOrder> = groups
        .into_iter()
        .filter_map(|(external_reference, rows)| {
            let first = rows.first()?;
            let occurred_at = rows.iter().map(ImportRow::occurred_at).min()?;
            Some(ImportOrder {
                external_reference,
                occurred_at,
                payment_method: first.payment_method,
                rows,
            })
        })
        .collect();

    orders.sort_by(|a, b| {
        a.occurred_at
            .cmp(&b.occurred_at)
            .then_with(|| a.external_reference.cmp(&b.external_reference))
    });
    orders
}

// =============================================================================
// Product Matching
// =============================================================================

/// How an import line was linked to a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Mapping,
    Sku,
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductMatch {
    pub product_id: String,
    pub matched_by: MatchSource,
}

/// Looks up products for import rows.
///
/// Priority: explicit mapping → exact SKU → exact name (all case-insensitive).
pub struct ProductMatcher<'a> {
    products: &'a [ProductWithStock],
    by_sku: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    mappings: HashMap<String, String>,
}

fn match_key(s: &str) -> String {
    s.trim().to_lowercase()
}

impl<'a> ProductMatcher<'a> {
    pub fn new(products: &'a [ProductWithStock], mappings: &HashMap<String, String>) -> Self {
        let mut by_sku = HashMap::new();
        let mut by_name = HashMap::new();
        for (i, p) in products.iter().enumerate() {
            by_sku.entry(match_key(&p.product.sku)).or_insert(i);
            by_name.entry(match_key(&p.product.name)).or_insert(i);
        }
        let mappings = mappings
            .iter()
            .map(|(k, v)| (match_key(k), v.trim().to_string()))
            .collect();

        ProductMatcher {
            products,
            by_sku,
            by_name,
            mappings,
        }
    }

    pub fn find(&self, row: &ImportRow) -> Option<ProductMatch> {
        let keys: Vec<String> = [row.sku.as_deref(), row.name.as_deref()]
            .into_iter()
            .flatten()
            .map(match_key)
            .collect();

        for key in &keys {
            if let Some(product_id) = self.mappings.get(key) {
                if self.products.iter().any(|p| &p.product.id == product_id) {
                    return Some(ProductMatch {
                        product_id: product_id.clone(),
                        matched_by: MatchSource::Mapping,
                    });
                }
            }
        }

        if let Some(&i) = row.sku.as_deref().and_then(|s| self.by_sku.get(&match_key(s))) {
            return Some(ProductMatch {
                product_id: self.products[i].product.id.clone(),
                matched_by: MatchSource::Sku,
            });
        }

        if let Some(&i) = row.name.as_deref().and_then(|n| self.by_name.get(&match_key(n))) {
            return Some(ProductMatch {
                product_id: self.products[i].product.id.clone(),
                matched_by: MatchSource::Name,
            });
        }

        None
    }
}

// =============================================================================
// Preview
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PreviewLine {
    pub line: usize,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
    pub product_id: Option<String>,
    pub matched_by: Option<MatchSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PreviewOrder {
    pub external_reference: String,
    #[ts(as = "String")]
    pub occurred_at: NaiveDateTime,
    pub payment_method: PaymentMethod,
    pub total_cents: i64,
    /// A previous import already created an order for this receipt.
    pub duplicate: bool,
    pub lines: Vec<PreviewLine>,
}

/// What committing the import would do to one product's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockImpact {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub requested: i64,
    pub available: i64,
    pub shortfall: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ImportPreview {
    pub orders: Vec<PreviewOrder>,
    /// External keys (SKU or name) with no product match, sorted.
    pub unmatched: Vec<String>,
    pub stock_impact: Vec<StockImpact>,
    pub errors: Vec<RowError>,
    pub total_rows: usize,
    pub matched_rows: usize,
    pub duplicate_orders: usize,
    pub total_cents: i64,
}

/// Builds the preview shown before committing.
///
/// `existing_references` holds the external references of orders already in
/// the database; those orders are flagged and left out of the stock impact.
pub fn build_preview(
    parsed: ParsedImport,
    products: &[ProductWithStock],
    mappings: &HashMap<String, String>,
    existing_references: &HashSet<String>,
) -> ImportPreview {
    let matcher = ProductMatcher::new(products, mappings);
    let total_rows = parsed.rows.len();
    let orders = group_into_orders(parsed.rows);

    let mut unmatched: Vec<String> = Vec::new();
    let mut requested: BTreeMap<String, i64> = BTreeMap::new();
    let mut matched_rows = 0;
    let mut duplicate_orders = 0;
    let mut total = Money::zero();

    let preview_orders: Vec<PreviewOrder> = orders
        .into_iter()
        .map(|order| {
            let duplicate = existing_references.contains(&order.external_reference);
            if duplicate {
                duplicate_orders += 1;
            } else {
                total += order.total();
            }

            let lines = order
                .rows
                .iter()
                .map(|row| {
                    let found = matcher.find(row);
                    match &found {
                        Some(m) => {
                            matched_rows += 1;
                            if !duplicate {
                                *requested.entry(m.product_id.clone()).or_default() += row.quantity;
                            }
                        }
                        None => {
                            let key = row.external_key();
                            if !unmatched.contains(&key) {
                                unmatched.push(key);
                            }
                        }
                    }
                    PreviewLine {
                        line: row.line,
                        sku: row.sku.clone(),
                        name: row.name.clone(),
                        quantity: row.quantity,
                        unit_price_cents: row.unit_price_cents,
                        line_total_cents: row.line_total_cents,
                        product_id: found.as_ref().map(|m| m.product_id.clone()),
                        matched_by: found.map(|m| m.matched_by),
                    }
                })
                .collect();

            PreviewOrder {
                total_cents: order.total().cents(),
                external_reference: order.external_reference,
                occurred_at: order.occurred_at,
                payment_method: order.payment_method,
                duplicate,
                lines,
            }
        })
        .collect();

    let stock_impact = requested
        .into_iter()
        .filter_map(|(product_id, requested)| {
            let product = products.iter().find(|p| p.product.id == product_id)?;
            let available = product.total_stock;
            Some(StockImpact {
                product_id,
                sku: product.product.sku.clone(),
                name: product.product.name.clone(),
                requested,
                available,
                shortfall: (requested - available).max(0),
            })
        })
        .collect();

    unmatched.sort();

    ImportPreview {
        orders: preview_orders,
        unmatched,
        stock_impact,
        errors: parsed.errors,
        total_rows,
        matched_rows,
        duplicate_orders,
        total_cents: total.cents(),
    }
}

/// Summary returned after committing an import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ImportResult {
    pub orders_created: usize,
    pub order_ids: Vec<String>,
    pub duplicates_skipped: usize,
    pub lines_skipped_unmatched: usize,
    /// Units sold that no batch could cover, per product.
    pub stock_shortfalls: Vec<StockImpact>,
    pub errors: Vec<RowError>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Product;
    use chrono::Utc;

    fn product(id: &str, sku: &str, name: &str, stock: i64) -> ProductWithStock {
        ProductWithStock {
            product: Product {
                id: id.to_string(),
                sku: sku.to_string(),
                name: name.to_string(),
                description: None,
                category: None,
                unit_price_cents: 8500,
                cost_price_cents: 4000,
                low_stock_threshold: 5,
                is_active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            total_stock: stock,
            is_low_stock: false,
        }
    }

    const EXPORT: &str = "\
Date,Time,Receipt No,SKU,Item Name,Qty,Unit Price,Total,Payment Type
2024-03-02,09:15,R-100,HONEY-500,Raw Honey 500g,2,85.00,170.00,Cash
2024-03-02,09:15,R-100,,Fig Jam,1,\"45,00\",45.00,Cash
2024-03-02,10:30,R-101,HONEY-500,Raw Honey 500g,1,85.00,85.00,Credit Card
2024-03-02,11:00,R-102,,Mystery Item,1,10.00,10.00,EFT
2024-03-02,11:05,R-103,HONEY-500,Raw Honey 500g,zero,85.00,,Cash
";

    #[test]
    fn test_parse_with_aliases_and_row_errors() {
        let parsed = parse_sales_csv(EXPORT).unwrap();
        assert_eq!(parsed.rows.len(), 4);
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].line, 6);
        assert!(parsed.errors[0].message.contains("quantity"));

        let jam = &parsed.rows[1];
        assert_eq!(jam.sku, None);
        assert_eq!(jam.name.as_deref(), Some("Fig Jam"));
        assert_eq!(jam.unit_price_cents, 4500);
        assert_eq!(parsed.rows[2].payment_method, PaymentMethod::Card);
        assert_eq!(parsed.rows[3].payment_method, PaymentMethod::Eft);
    }

    #[test]
    fn test_oversized_quantities_are_row_errors() {
        let csv = "Date,Item,Qty,Price\n\
                   2024-03-02,Honey,9223372036854775807,2.00\n\
                   2024-03-02,Honey,10000,2.00\n\
                   2024-03-02,Honey,11,9223372036854775.00\n\
                   2024-03-02,Honey,9999,2.00\n";
        let parsed = parse_sales_csv(csv).unwrap();

        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].line_total_cents, 9999 * 200);
        let lines: Vec<usize> = parsed.errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
        assert!(parsed.errors[0].message.contains("maximum"));
        assert!(parsed.errors[2].message.contains("out of range"));
    }

    #[test]
    fn test_missing_required_columns() {
        assert!(matches!(
            parse_sales_csv("Item,Qty,Price\nHoney,1,10\n"),
            Err(ImportError::MissingColumn(c)) if c == "date"
        ));
        assert!(matches!(
            parse_sales_csv("Date,Item,Price\n2024-03-02,Honey,10\n"),
            Err(ImportError::MissingColumn(c)) if c == "quantity"
        ));
        assert!(matches!(
            parse_sales_csv("Date,Item,Qty\n2024-03-02,Honey,1\n"),
            Err(ImportError::MissingColumn(_))
        ));
        assert!(matches!(parse_sales_csv("  \n"), Err(ImportError::Empty)));
    }

    #[test]
    fn test_date_formats_and_inline_time() {
        let csv = "Sale Date;Product;Quantity;Amount\n\
                   02/03/2024 14:05;Fig Jam;2;90,00\n\
                   2024/03/03;Fig Jam;1;45\n";
        let parsed = parse_sales_csv(csv).unwrap();
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        assert_eq!(parsed.rows[0].date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(parsed.rows[0].time, NaiveTime::from_hms_opt(14, 5, 0));
        assert_eq!(parsed.rows[0].unit_price_cents, 4500);
        assert_eq!(parsed.rows[1].time, None);
    }

    #[test]
    fn test_grouping_by_receipt_then_timestamp() {
        let csv = "Date,Time,Item,Qty,Price\n\
                   2024-03-02,10:00,Fig Jam,1,45\n\
                   2024-03-02,09:00,Honey,1,85\n\
                   2024-03-02,10:00,Honey,2,85\n";
        let orders = group_into_orders(parse_sales_csv(csv).unwrap().rows);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].rows.len(), 1);
        assert_eq!(orders[1].rows.len(), 2);
        assert_eq!(orders[1].external_reference, "IMPORT-2024-03-02T10:00:00");
        assert_eq!(orders[1].total().cents(), 4500 + 17000);
    }

    #[test]
    fn test_matching_priority() {
        let products = vec![
            product("p-honey", "HONEY-500", "Raw Honey 500g", 10),
            product("p-jam", "JAM-FIG", "Fig Jam", 10),
            product("p-wax", "WAX-1", "Mystery Item", 10),
        ];
        let mut mappings = HashMap::new();
        mappings.insert("mystery item".to_string(), "p-jam".to_string());
        let matcher = ProductMatcher::new(&products, &mappings);

        let parsed = parse_sales_csv(EXPORT).unwrap();
        let by_sku = matcher.find(&parsed.rows[0]).unwrap();
        assert_eq!(by_sku.matched_by, MatchSource::Sku);
        let by_name = matcher.find(&parsed.rows[1]).unwrap();
        assert_eq!((by_name.product_id.as_str(), by_name.matched_by), ("p-jam", MatchSource::Name));
        let mapped = matcher.find(&parsed.rows[3]).unwrap();
        assert_eq!(mapped.product_id, "p-jam");
        assert_eq!(mapped.matched_by, MatchSource::Mapping);
    }

    #[test]
    fn test_preview_stock_impact_and_duplicates() {
        let products = vec![
            product("p-honey", "HONEY-500", "Raw Honey 500g", 2),
            product("p-jam", "JAM-FIG", "Fig Jam", 10),
        ];
        let existing: HashSet<String> = ["R-101".to_string()].into_iter().collect();
        let parsed = parse_sales_csv(EXPORT).unwrap();
        let preview = build_preview(parsed, &products, &HashMap::new(), &existing);

        assert_eq!(preview.orders.len(), 3);
        assert_eq!(preview.duplicate_orders, 1);
        assert!(preview.orders.iter().any(|o| o.external_reference == "R-101" && o.duplicate));
        assert_eq!(preview.unmatched, vec!["Mystery Item".to_string()]);
        assert_eq!(preview.matched_rows, 3);
        assert_eq!(preview.errors.len(), 1);

        // R-101 is a duplicate, so only the two honey units of R-100 count.
        let honey = preview.stock_impact.iter().find(|s| s.product_id == "p-honey").unwrap();
        assert_eq!((honey.requested, honey.available, honey.shortfall), (2, 2, 0));
        assert_eq!(preview.total_cents, 17000 + 4500 + 1000);
    }
}
