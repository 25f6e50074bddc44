//! # harvest-db: Database Layer for Harvest POS
//!
//! SQLite storage for the Harvest POS backend, using sqlx for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Harvest POS Data Flow                            │
//! │                                                                         │
//! │  HTTP handler (POST /functions/v1/orders)                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    harvest-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ products      │    │ 001_initial  │  │   │
//! │  │   │ SqlitePool    │◄───│ batches       │    │ _schema.sql  │  │   │
//! │  │   │               │    │ orders  ★     │    │              │  │   │
//! │  │   │               │    │ invoices ...  │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   ★ create / cancel / pay / refund: one transaction each,       │   │
//! │  │     rules from harvest-core, guarded batch updates              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL) ─ harvest.db                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Store handle and repository accessors
//! - [`migrations`] - Embedded schema and its status
//! - [`error`] - Database error types
//! - [`repository`] - Repositories and order workflows
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harvest_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("harvest.db")).await?;
//! let products = db.products().list(false).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::SchemaStatus;
pub use pool::{Database, DbConfig};

pub use repository::batch::BatchRepository;
pub use repository::customer::CustomerRepository;
pub use repository::event::MarketEventRepository;
pub use repository::import::ImportRepository;
pub use repository::invoice::InvoiceRepository;
pub use repository::order::{OrderRepository, PaymentOutcome, PaymentRequest, RefundRequest};
pub use repository::product::ProductRepository;
pub use repository::report::ReportRepository;
pub use repository::role::RoleRepository;
pub use repository::settings::SettingsRepository;
