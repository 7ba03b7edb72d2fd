//! SQLite persistence for the agent marketplace: pool construction,
//! embedded migrations, repositories, the catalog store, and the
//! accounting read-model.

pub mod accounting;
pub mod catalog;
pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use accounting::{AccountingReport, AccountingView};
pub use catalog::{CatalogStore, CreatedCustomization, NewCustomization};
pub use connection::{connect_with_settings, DbPool};
pub use fixtures::DemoCatalog;
