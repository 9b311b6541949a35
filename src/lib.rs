mod api;
pub mod args;
pub mod commands;
mod config;
mod db;
mod error;
mod interpret;
mod mcp;
mod mirror;
mod model;
mod reconcile;
mod utils;


pub use api::Mode;
pub use config::Config;
pub use error::{Error, ErrorType, Result};
pub use model::{
    Amount, Category, Locale, MirrorRef, Month, MonthlySummary, StoreStats, Transaction,
    YearlySummary,
};
pub use reconcile::{
    BulkSyncReport, CleanReport, IntegrityReport, SheetIntegrity, SyncMode, SyncReport, SyncState,
};
