//! Row Store backends for signal rows and daily reports

pub mod postgres;
pub mod row_store;

pub use postgres::{PostgresDatabase, PostgresRowStore};
pub use row_store::{CellValue, MemoryRowStore, RowId, RowStore, StoreError};

/// Sheet holding one row per accepted signal
pub const SIGNALS_SHEET: &str = "signals";
/// Sheet holding one row per daily report
pub const REPORTS_SHEET: &str = "daily_reports";
