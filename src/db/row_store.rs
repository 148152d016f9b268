//! Row Store collaborator: cell-addressable rows, one per signal or report

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

pub type RowId = i64;

/// A single cell value. Timestamps are stored as RFC 3339 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn timestamp(at: DateTime<Utc>) -> Self {
        Self::Text(at.to_rfc3339())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Self::Number(_) => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Self::Number(n) => n.is_nan(),
            Self::Text(s) => s.trim().is_empty(),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u64> for CellValue {
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row {0} does not exist")]
    RowMissing(RowId),
    #[error("row store unavailable: {0}")]
    Unavailable(String),
    #[error("row store error: {0}")]
    Backend(String),
}

/// Durable rows with named cells.
///
/// No multi-cell transaction is offered: every write touches exactly one cell.
/// A row counts as existing while its identifying cell is non-empty.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn read_cell(&self, row: RowId, column: &str) -> Result<Option<CellValue>, StoreError>;

    async fn write_cell(&self, row: RowId, column: &str, value: CellValue) -> Result<(), StoreError>;

    async fn append_row(&self, fields: Vec<(String, CellValue)>) -> Result<RowId, StoreError>;

    async fn row_exists(&self, row: RowId) -> Result<bool, StoreError>;
}

type Row = HashMap<String, CellValue>;

/// Process-local sheet. Row ids start at 1 and are never reused.
pub struct MemoryRowStore {
    key_column: String,
    rows: RwLock<Vec<Option<Row>>>,
    /// Successful writes per cell; entries go away with their row
    write_counts: RwLock<HashMap<(RowId, String), usize>>,
}

impl MemoryRowStore {
    pub fn new(key_column: impl Into<String>) -> Self {
        Self {
            key_column: key_column.into(),
            rows: RwLock::new(Vec::new()),
            write_counts: RwLock::new(HashMap::new()),
        }
    }

    /// Remove a row the way an operator clearing a sheet line would
    pub fn delete_row(&self, row: RowId) -> bool {
        let removed = {
            let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
            match index(row).and_then(|i| rows.get_mut(i)) {
                Some(slot @ Some(_)) => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        };
        if removed {
            let mut counts = self.write_counts.write().unwrap_or_else(|e| e.into_inner());
            counts.retain(|(r, _), _| *r != row);
        }
        removed
    }

    /// Copy of a row's cells, if it is still present
    pub fn row(&self, row: RowId) -> Option<HashMap<String, CellValue>> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        index(row).and_then(|i| rows.get(i)).and_then(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        rows.iter().filter(|r| r.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `write_cell` calls that hit `(row, column)`
    pub fn write_count(&self, row: RowId, column: &str) -> usize {
        let counts = self.write_counts.read().unwrap_or_else(|e| e.into_inner());
        counts
            .get(&(row, column.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

fn index(row: RowId) -> Option<usize> {
    usize::try_from(row).ok().and_then(|r| r.checked_sub(1))
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn read_cell(&self, row: RowId, column: &str) -> Result<Option<CellValue>, StoreError> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(index(row)
            .and_then(|i| rows.get(i))
            .and_then(|r| r.as_ref())
            .and_then(|cells| cells.get(column).cloned()))
    }

    async fn write_cell(&self, row: RowId, column: &str, value: CellValue) -> Result<(), StoreError> {
        {
            let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
            let cells = index(row)
                .and_then(|i| rows.get_mut(i))
                .and_then(|r| r.as_mut())
                .ok_or(StoreError::RowMissing(row))?;
            cells.insert(column.to_string(), value);
        }
        let mut counts = self.write_counts.write().unwrap_or_else(|e| e.into_inner());
        *counts.entry((row, column.to_string())).or_insert(0) += 1;
        Ok(())
    }

    async fn append_row(&self, fields: Vec<(String, CellValue)>) -> Result<RowId, StoreError> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        rows.push(Some(fields.into_iter().collect()));
        Ok(rows.len() as RowId)
    }

    async fn row_exists(&self, row: RowId) -> Result<bool, StoreError> {
        let cell = self.read_cell(row, &self.key_column).await?;
        Ok(cell.map(|c| !c.is_blank()).unwrap_or(false))
    }
}
