//! Postgres-backed Row Store
//!
//! Every sheet shares one table; a row's cells live in a JSONB object so that
//! single-cell reads and writes map onto `->` and `jsonb_set`.

use crate::db::row_store::{CellValue, RowId, RowStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_postgres::{Client, NoTls};

/// Shared connection; one per process
pub struct PostgresDatabase {
    client: Arc<Client>,
}

impl PostgresDatabase {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to Postgres: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection error");
            }
        });

        let db = Self {
            client: Arc::new(client),
        };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS sheet_rows (
                    row_id BIGSERIAL PRIMARY KEY,
                    sheet TEXT NOT NULL,
                    cells JSONB NOT NULL DEFAULT '{}'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE INDEX IF NOT EXISTS sheet_rows_sheet_idx ON sheet_rows (sheet);",
            )
            .await
            .map_err(|e| backend("Failed to create sheet_rows table", e))
    }

    /// A Row Store view over one sheet, keyed by `key_column`
    pub fn sheet(&self, sheet: &str, key_column: &str) -> PostgresRowStore {
        PostgresRowStore {
            client: self.client.clone(),
            sheet: sheet.to_string(),
            key_column: key_column.to_string(),
        }
    }
}

pub struct PostgresRowStore {
    client: Arc<Client>,
    sheet: String,
    key_column: String,
}

fn backend(context: &str, e: tokio_postgres::Error) -> StoreError {
    if e.is_closed() {
        StoreError::Unavailable(format!("{}: {}", context, e))
    } else {
        StoreError::Backend(format!("{}: {}", context, e))
    }
}

#[async_trait]
impl RowStore for PostgresRowStore {
    async fn read_cell(&self, row: RowId, column: &str) -> Result<Option<CellValue>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT cells -> $3::text FROM sheet_rows WHERE sheet = $1 AND row_id = $2",
                &[&self.sheet, &row, &column],
            )
            .await
            .map_err(|e| backend("Failed to read cell", e))?;

        let value: Option<serde_json::Value> = match rows.first() {
            Some(r) => r.get(0),
            None => return Ok(None),
        };
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("Malformed cell {}: {}", column, e))),
        }
    }

    async fn write_cell(&self, row: RowId, column: &str, value: CellValue) -> Result<(), StoreError> {
        let json = serde_json::to_value(&value)
            .map_err(|e| StoreError::Backend(format!("Failed to encode cell: {}", e)))?;
        let updated = self
            .client
            .execute(
                "UPDATE sheet_rows SET cells = jsonb_set(cells, ARRAY[$3::text], $4::jsonb, true)
                 WHERE sheet = $1 AND row_id = $2",
                &[&self.sheet, &row, &column, &json],
            )
            .await
            .map_err(|e| backend("Failed to write cell", e))?;

        if updated == 0 {
            return Err(StoreError::RowMissing(row));
        }
        Ok(())
    }

    async fn append_row(&self, fields: Vec<(String, CellValue)>) -> Result<RowId, StoreError> {
        let mut cells = serde_json::Map::new();
        for (column, value) in fields {
            let json = serde_json::to_value(&value)
                .map_err(|e| StoreError::Backend(format!("Failed to encode cell: {}", e)))?;
            cells.insert(column, json);
        }
        let cells = serde_json::Value::Object(cells);

        let row = self
            .client
            .query_one(
                "INSERT INTO sheet_rows (sheet, cells) VALUES ($1, $2) RETURNING row_id",
                &[&self.sheet, &cells],
            )
            .await
            .map_err(|e| backend("Failed to append row", e))?;
        Ok(row.get(0))
    }

    async fn row_exists(&self, row: RowId) -> Result<bool, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT COALESCE(cells ->> $3::text, '') <> '' FROM sheet_rows
                 WHERE sheet = $1 AND row_id = $2",
                &[&self.sheet, &row, &self.key_column],
            )
            .await
            .map_err(|e| backend("Failed to check row", e))?;
        Ok(rows.first().map(|r| r.get::<_, bool>(0)).unwrap_or(false))
    }
}
