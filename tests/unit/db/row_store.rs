//! Unit tests for the in-memory row store

use chrono::{TimeZone, Utc};
use signalmeter::db::{CellValue, MemoryRowStore, RowStore, StoreError};

fn store_with_row() -> MemoryRowStore {
    MemoryRowStore::new("signal_id")
}

#[tokio::test]
async fn test_append_and_read_cells() {
    let store = store_with_row();
    let row = store
        .append_row(vec![
            ("signal_id".to_string(), CellValue::from("abc")),
            ("entry_price".to_string(), CellValue::from(100.5)),
        ])
        .await
        .unwrap();

    assert_eq!(row, 1);
    assert!(store.row_exists(row).await.unwrap());
    assert_eq!(
        store.read_cell(row, "entry_price").await.unwrap(),
        Some(CellValue::Number(100.5))
    );
    assert_eq!(store.read_cell(row, "missing").await.unwrap(), None);
    assert_eq!(store.read_cell(42, "signal_id").await.unwrap(), None);
}

#[tokio::test]
async fn test_deleted_rows_are_gone_for_good() {
    let store = store_with_row();
    let first = store
        .append_row(vec![("signal_id".to_string(), CellValue::from("a"))])
        .await
        .unwrap();
    let second = store
        .append_row(vec![("signal_id".to_string(), CellValue::from("b"))])
        .await
        .unwrap();

    assert!(store.delete_row(first));
    assert!(!store.delete_row(first));
    assert!(!store.row_exists(first).await.unwrap());
    assert!(store.row_exists(second).await.unwrap());
    assert!(matches!(
        store.write_cell(first, "price_15m", CellValue::from(1.0)).await,
        Err(StoreError::RowMissing(1))
    ));
    assert_eq!(store.len(), 1);

    let third = store
        .append_row(vec![("signal_id".to_string(), CellValue::from("c"))])
        .await
        .unwrap();
    assert_eq!(third, 3);
}

#[tokio::test]
async fn test_blank_key_cell_counts_as_deleted() {
    let store = store_with_row();
    let row = store
        .append_row(vec![("signal_id".to_string(), CellValue::from("a"))])
        .await
        .unwrap();

    store.write_cell(row, "signal_id", CellValue::from("")).await.unwrap();
    assert!(!store.row_exists(row).await.unwrap());
}

#[tokio::test]
async fn test_write_counts_per_cell_until_row_deleted() {
    let store = store_with_row();
    let row = store
        .append_row(vec![("signal_id".to_string(), CellValue::from("a"))])
        .await
        .unwrap();

    store.write_cell(row, "pct_1h", CellValue::from(0.1)).await.unwrap();
    store.write_cell(row, "pct_1h", CellValue::from(0.2)).await.unwrap();
    assert_eq!(store.write_count(row, "pct_1h"), 2);
    assert_eq!(store.write_count(row, "pct_4h"), 0);

    assert!(store.delete_row(row));
    assert_eq!(store.write_count(row, "pct_1h"), 0);
}

#[test]
fn test_cell_value_conversions() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    assert_eq!(CellValue::timestamp(at).as_timestamp(), Some(at));
    assert_eq!(CellValue::from("12.5").as_f64(), Some(12.5));
    assert_eq!(CellValue::from(3u64).as_f64(), Some(3.0));
    assert_eq!(CellValue::from(2.0).as_text(), "2");
    assert!(CellValue::from(" ").is_blank());
    assert!(!CellValue::from(0.0).is_blank());
    assert_eq!(CellValue::Number(1.0).as_timestamp(), None);
}

#[test]
fn test_cell_value_json_is_untagged() {
    let text: CellValue = serde_json::from_str("\"abc\"").unwrap();
    let number: CellValue = serde_json::from_str("1.5").unwrap();
    assert_eq!(text, CellValue::from("abc"));
    assert_eq!(number, CellValue::Number(1.5));
}

#[test]
fn test_unknown_rows_do_not_exist() {
    let store = store_with_row();
    let exists = tokio_test::assert_ok!(tokio_test::block_on(store.row_exists(7)));
    assert!(!exists);
    assert!(tokio_test::block_on(store.row_exists(0)).is_ok_and(|e| !e));
}
