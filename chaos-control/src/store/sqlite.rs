use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use super::{Condition, ConditionalUpdate, Item, RecordStore, StoreError, TableSchema};

/// Rounds of read-merge-write before an update under contention gives up.
const MAX_SWAP_ATTEMPTS: usize = 8;

/// SQLite-backed record store sharing the control plane's pool.
///
/// Every table lives in the single `records` relation created by the
/// migrations:
/// ```sql
/// CREATE TABLE records (
///     table_name TEXT NOT NULL,
///     record_key TEXT NOT NULL,
///     item       TEXT NOT NULL,   -- JSON object
///     PRIMARY KEY (table_name, record_key)
/// );
/// ```
/// Index lookups resolve to `json_extract` over the item.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    tables: HashMap<String, TableSchema>,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool, tables: impl IntoIterator<Item = TableSchema>) -> Self {
        Self {
            pool,
            tables: tables
                .into_iter()
                .map(|schema| (schema.name.clone(), schema))
                .collect(),
        }
    }

    fn schema(&self, table: &str) -> Result<&TableSchema, StoreError> {
        self.tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    /// Read, merge and write back only if the row still holds what was read.
    /// A lost race re-reads, so the condition is always judged against the
    /// item actually being replaced.
    async fn swap_fields(
        &self,
        table: &str,
        key: &str,
        fields: Item,
        condition: Option<&Condition>,
    ) -> Result<ConditionalUpdate, StoreError> {
        let schema = self.schema(table)?;
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT item FROM records WHERE table_name = ? AND record_key = ?")
                    .bind(table)
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;
            let Some((raw,)) = row else {
                return Ok(ConditionalUpdate::Missing);
            };

            let mut item = decode(&raw)?;
            if condition.is_some_and(|c| !c.holds_for(&item)) {
                return Ok(ConditionalUpdate::Rejected(item));
            }
            for (attribute, value) in &fields {
                if *attribute != schema.key_attribute {
                    item.insert(attribute.clone(), value.clone());
                }
            }

            let swapped = sqlx::query(
                "UPDATE records SET item = ?
                 WHERE table_name = ? AND record_key = ? AND item = ?",
            )
            .bind(serde_json::to_string(&item)?)
            .bind(table)
            .bind(key)
            .bind(&raw)
            .execute(&self.pool)
            .await?;
            if swapped.rows_affected() == 1 {
                return Ok(ConditionalUpdate::Updated(item));
            }
            debug!(table, key, "concurrent write, retrying update");
        }
        Err(StoreError::Contended {
            table: table.to_string(),
            key: key.to_string(),
        })
    }
}

fn decode(raw: &str) -> Result<Item, StoreError> {
    match serde_json::from_str(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "stored item is not an object: {other}"
        ))),
    }
}

fn json_path(attribute: &str) -> String {
    format!("$.{attribute}")
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError> {
        let schema = self.schema(table)?;
        let key = item
            .get(&schema.key_attribute)
            .and_then(|v| v.as_str())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StoreError::MissingKey {
                table: table.to_string(),
                attribute: schema.key_attribute.clone(),
            })?
            .to_string();
        let body = serde_json::to_string(&item)?;

        sqlx::query(
            "INSERT INTO records (table_name, record_key, item) VALUES (?, ?, ?)
             ON CONFLICT(table_name, record_key) DO UPDATE SET item = excluded.item",
        )
        .bind(table)
        .bind(&key)
        .bind(&body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_key(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError> {
        self.schema(table)?;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT item FROM records WHERE table_name = ? AND record_key = ?")
                .bind(table)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(raw,)| decode(&raw)).transpose()
    }

    async fn update_fields(
        &self,
        table: &str,
        key: &str,
        fields: Item,
    ) -> Result<Option<Item>, StoreError> {
        Ok(match self.swap_fields(table, key, fields, None).await? {
            ConditionalUpdate::Updated(item) | ConditionalUpdate::Rejected(item) => Some(item),
            ConditionalUpdate::Missing => None,
        })
    }

    async fn update_fields_if(
        &self,
        table: &str,
        key: &str,
        fields: Item,
        condition: &Condition,
    ) -> Result<ConditionalUpdate, StoreError> {
        self.swap_fields(table, key, fields, Some(condition)).await
    }

    async fn delete(&self, table: &str, key: &str) -> Result<(), StoreError> {
        self.schema(table)?;
        sqlx::query("DELETE FROM records WHERE table_name = ? AND record_key = ?")
            .bind(table)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan(&self, table: &str, limit: u32) -> Result<Vec<Item>, StoreError> {
        self.schema(table)?;
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT item FROM records WHERE table_name = ? ORDER BY rowid LIMIT ?")
                .bind(table)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(|(raw,)| decode(raw)).collect()
    }

    async fn query_by_index(
        &self,
        table: &str,
        index: &str,
        key: &str,
        limit: u32,
        descending: bool,
    ) -> Result<Vec<Item>, StoreError> {
        let schema = self.schema(table)?;
        let index_schema = schema.index(index).ok_or_else(|| StoreError::UnknownIndex {
            table: table.to_string(),
            index: index.to_string(),
        })?;

        let sql = if descending {
            "SELECT item FROM records
             WHERE table_name = ? AND json_extract(item, ?) = ?
             ORDER BY json_extract(item, ?) DESC, rowid DESC LIMIT ?"
        } else {
            "SELECT item FROM records
             WHERE table_name = ? AND json_extract(item, ?) = ?
             ORDER BY json_extract(item, ?) ASC, rowid ASC LIMIT ?"
        };

        let rows: Vec<(String,)> = sqlx::query_as(sql)
            .bind(table)
            .bind(json_path(&index_schema.partition_attribute))
            .bind(key)
            .bind(json_path(&index_schema.sort_attribute))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|(raw,)| decode(raw)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: serde_json::Value) -> Item {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("test items must be objects"),
        }
    }

    async fn setup_store() -> (SqliteRecordStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let url = format!("sqlite:{}", dir.path().join("store.db").display());
        let pool = crate::db::connect(&url).await.expect("connect");
        let store = SqliteRecordStore::new(
            pool,
            [
                TableSchema::new("things", "thingId"),
                TableSchema::new("readings", "readingId").with_index(
                    "ThingIndex",
                    "thingId",
                    "timestamp",
                ),
            ],
        );
        (store, dir)
    }

    #[tokio::test]
    async fn test_put_get_and_overwrite() {
        let (store, _dir) = setup_store().await;
        store
            .put("things", item(json!({"thingId": "t1", "color": "red"})))
            .await
            .unwrap();
        store
            .put("things", item(json!({"thingId": "t1", "color": "blue"})))
            .await
            .unwrap();

        let found = store.get_by_key("things", "t1").await.unwrap().unwrap();
        assert_eq!(found["color"], "blue");
        assert!(store.get_by_key("things", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_requires_key_attribute() {
        let (store, _dir) = setup_store().await;
        let err = store
            .put("things", item(json!({"color": "red"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingKey { .. }));
        let err = store.scan("nope", 10).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownTable(_)));
    }

    #[tokio::test]
    async fn test_update_fields_merges_and_keeps_key() {
        let (store, _dir) = setup_store().await;
        store
            .put("things", item(json!({"thingId": "t1", "color": "red", "size": 3})))
            .await
            .unwrap();

        let updated = store
            .update_fields(
                "things",
                "t1",
                item(json!({"color": "green", "thingId": "hijack"})),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["color"], "green");
        assert_eq!(updated["size"], 3);
        assert_eq!(updated["thingId"], "t1");

        let absent = store
            .update_fields("things", "t2", item(json!({"color": "green"})))
            .await
            .unwrap();
        assert!(absent.is_none());
        assert!(store.get_by_key("things", "t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_fields_if_checks_stored_value() {
        let (store, _dir) = setup_store().await;
        store
            .put("things", item(json!({"thingId": "t1", "state": "open"})))
            .await
            .unwrap();
        let only_open = Condition::one_of("state", [json!("open")]);

        let closed = store
            .update_fields_if("things", "t1", item(json!({"state": "closed"})), &only_open)
            .await
            .unwrap();
        assert!(matches!(closed, ConditionalUpdate::Updated(ref i) if i["state"] == "closed"));

        let reopened = store
            .update_fields_if("things", "t1", item(json!({"state": "open"})), &only_open)
            .await
            .unwrap();
        match reopened {
            ConditionalUpdate::Rejected(stored) => assert_eq!(stored["state"], "closed"),
            other => panic!("expected rejection, got {other:?}"),
        }
        let found = store.get_by_key("things", "t1").await.unwrap().unwrap();
        assert_eq!(found["state"], "closed");

        let missing = store
            .update_fields_if("things", "t9", item(json!({"state": "closed"})), &only_open)
            .await
            .unwrap();
        assert_eq!(missing, ConditionalUpdate::Missing);
    }

    #[tokio::test]
    async fn test_concurrent_conditional_updates_apply_once() {
        let (store, _dir) = setup_store().await;
        store
            .put("things", item(json!({"thingId": "t1", "state": "open"})))
            .await
            .unwrap();
        let store = std::sync::Arc::new(store);
        let only_open = Condition::one_of("state", [json!("open")]);

        let mut handles = Vec::new();
        for winner in 0..4 {
            let store = store.clone();
            let only_open = only_open.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_fields_if(
                        "things",
                        "t1",
                        item(json!({"state": "closed", "closedBy": winner})),
                        &only_open,
                    )
                    .await
                    .unwrap()
            }));
        }
        let mut applied = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ConditionalUpdate::Updated(_)) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_scan_honours_limit_and_delete() {
        let (store, _dir) = setup_store().await;
        for idx in 0..5 {
            store
                .put("things", item(json!({"thingId": format!("t{idx}")})))
                .await
                .unwrap();
        }
        assert_eq!(store.scan("things", 3).await.unwrap().len(), 3);

        store.delete("things", "t0").await.unwrap();
        let all = store.scan("things", 100).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|i| i["thingId"] != "t0"));
    }

    #[tokio::test]
    async fn test_query_by_index_orders_by_sort_attribute() {
        let (store, _dir) = setup_store().await;
        for (id, thing, ts) in [
            ("r1", "a", "2026-01-01T00:00:02.000Z"),
            ("r2", "a", "2026-01-01T00:00:03.000Z"),
            ("r3", "b", "2026-01-01T00:00:04.000Z"),
            ("r4", "a", "2026-01-01T00:00:01.000Z"),
        ] {
            store
                .put(
                    "readings",
                    item(json!({"readingId": id, "thingId": thing, "timestamp": ts})),
                )
                .await
                .unwrap();
        }

        let desc = store
            .query_by_index("readings", "ThingIndex", "a", 10, true)
            .await
            .unwrap();
        let ids: Vec<_> = desc.iter().map(|i| i["readingId"].clone()).collect();
        assert_eq!(ids, vec![json!("r2"), json!("r1"), json!("r4")]);

        let asc_limited = store
            .query_by_index("readings", "ThingIndex", "a", 2, false)
            .await
            .unwrap();
        assert_eq!(asc_limited.len(), 2);
        assert_eq!(asc_limited[0]["readingId"], "r4");

        let err = store
            .query_by_index("readings", "Missing", "a", 10, true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownIndex { .. }));
    }
}
