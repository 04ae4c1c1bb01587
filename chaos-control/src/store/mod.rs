//! Record store contract and adapters.
//!
//! The control plane treats persistence as a keyed item store: items are JSON
//! objects addressed by `(table, key)`, with optional secondary indexes that
//! support equality lookups ordered by a sort attribute.

use async_trait::async_trait;

mod experiments;
mod sqlite;

pub use experiments::{ExperimentRepository, ExperimentUpdate, Transition, EXPERIMENT_ID_INDEX};
pub use sqlite::SqliteRecordStore;

/// A stored item: a JSON object.
pub type Item = serde_json::Map<String, serde_json::Value>;

/// Secondary index over a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    /// Attribute matched for equality
    pub partition_attribute: String,
    /// Attribute the matches are ordered by
    pub sort_attribute: String,
}

/// Shape of one table: its key attribute and indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub key_attribute: String,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, key_attribute: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_attribute: key_attribute.into(),
            indexes: Vec::new(),
        }
    }

    pub fn with_index(
        mut self,
        name: impl Into<String>,
        partition_attribute: impl Into<String>,
        sort_attribute: impl Into<String>,
    ) -> Self {
        self.indexes.push(IndexSchema {
            name: name.into(),
            partition_attribute: partition_attribute.into(),
            sort_attribute: sort_attribute.into(),
        });
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|idx| idx.name == name)
    }
}

/// Precondition on a stored item: `attribute` must currently hold one of
/// `one_of`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub attribute: String,
    pub one_of: Vec<serde_json::Value>,
}

impl Condition {
    pub fn one_of(
        attribute: impl Into<String>,
        values: impl IntoIterator<Item = serde_json::Value>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            one_of: values.into_iter().collect(),
        }
    }

    pub fn holds_for(&self, item: &Item) -> bool {
        item.get(&self.attribute)
            .is_some_and(|value| self.one_of.contains(value))
    }
}

/// Outcome of [`RecordStore::update_fields_if`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalUpdate {
    Updated(Item),
    /// The condition did not hold; the item as stored, untouched.
    Rejected(Item),
    Missing,
}

/// Keyed item persistence.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the item under the key carried in its key attribute.
    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError>;

    async fn get_by_key(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError>;

    /// Merge `fields` into an existing item and return the updated item.
    /// Returns `None` when no item exists under `key`. The key attribute is
    /// never rewritten.
    async fn update_fields(
        &self,
        table: &str,
        key: &str,
        fields: Item,
    ) -> Result<Option<Item>, StoreError>;

    /// Like [`update_fields`](Self::update_fields), but only if `condition`
    /// holds for the item as stored at the moment of the write.
    async fn update_fields_if(
        &self,
        table: &str,
        key: &str,
        fields: Item,
        condition: &Condition,
    ) -> Result<ConditionalUpdate, StoreError>;

    async fn delete(&self, table: &str, key: &str) -> Result<(), StoreError>;

    /// Up to `limit` items in storage order.
    async fn scan(&self, table: &str, limit: u32) -> Result<Vec<Item>, StoreError>;

    /// Up to `limit` items whose index partition attribute equals `key`,
    /// ordered by the index sort attribute.
    async fn query_by_index(
        &self,
        table: &str,
        index: &str,
        key: &str,
        limit: u32,
        descending: bool,
    ) -> Result<Vec<Item>, StoreError>;
}

/// Errors raised by record store adapters
#[derive(Debug, thiserror::Error, Clone)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown index {index} on table {table}")]
    UnknownIndex { table: String, index: String },

    #[error("Item for table {table} is missing key attribute {attribute}")]
    MissingKey { table: String, attribute: String },

    #[error("Item {key} in table {table} kept changing during update")]
    Contended { table: String, key: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
