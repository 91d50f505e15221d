//! Storage adapter contract.
//!
//! The engine never materialises whole observer collections: it asks the
//! adapter for pages of identifiers (`page_ids`) or for pages of records
//! (`batched_each`) matching a [`CollectionSpec`].

mod memory;

pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::record::{Fields, Record, RecordId, RecordRef};
use crate::Result;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A single filter over the rows of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Condition {
    /// `field = value`; a missing column compares as null.
    Eq { field: String, value: Value },
    /// `field IN values`.
    In { field: String, values: Vec<Value> },
    /// `id IN (SELECT target_key FROM join_table WHERE owner_key IN owners)`.
    Joined {
        join_table: String,
        owner_key: String,
        owners: Vec<Value>,
        target_key: String,
    },
}

/// Rows of `type_name` matching every condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub type_name: String,
    pub conditions: Vec<Condition>,
}

impl CollectionSpec {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            conditions: Vec::new(),
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::Eq {
            field: field.to_string(),
            value: value.into(),
        })
    }

    pub fn is_in(self, field: &str, values: Vec<Value>) -> Self {
        self.filter(Condition::In {
            field: field.to_string(),
            values,
        })
    }

    pub fn with_ids(type_name: impl Into<String>, ids: impl IntoIterator<Item = RecordId>) -> Self {
        let values = ids.into_iter().map(Value::from).collect();
        Self::new(type_name).is_in("id", values)
    }
}

pub trait Store: Send + Sync {
    /// Insert a row; any `id` in `fields` is ignored in favour of a fresh key.
    fn insert(&self, type_name: &str, fields: Fields) -> StoreResult<Record>;

    fn get(&self, record: &RecordRef) -> StoreResult<Option<Record>>;

    /// Records with the given ids, in ascending id order; unknown ids are skipped.
    fn get_many(&self, type_name: &str, ids: &[RecordId]) -> StoreResult<Vec<Record>>;

    /// Merge `fields` into an existing row.
    fn update(&self, record: &RecordRef, fields: Fields) -> StoreResult<Record>;

    fn delete(&self, record: &RecordRef) -> StoreResult<Option<Record>>;

    fn delete_where(&self, spec: &CollectionSpec) -> StoreResult<usize>;

    /// One page of matching ids in ascending id order.
    fn page_ids(&self, spec: &CollectionSpec, limit: usize, offset: usize)
        -> StoreResult<Vec<RecordId>>;

    fn find_first(&self, spec: &CollectionSpec) -> StoreResult<Option<Record>> {
        let Some(id) = self.page_ids(spec, 1, 0)?.into_iter().next() else {
            return Ok(None);
        };
        self.get(&RecordRef::new(spec.type_name.clone(), id))
    }

    /// Apply `action` to every matching record, one page of `page_size` at a time.
    fn batched_each(
        &self,
        spec: &CollectionSpec,
        page_size: usize,
        action: &mut dyn FnMut(Vec<Record>) -> Result<()>,
    ) -> Result<()> {
        let page_size = page_size.max(1);
        let mut offset = 0;
        loop {
            let ids = self.page_ids(spec, page_size, offset)?;
            if ids.is_empty() {
                return Ok(());
            }
            offset += ids.len();
            let records = self.get_many(&spec.type_name, &ids)?;
            action(records)?;
        }
    }
}
