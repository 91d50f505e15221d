use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use serde_json::Value;

use super::{CollectionSpec, Condition, Store, StoreResult};
use crate::error::StoreError;
use crate::record::{Fields, Record, RecordId, RecordRef};

#[derive(Debug, Default)]
struct Table {
    next_id: RecordId,
    rows: BTreeMap<RecordId, Fields>,
}

/// In-process storage adapter. Tables are created on first insert.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

enum Compiled<'a> {
    Eq(&'a str, &'a Value),
    In(&'a str, &'a [Value]),
    Ids(HashSet<RecordId>),
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, type_name: &str) -> usize {
        self.tables
            .read()
            .get(type_name)
            .map_or(0, |t| t.rows.len())
    }

    fn compile<'a>(tables: &HashMap<String, Table>, spec: &'a CollectionSpec) -> Vec<Compiled<'a>> {
        spec.conditions
            .iter()
            .map(|condition| match condition {
                Condition::Eq { field, value } => Compiled::Eq(field, value),
                Condition::In { field, values } => Compiled::In(field, values),
                Condition::Joined {
                    join_table,
                    owner_key,
                    owners,
                    target_key,
                } => {
                    let ids = tables
                        .get(join_table)
                        .map(|join| {
                            join.rows
                                .values()
                                .filter(|row| owners.contains(column(row, owner_key)))
                                .filter_map(|row| row.get(target_key).and_then(Value::as_u64))
                                .collect()
                        })
                        .unwrap_or_default();
                    Compiled::Ids(ids)
                }
            })
            .collect()
    }

    fn matches(id: RecordId, row: &Fields, compiled: &[Compiled<'_>]) -> bool {
        let id_value = Value::from(id);
        compiled.iter().all(|c| match c {
            Compiled::Eq(field, value) => field_value(&id_value, row, field) == *value,
            Compiled::In(field, values) => values.contains(field_value(&id_value, row, field)),
            Compiled::Ids(ids) => ids.contains(&id),
        })
    }

    fn matching_ids(tables: &HashMap<String, Table>, spec: &CollectionSpec) -> Vec<RecordId> {
        let Some(table) = tables.get(&spec.type_name) else {
            return Vec::new();
        };
        let compiled = Self::compile(tables, spec);
        table
            .rows
            .iter()
            .filter(|(id, row)| Self::matches(**id, row, &compiled))
            .map(|(id, _)| *id)
            .collect()
    }
}

static NULL: Value = Value::Null;

fn column<'a>(row: &'a Fields, field: &str) -> &'a Value {
    row.get(field).unwrap_or(&NULL)
}

fn field_value<'a>(id: &'a Value, row: &'a Fields, field: &str) -> &'a Value {
    if field == "id" {
        id
    } else {
        column(row, field)
    }
}

fn record(type_name: &str, id: RecordId, fields: &Fields) -> Record {
    Record {
        type_name: type_name.to_string(),
        id,
        fields: fields.clone(),
    }
}

impl Store for MemoryStore {
    fn insert(&self, type_name: &str, mut fields: Fields) -> StoreResult<Record> {
        fields.remove("id");
        let mut tables = self.tables.write();
        let table = tables.entry(type_name.to_string()).or_default();
        table.next_id += 1;
        let id = table.next_id;
        table.rows.insert(id, fields);
        Ok(record(type_name, id, &table.rows[&id]))
    }

    fn get(&self, r: &RecordRef) -> StoreResult<Option<Record>> {
        Ok(self
            .tables
            .read()
            .get(&r.type_name)
            .and_then(|t| t.rows.get(&r.id))
            .map(|fields| record(&r.type_name, r.id, fields)))
    }

    fn get_many(&self, type_name: &str, ids: &[RecordId]) -> StoreResult<Vec<Record>> {
        let tables = self.tables.read();
        let Some(table) = tables.get(type_name) else {
            return Ok(Vec::new());
        };
        let mut wanted: Vec<RecordId> = ids.to_vec();
        wanted.sort_unstable();
        wanted.dedup();
        Ok(wanted
            .into_iter()
            .filter_map(|id| table.rows.get(&id).map(|f| record(type_name, id, f)))
            .collect())
    }

    fn update(&self, r: &RecordRef, fields: Fields) -> StoreResult<Record> {
        let mut tables = self.tables.write();
        let row = tables
            .get_mut(&r.type_name)
            .and_then(|t| t.rows.get_mut(&r.id))
            .ok_or_else(|| StoreError::NotFound(r.clone()))?;
        for (key, value) in fields {
            if key != "id" {
                row.insert(key, value);
            }
        }
        Ok(record(&r.type_name, r.id, row))
    }

    fn delete(&self, r: &RecordRef) -> StoreResult<Option<Record>> {
        Ok(self
            .tables
            .write()
            .get_mut(&r.type_name)
            .and_then(|t| t.rows.remove(&r.id))
            .map(|fields| record(&r.type_name, r.id, &fields)))
    }

    fn delete_where(&self, spec: &CollectionSpec) -> StoreResult<usize> {
        let mut tables = self.tables.write();
        let ids = Self::matching_ids(&tables, spec);
        if let Some(table) = tables.get_mut(&spec.type_name) {
            for id in &ids {
                table.rows.remove(id);
            }
        }
        Ok(ids.len())
    }

    fn page_ids(
        &self,
        spec: &CollectionSpec,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<RecordId>> {
        let tables = self.tables.read();
        Ok(Self::matching_ids(&tables, spec)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }
}
