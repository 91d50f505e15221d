//! Following a relationship from a concrete record.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::CascadeError;
use crate::record::{Record, RecordId, RecordRef};
use crate::schema::{role_columns, Cardinality, RelationKind, RelationshipDescriptor, Schema};
use crate::store::{CollectionSpec, Condition, Store};
use crate::Result;

/// Page size used while collecting intermediate ids of a through traversal.
const THROUGH_PAGE: usize = 256;

/// What a relationship leads to from one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Reach {
    /// A to-one path; `None` when the reference is unset or dangling.
    One(Option<Record>),
    /// A to-many path, left unmaterialised so callers can page through it.
    Many(CollectionSpec),
}

pub fn reach(
    schema: &Schema,
    store: &dyn Store,
    record: &Record,
    rel: &RelationshipDescriptor,
) -> Result<Reach> {
    let target = || static_target(rel);

    let reach = match &rel.kind {
        RelationKind::BelongsTo { foreign_key } => match record.get_id(foreign_key) {
            Some(id) => Reach::One(store.get(&RecordRef::new(target()?, id))?),
            None => Reach::One(None),
        },
        RelationKind::HasOne { foreign_key } => {
            let spec = CollectionSpec::new(target()?).eq(foreign_key, record.id);
            Reach::One(store.find_first(&spec)?)
        }
        RelationKind::HasMany { foreign_key } => {
            Reach::Many(CollectionSpec::new(target()?).eq(foreign_key, record.id))
        }
        RelationKind::HasAndBelongsToMany {
            join_table,
            owner_key,
            target_key,
        } => Reach::Many(CollectionSpec::new(target()?).filter(Condition::Joined {
            join_table: join_table.clone(),
            owner_key: owner_key.clone(),
            owners: vec![Value::from(record.id)],
            target_key: target_key.clone(),
        })),
        RelationKind::BelongsToPolymorphic { role } => {
            let (id_col, type_col) = role_columns(role);
            match (record.get_str(&type_col), record.get_id(&id_col)) {
                (Some(tag), Some(id)) => Reach::One(store.get(&RecordRef::new(tag, id))?),
                _ => Reach::One(None),
            }
        }
        RelationKind::HasOneAs { role } => {
            let spec = polymorphic_spec(target()?, role, record);
            Reach::One(store.find_first(&spec)?)
        }
        RelationKind::HasManyAs { role } => Reach::Many(polymorphic_spec(target()?, role, record)),
        RelationKind::Through { through, source } => {
            through_reach(schema, store, record, rel, through, source)?
        }
    };
    Ok(reach)
}

fn static_target(rel: &RelationshipDescriptor) -> Result<&str> {
    rel.target_type.as_deref().ok_or_else(|| {
        CascadeError::InvalidOperation(format!("{}.{} has no static target", rel.owner, rel.name))
    })
}

fn polymorphic_spec(target: &str, role: &str, owner: &Record) -> CollectionSpec {
    let (id_col, type_col) = role_columns(role);
    CollectionSpec::new(target)
        .eq(&id_col, owner.id)
        .eq(&type_col, owner.type_name.as_str())
}

fn through_reach(
    schema: &Schema,
    store: &dyn Store,
    record: &Record,
    rel: &RelationshipDescriptor,
    through: &str,
    source: &str,
) -> Result<Reach> {
    let via = schema.resolve(&record.type_name, through)?;
    let mid_type = via.target_type.as_deref().ok_or_else(|| {
        CascadeError::InvalidOperation(format!("{}.{} goes through a polymorphic path", rel.owner, rel.name))
    })?;
    let src = schema.resolve(mid_type, source)?;
    let target = static_target(rel)?;

    let spec = match reach(schema, store, record, via)? {
        Reach::One(None) => CollectionSpec::with_ids(target, []),
        Reach::One(Some(mid)) => match reach(schema, store, &mid, src)? {
            Reach::One(found) if rel.cardinality == Cardinality::One => return Ok(Reach::One(found)),
            Reach::One(found) => CollectionSpec::with_ids(target, found.map(|r| r.id)),
            Reach::Many(spec) => spec,
        },
        Reach::Many(mids) => fan_out(schema, store, &mids, src, target)?,
    };

    Ok(match rel.cardinality {
        Cardinality::One => Reach::One(store.find_first(&spec)?),
        Cardinality::Many => Reach::Many(spec),
    })
}

/// Targets of `src` for every intermediate in `mids`, as a single collection.
fn fan_out(
    schema: &Schema,
    store: &dyn Store,
    mids: &CollectionSpec,
    src: &RelationshipDescriptor,
    target: &str,
) -> Result<CollectionSpec> {
    let mid_ids = collect_ids(store, mids)?;
    let owners: Vec<Value> = mid_ids.iter().copied().map(Value::from).collect();

    let spec = match &src.kind {
        RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => {
            CollectionSpec::new(target).is_in(foreign_key, owners)
        }
        RelationKind::HasAndBelongsToMany {
            join_table,
            owner_key,
            target_key,
        } => CollectionSpec::new(target).filter(Condition::Joined {
            join_table: join_table.clone(),
            owner_key: owner_key.clone(),
            owners,
            target_key: target_key.clone(),
        }),
        RelationKind::HasOneAs { role } | RelationKind::HasManyAs { role } => {
            let (id_col, type_col) = role_columns(role);
            CollectionSpec::new(target)
                .is_in(&id_col, owners)
                .eq(&type_col, mids.type_name.as_str())
        }
        // Everything else is followed one intermediate at a time; only ids are kept.
        _ => {
            let mut ids = BTreeSet::new();
            for chunk in mid_ids.chunks(THROUGH_PAGE) {
                for mid in store.get_many(&mids.type_name, chunk)? {
                    match reach(schema, store, &mid, src)? {
                        Reach::One(Some(found)) if found.type_name == target => {
                            ids.insert(found.id);
                        }
                        Reach::One(_) => {}
                        Reach::Many(spec) => ids.extend(collect_ids(store, &spec)?),
                    }
                }
            }
            CollectionSpec::with_ids(target, ids)
        }
    };
    Ok(spec)
}

fn collect_ids(store: &dyn Store, spec: &CollectionSpec) -> Result<Vec<RecordId>> {
    let mut ids = Vec::new();
    loop {
        let page = store.page_ids(spec, THROUGH_PAGE, ids.len())?;
        if page.is_empty() {
            return Ok(ids);
        }
        ids.extend(page);
    }
}
