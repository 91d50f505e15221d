use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::relation::{RelationSpec, RelationshipDescriptor, RelationKind, Shape, TraversalKind};
use super::{lookup, Schema, TypeSchema};
use crate::config::{DispatchConfig, DEFAULT_BATCH_SIZE};
use crate::error::ConfigurationError;
use crate::notifier::NotifierRegistry;
use crate::observe::{self, ObserveSpec};

/// Declarations for one type: its relationships and `observes` clauses.
#[derive(Debug, Clone, Default)]
pub struct EntityBuilder {
    relations: Vec<RelationSpec>,
    observes: Vec<ObserveSpec>,
    observable: bool,
}

impl EntityBuilder {
    pub fn relation(mut self, spec: RelationSpec) -> Self {
        self.relations.push(spec);
        self
    }

    pub fn belongs_to(self, name: &str, target: &str) -> Self {
        self.relation(RelationSpec::belongs_to(name, target))
    }

    pub fn has_one(self, name: &str, target: &str) -> Self {
        self.relation(RelationSpec::has_one(name, target))
    }

    pub fn has_many(self, name: &str, target: &str) -> Self {
        self.relation(RelationSpec::has_many(name, target))
    }

    pub fn has_and_belongs_to_many(self, name: &str, target: &str) -> Self {
        self.relation(RelationSpec::has_and_belongs_to_many(name, target))
    }

    pub fn has_one_through(self, name: &str, through: &str) -> Self {
        self.relation(RelationSpec::has_one_through(name, through))
    }

    pub fn has_many_through(self, name: &str, through: &str) -> Self {
        self.relation(RelationSpec::has_many_through(name, through))
    }

    pub fn belongs_to_polymorphic(self, role: &str) -> Self {
        self.relation(RelationSpec::belongs_to_polymorphic(role))
    }

    pub fn has_one_as(self, name: &str, target: &str, role: &str) -> Self {
        self.relation(RelationSpec::has_one_as(name, target, role))
    }

    pub fn has_many_as(self, name: &str, target: &str, role: &str) -> Self {
        self.relation(RelationSpec::has_many_as(name, target, role))
    }

    /// Mark the type observable even when nothing observes it yet.
    pub fn observable(mut self) -> Self {
        self.observable = true;
        self
    }

    pub fn observes(mut self, spec: ObserveSpec) -> Self {
        self.observes.push(spec);
        self
    }
}

/// Collects type declarations and resolves them into a [`Schema`] in one pass.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    entities: Vec<(String, EntityBuilder)>,
    batch_size: usize,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// A builder whose default page size is the configured dispatch batch size.
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new().batch_size(config.batch_size)
    }

    pub fn entity(mut self, name: &str, declare: impl FnOnce(EntityBuilder) -> EntityBuilder) -> Self {
        self.entities
            .push((name.to_string(), declare(EntityBuilder::default())));
        self
    }

    /// Page size used by bindings that do not set their own.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn build(self, notifiers: &NotifierRegistry) -> Result<Schema, ConfigurationError> {
        let mut seen = HashSet::new();
        for (name, _) in &self.entities {
            if !seen.insert(name.as_str()) {
                return Err(ConfigurationError::DuplicateType(name.clone()));
            }
        }

        let mut resolved: HashMap<String, Vec<Option<RelationshipDescriptor>>> = HashMap::new();
        for (owner, entity) in &self.entities {
            let mut slots = Vec::with_capacity(entity.relations.len());
            for spec in &entity.relations {
                if let Some(target) = &spec.target {
                    if !seen.contains(target.as_str()) {
                        return Err(ConfigurationError::UnknownTarget {
                            owner: owner.clone(),
                            association: spec.name.clone(),
                            target: target.clone(),
                        });
                    }
                }
                slots.push(spec.resolve_direct(owner));
            }
            resolved.insert(owner.clone(), slots);
        }

        resolve_through(&self.entities, &mut resolved)?;

        let mut types = HashMap::with_capacity(self.entities.len());
        for (owner, entity) in &self.entities {
            let mut ts = TypeSchema::new(owner);
            ts.relations = resolved
                .remove(owner)
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .collect();
            ts.observable = entity.observable;
            types.insert(owner.clone(), ts);
        }

        for (owner, entity) in &self.entities {
            for spec in &entity.observes {
                observe::wire(&mut types, notifiers, owner, spec, self.batch_size)?;
            }
        }

        debug!(types = types.len(), "schema built");
        Ok(Schema::from_types(types))
    }
}

/// Through relationships can chain through other through relationships, so
/// resolve them in rounds until nothing changes.
fn resolve_through(
    entities: &[(String, EntityBuilder)],
    resolved: &mut HashMap<String, Vec<Option<RelationshipDescriptor>>>,
) -> Result<(), ConfigurationError> {
    loop {
        let mut progress = Vec::new();
        let mut blocked = None;

        for (owner, entity) in entities {
            for (idx, spec) in entity.relations.iter().enumerate() {
                if !spec.is_through() || resolved[owner][idx].is_some() {
                    continue;
                }
                let Shape::Through {
                    through,
                    source,
                    cardinality,
                } = &spec.shape
                else {
                    continue;
                };
                let source_name = source.as_deref().unwrap_or(&spec.name);
                let known = |ty: &str| -> Vec<RelationshipDescriptor> {
                    resolved
                        .get(ty)
                        .map(|slots| slots.iter().flatten().cloned().collect())
                        .unwrap_or_default()
                };

                let Some(via) = lookup(&known(owner), through).cloned() else {
                    blocked.get_or_insert((owner.clone(), through.clone()));
                    continue;
                };
                let Some(mid) = via.target_type.clone() else {
                    return Err(ConfigurationError::Invalid(format!(
                        "{owner}.{} goes through polymorphic {}",
                        spec.name, via.name
                    )));
                };
                let Some(src) = lookup(&known(&mid), source_name).cloned() else {
                    blocked.get_or_insert((mid.clone(), source_name.to_string()));
                    continue;
                };

                progress.push((
                    owner.clone(),
                    idx,
                    RelationshipDescriptor {
                        name: spec.name.clone(),
                        owner: owner.clone(),
                        cardinality: *cardinality,
                        target_type: src.target_type.clone(),
                        traversal_kind: TraversalKind::Through,
                        kind: RelationKind::Through {
                            through: via.name.clone(),
                            source: src.name.clone(),
                        },
                    },
                ));
            }
        }

        if progress.is_empty() {
            return match blocked {
                Some((owner, association)) => {
                    Err(ConfigurationError::UnknownAssociation { owner, association })
                }
                None => Ok(()),
            };
        }
        for (owner, idx, descriptor) in progress {
            if let Some(slots) = resolved.get_mut(&owner) {
                slots[idx] = Some(descriptor);
            }
        }
    }
}
