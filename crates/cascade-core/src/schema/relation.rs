use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalKind {
    Direct,
    Through,
    Polymorphic,
}

/// How a relationship is stored. Column names are fully resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RelationKind {
    /// The owner holds `foreign_key` pointing at the target.
    BelongsTo { foreign_key: String },
    /// The target holds `foreign_key` pointing at the owner; at most one target.
    HasOne { foreign_key: String },
    /// The targets hold `foreign_key` pointing at the owner.
    HasMany { foreign_key: String },
    /// Pairs live in `join_table` as `(owner_key, target_key)` rows.
    HasAndBelongsToMany {
        join_table: String,
        owner_key: String,
        target_key: String,
    },
    /// Follow `through` on the owner, then `source` on the intermediate type.
    Through { through: String, source: String },
    /// The owner holds `<role>_id` and `<role>_type`; the target type is only
    /// known from the stored tag.
    BelongsToPolymorphic { role: String },
    /// The target holds `<role>_id`/`<role>_type` pointing at the owner.
    HasOneAs { role: String },
    HasManyAs { role: String },
}

impl RelationKind {
    pub fn role(&self) -> Option<&str> {
        match self {
            RelationKind::BelongsToPolymorphic { role }
            | RelationKind::HasOneAs { role }
            | RelationKind::HasManyAs { role } => Some(role),
            _ => None,
        }
    }
}

/// Column names used by a polymorphic role.
pub fn role_columns(role: &str) -> (String, String) {
    (format!("{role}_id"), format!("{role}_type"))
}

/// A resolved relationship. Immutable once the schema is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub name: String,
    pub owner: String,
    pub cardinality: Cardinality,
    /// `None` only for polymorphic belongs-to relationships.
    pub target_type: Option<String>,
    pub traversal_kind: TraversalKind,
    pub kind: RelationKind,
}

impl RelationshipDescriptor {
    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    pub fn targets(&self, type_name: &str) -> bool {
        self.target_type.as_deref() == Some(type_name)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Shape {
    BelongsTo,
    HasOne,
    HasMany,
    Habtm { join_table: Option<String> },
    Through { through: String, source: Option<String>, cardinality: Cardinality },
    BelongsToPolymorphic,
    HasOneAs { role: String },
    HasManyAs { role: String },
}

/// Declaration of a relationship as written by the embedder.
///
/// Column names left unset follow the `<name>_id` conventions and are filled in
/// when the schema is built.
#[derive(Debug, Clone)]
pub struct RelationSpec {
    pub(crate) name: String,
    pub(crate) target: Option<String>,
    pub(crate) shape: Shape,
    pub(crate) foreign_key: Option<String>,
    pub(crate) association_foreign_key: Option<String>,
}

impl RelationSpec {
    fn new(name: &str, target: Option<&str>, shape: Shape) -> Self {
        Self {
            name: name.to_string(),
            target: target.map(str::to_string),
            shape,
            foreign_key: None,
            association_foreign_key: None,
        }
    }

    pub fn belongs_to(name: &str, target: &str) -> Self {
        Self::new(name, Some(target), Shape::BelongsTo)
    }

    pub fn has_one(name: &str, target: &str) -> Self {
        Self::new(name, Some(target), Shape::HasOne)
    }

    pub fn has_many(name: &str, target: &str) -> Self {
        Self::new(name, Some(target), Shape::HasMany)
    }

    pub fn has_and_belongs_to_many(name: &str, target: &str) -> Self {
        Self::new(name, Some(target), Shape::Habtm { join_table: None })
    }

    pub fn has_one_through(name: &str, through: &str) -> Self {
        Self::new(
            name,
            None,
            Shape::Through {
                through: through.to_string(),
                source: None,
                cardinality: Cardinality::One,
            },
        )
    }

    pub fn has_many_through(name: &str, through: &str) -> Self {
        Self::new(
            name,
            None,
            Shape::Through {
                through: through.to_string(),
                source: None,
                cardinality: Cardinality::Many,
            },
        )
    }

    pub fn belongs_to_polymorphic(role: &str) -> Self {
        Self::new(role, None, Shape::BelongsToPolymorphic)
    }

    pub fn has_one_as(name: &str, target: &str, role: &str) -> Self {
        Self::new(
            name,
            Some(target),
            Shape::HasOneAs {
                role: role.to_string(),
            },
        )
    }

    pub fn has_many_as(name: &str, target: &str, role: &str) -> Self {
        Self::new(
            name,
            Some(target),
            Shape::HasManyAs {
                role: role.to_string(),
            },
        )
    }

    pub fn foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = Some(column.to_string());
        self
    }

    /// Join-table column pointing at the target of a habtm relationship.
    pub fn association_foreign_key(mut self, column: &str) -> Self {
        self.association_foreign_key = Some(column.to_string());
        self
    }

    pub fn join_table(mut self, table: &str) -> Self {
        if let Shape::Habtm { join_table } = &mut self.shape {
            *join_table = Some(table.to_string());
        }
        self
    }

    /// Name of the relationship on the intermediate type (defaults to this name).
    pub fn source(mut self, name: &str) -> Self {
        if let Shape::Through { source, .. } = &mut self.shape {
            *source = Some(name.to_string());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_through(&self) -> bool {
        matches!(self.shape, Shape::Through { .. })
    }

    /// Resolve every non-through shape into a descriptor owned by `owner`.
    pub(crate) fn resolve_direct(&self, owner: &str) -> Option<RelationshipDescriptor> {
        let owner_fk = || self.foreign_key.clone().unwrap_or_else(|| format!("{owner}_id"));
        let (kind, cardinality, traversal_kind) = match &self.shape {
            Shape::BelongsTo => (
                RelationKind::BelongsTo {
                    foreign_key: self
                        .foreign_key
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", self.name)),
                },
                Cardinality::One,
                TraversalKind::Direct,
            ),
            Shape::HasOne => (
                RelationKind::HasOne {
                    foreign_key: owner_fk(),
                },
                Cardinality::One,
                TraversalKind::Direct,
            ),
            Shape::HasMany => (
                RelationKind::HasMany {
                    foreign_key: owner_fk(),
                },
                Cardinality::Many,
                TraversalKind::Direct,
            ),
            Shape::Habtm { join_table } => {
                let target = self.target.clone().unwrap_or_default();
                (
                    RelationKind::HasAndBelongsToMany {
                        join_table: join_table
                            .clone()
                            .unwrap_or_else(|| default_join_table(owner, &target)),
                        owner_key: owner_fk(),
                        target_key: self
                            .association_foreign_key
                            .clone()
                            .unwrap_or_else(|| habtm_target_key(owner, &target, &self.name)),
                    },
                    Cardinality::Many,
                    TraversalKind::Direct,
                )
            }
            Shape::BelongsToPolymorphic => (
                RelationKind::BelongsToPolymorphic {
                    role: self.name.clone(),
                },
                Cardinality::One,
                TraversalKind::Polymorphic,
            ),
            Shape::HasOneAs { role } => (
                RelationKind::HasOneAs { role: role.clone() },
                Cardinality::One,
                TraversalKind::Polymorphic,
            ),
            Shape::HasManyAs { role } => (
                RelationKind::HasManyAs { role: role.clone() },
                Cardinality::Many,
                TraversalKind::Polymorphic,
            ),
            Shape::Through { .. } => return None,
        };
        Some(RelationshipDescriptor {
            name: self.name.clone(),
            owner: owner.to_string(),
            cardinality,
            target_type: self.target.clone(),
            traversal_kind,
            kind,
        })
    }
}

/// A self-referential habtm needs a target column distinct from the owner's.
fn habtm_target_key(owner: &str, target: &str, name: &str) -> String {
    if owner == target {
        format!("{}_id", super::inflect::singularize(name))
    } else {
        format!("{target}_id")
    }
}

/// Both sides of a habtm pair agree on the table name regardless of which
/// side declares it.
pub fn default_join_table(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!(
        "{}_{}",
        super::inflect::pluralize(first),
        super::inflect::pluralize(second)
    )
}
