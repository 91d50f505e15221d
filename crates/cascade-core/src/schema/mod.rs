//! Relationship registry.
//!
//! A [`Schema`] is the immutable, process-wide table of declared types, their
//! relationships and the notifier bindings installed on them. It is produced
//! once by [`SchemaBuilder::build`] and shared behind an `Arc`; nothing can add
//! or alter a relationship afterwards.

mod builder;
pub mod inflect;
mod relation;

pub use builder::{EntityBuilder, SchemaBuilder};
pub use relation::*;

use std::collections::{BTreeSet, HashMap};

use crate::error::ConfigurationError;
use crate::observe::NotifierBinding;
use crate::record::Event;

/// Everything known about one declared type.
#[derive(Debug, Clone)]
pub struct TypeSchema {
    pub name: String,
    pub(crate) relations: Vec<RelationshipDescriptor>,
    /// Events with an installed hook; at most one hook per event.
    pub(crate) hooks: BTreeSet<Event>,
    /// Bindings fired by this type's hooks, in declaration order.
    pub(crate) bindings: Vec<NotifierBinding>,
    pub(crate) observer: bool,
    pub(crate) observable: bool,
}

impl TypeSchema {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            relations: Vec::new(),
            hooks: BTreeSet::new(),
            bindings: Vec::new(),
            observer: false,
            observable: false,
        }
    }

    pub fn relations(&self) -> &[RelationshipDescriptor] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn bindings(&self) -> &[NotifierBinding] {
        &self.bindings
    }

    pub fn bindings_for(&self, event: Event) -> impl Iterator<Item = &NotifierBinding> {
        self.bindings.iter().filter(move |b| b.event == event)
    }

    pub fn has_hook(&self, event: Event) -> bool {
        self.hooks.contains(&event)
    }

    pub fn hooks(&self) -> impl Iterator<Item = Event> + '_ {
        self.hooks.iter().copied()
    }

    /// Install a binding, replacing one with the same key in place.
    pub(crate) fn install(&mut self, binding: NotifierBinding) {
        self.hooks.insert(binding.event);
        self.observable = true;
        match self.bindings.iter_mut().find(|b| b.key() == binding.key()) {
            Some(existing) => *existing = binding,
            None => self.bindings.push(binding),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: HashMap<String, TypeSchema>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub(crate) fn from_types(types: HashMap<String, TypeSchema>) -> Self {
        Self { types }
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeSchema> {
        self.types.get(type_name)
    }

    pub fn type_schema(&self, type_name: &str) -> Result<&TypeSchema, ConfigurationError> {
        self.types
            .get(type_name)
            .ok_or_else(|| ConfigurationError::UnknownType(type_name.to_string()))
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Look up a relationship by its exact name, then by its plural form.
    pub fn resolve(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<&RelationshipDescriptor, ConfigurationError> {
        let ts = self.type_schema(owner)?;
        lookup(&ts.relations, name).ok_or_else(|| ConfigurationError::UnknownAssociation {
            owner: owner.to_string(),
            association: name.to_string(),
        })
    }

    pub fn is_observer(&self, type_name: &str) -> bool {
        self.types.get(type_name).is_some_and(|t| t.observer)
    }

    pub fn is_observable(&self, type_name: &str) -> bool {
        self.types.get(type_name).is_some_and(|t| t.observable)
    }

    /// Every habtm relationship, for join-row cleanup on destroy.
    pub(crate) fn join_relations<'a>(
        &'a self,
        type_name: &'a str,
    ) -> impl Iterator<Item = &'a RelationshipDescriptor> + 'a {
        self.types
            .get(type_name)
            .into_iter()
            .flat_map(|t| t.relations.iter())
            .filter(|r| matches!(r.kind, RelationKind::HasAndBelongsToMany { .. }))
    }
}

pub(crate) fn lookup<'a>(
    relations: &'a [RelationshipDescriptor],
    name: &str,
) -> Option<&'a RelationshipDescriptor> {
    relations.iter().find(|r| r.name == name).or_else(|| {
        let plural = inflect::pluralize(name);
        relations.iter().find(|r| r.name == plural)
    })
}
