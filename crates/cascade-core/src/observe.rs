//! `observes` declarations and their resolution into notifier bindings.
//!
//! Wiring happens while the schema is built: each declared association is
//! resolved on the observer type, its inverse (the reverse path) is found on
//! the observable type, and a binding is installed on the observable side so
//! that one hook per event fans out to every observer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigurationError;
use crate::notifier::NotifierRegistry;
use crate::record::Event;
use crate::schema::{inflect, lookup, RelationKind, RelationshipDescriptor, TypeSchema};

/// One `observes a, b, notifiers: .., on: ..` clause.
#[derive(Debug, Clone, Default)]
pub struct ObserveSpec {
    associations: Vec<String>,
    notifiers: Vec<String>,
    events: Vec<Event>,
    role: Option<String>,
    inverse: Option<String>,
    batch_size: Option<usize>,
}

impl ObserveSpec {
    pub fn new<I, S>(associations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            associations: associations.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn notifiers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.notifiers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn on<I: IntoIterator<Item = Event>>(mut self, events: I) -> Self {
        self.events = events.into_iter().collect();
        self
    }

    /// Observe through a polymorphic `as: role` association.
    pub fn as_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    /// Name the reverse association on the observable type explicitly.
    pub fn inverse(mut self, name: &str) -> Self {
        self.inverse = Some(name.to_string());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size.max(1));
        self
    }

    fn events(&self) -> Vec<Event> {
        if self.events.is_empty() {
            vec![Event::Update]
        } else {
            self.events.clone()
        }
    }
}

/// A resolved `(association, event, notifier)` registration, stored on the
/// observable type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierBinding {
    pub event: Event,
    pub observer_type: String,
    /// Association on the observer type, as declared.
    pub association: String,
    pub notifier: String,
    pub observable_type: String,
    /// Reverse path: association on the observable type leading to observers.
    pub observable_association: String,
    /// Set for polymorphic bindings; only records tagged with the observer
    /// type are followed.
    pub role: Option<String>,
    pub batch_size: usize,
}

impl NotifierBinding {
    pub(crate) fn key(&self) -> (&str, &str, Event, &str) {
        (
            &self.observer_type,
            &self.association,
            self.event,
            &self.notifier,
        )
    }
}

pub(crate) fn wire(
    types: &mut HashMap<String, TypeSchema>,
    notifiers: &NotifierRegistry,
    observer: &str,
    spec: &ObserveSpec,
    default_batch_size: usize,
) -> Result<(), ConfigurationError> {
    if spec.notifiers.is_empty() {
        return Err(ConfigurationError::MissingNotifiers(observer.to_string()));
    }
    if spec.associations.is_empty() {
        return Err(ConfigurationError::MissingAssociations(observer.to_string()));
    }

    for notifier_name in &spec.notifiers {
        let strategy = notifiers
            .get(notifier_name)
            .ok_or_else(|| ConfigurationError::UnknownNotifier(notifier_name.clone()))?;

        for event in spec.events() {
            for association in &spec.associations {
                let forward = relation(types, observer, association)?.clone();
                for (observable, reverse) in observable_sides(types, observer, &forward, spec)? {
                    if (forward.is_collection() || reverse.is_collection())
                        && strategy.as_batch().is_none()
                    {
                        return Err(ConfigurationError::BatchUnsupported {
                            notifier: notifier_name.clone(),
                            owner: observer.to_string(),
                            association: association.clone(),
                        });
                    }

                    let binding = NotifierBinding {
                        event,
                        observer_type: observer.to_string(),
                        association: forward.name.clone(),
                        notifier: notifier_name.clone(),
                        observable_type: observable.clone(),
                        observable_association: reverse.name.clone(),
                        role: reverse.kind.role().map(str::to_string),
                        batch_size: spec.batch_size.unwrap_or(default_batch_size),
                    };
                    debug!(
                        observer,
                        observable = %observable,
                        association = %binding.association,
                        reverse = %binding.observable_association,
                        notifier = %notifier_name,
                        %event,
                        "installing notifier hook"
                    );
                    if let Some(ts) = types.get_mut(&observable) {
                        ts.install(binding);
                    }
                }
            }
        }
    }

    if let Some(ts) = types.get_mut(observer) {
        ts.observer = true;
    }
    Ok(())
}

fn relation<'a>(
    types: &'a HashMap<String, TypeSchema>,
    owner: &str,
    name: &str,
) -> Result<&'a RelationshipDescriptor, ConfigurationError> {
    let ts = types
        .get(owner)
        .ok_or_else(|| ConfigurationError::UnknownType(owner.to_string()))?;
    lookup(&ts.relations, name).ok_or_else(|| ConfigurationError::UnknownAssociation {
        owner: owner.to_string(),
        association: name.to_string(),
    })
}

/// Observable types reached by `forward`, each with its reverse path.
fn observable_sides(
    types: &HashMap<String, TypeSchema>,
    observer: &str,
    forward: &RelationshipDescriptor,
    spec: &ObserveSpec,
) -> Result<Vec<(String, RelationshipDescriptor)>, ConfigurationError> {
    let forward_role = forward.kind.role();
    if let Some(role) = &spec.role {
        if forward_role != Some(role.as_str()) {
            return Err(ConfigurationError::RoleMismatch {
                owner: observer.to_string(),
                association: forward.name.clone(),
                role: role.clone(),
            });
        }
    }

    // The observer points at "anything playing `role`": every type that
    // declares the matching `as: role` association towards the observer is a
    // possible observable.
    if let RelationKind::BelongsToPolymorphic { role } = &forward.kind {
        let mut sides: Vec<_> = types
            .values()
            .flat_map(|ts| ts.relations.iter())
            .filter(|r| r.targets(observer) && r.kind.role() == Some(role.as_str()))
            .map(|r| (r.owner.clone(), r.clone()))
            .collect();
        if sides.is_empty() {
            return Err(ConfigurationError::MissingInverse {
                owner: observer.to_string(),
                association: forward.name.clone(),
                target: format!("<{role}>"),
            });
        }
        sides.sort_by(|a, b| a.0.cmp(&b.0));
        return Ok(sides);
    }

    let target = forward.target_type.clone().ok_or_else(|| {
        ConfigurationError::Invalid(format!(
            "{observer}.{} has no static target type",
            forward.name
        ))
    })?;

    if let Some(inverse) = &spec.inverse {
        let reverse = relation(types, &target, inverse)?.clone();
        let leads_back = match &reverse.kind {
            RelationKind::BelongsToPolymorphic { role } => forward_role == Some(role.as_str()),
            _ => reverse.targets(observer),
        };
        if !leads_back {
            return Err(ConfigurationError::MissingInverse {
                owner: observer.to_string(),
                association: forward.name.clone(),
                target: target.clone(),
            });
        }
        return Ok(vec![(target, reverse)]);
    }

    let ts = types
        .get(&target)
        .ok_or_else(|| ConfigurationError::UnknownType(target.clone()))?;
    let candidates: Vec<&RelationshipDescriptor> = match forward_role {
        Some(role) => ts
            .relations
            .iter()
            .filter(|r| {
                matches!(&r.kind, RelationKind::BelongsToPolymorphic { role: own } if own == role)
            })
            .collect(),
        None => ts.relations.iter().filter(|r| r.targets(observer)).collect(),
    };

    let reverse = pick_inverse(observer, &forward.name, &target, candidates)?;
    Ok(vec![(target, reverse)])
}

fn pick_inverse(
    observer: &str,
    association: &str,
    target: &str,
    candidates: Vec<&RelationshipDescriptor>,
) -> Result<RelationshipDescriptor, ConfigurationError> {
    match candidates.as_slice() {
        [] => Err(ConfigurationError::MissingInverse {
            owner: observer.to_string(),
            association: association.to_string(),
            target: target.to_string(),
        }),
        [only] => Ok((*only).clone()),
        many => {
            let plural = inflect::pluralize(observer);
            let named: Vec<_> = many
                .iter()
                .filter(|r| r.name == observer || r.name == plural)
                .collect();
            match named.as_slice() {
                [only] => Ok((**only).clone()),
                _ => Err(ConfigurationError::AmbiguousInverse {
                    owner: observer.to_string(),
                    association: association.to_string(),
                    target: target.to_string(),
                    candidates: many.iter().map(|r| r.name.clone()).collect(),
                }),
            }
        }
    }
}
