use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::Propagation;
use crate::record::{Fields, Record};

/// Named, stateless strategy deciding what "notify an observer" means.
///
/// Strategies reach the store through the [`Propagation`] they are handed, so
/// writes they make fire the hooks of observers further down the chain.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    fn action(&self, ctx: &Propagation<'_>, observable: &Record, observer: &Record)
        -> anyhow::Result<()>;

    /// Batch capability, required wherever the reverse or forward path is a
    /// collection.
    fn as_batch(&self) -> Option<&dyn BatchNotifier> {
        None
    }
}

pub trait BatchNotifier: Send + Sync {
    /// Called once per page of observers.
    fn notify_many(
        &self,
        ctx: &Propagation<'_>,
        observable: &Record,
        observers: &[Record],
    ) -> anyhow::Result<()>;
}

/// Name -> strategy table shared by the engine and by workers.
#[derive(Clone, Default)]
pub struct NotifierRegistry {
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl fmt::Debug for NotifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.notifiers.keys().collect();
        names.sort();
        f.debug_struct("NotifierRegistry")
            .field("notifiers", &names)
            .finish()
    }
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.register(notifier);
        self
    }

    /// Registering a name twice keeps the later strategy.
    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.insert(notifier.name().to_string(), notifier);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Notifier>> {
        self.notifiers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.notifiers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

/// Writes a fixed set of values onto every notified observer.
#[derive(Debug, Clone)]
pub struct SetFieldNotifier {
    name: String,
    values: Fields,
}

impl SetFieldNotifier {
    pub fn new(name: &str, values: Fields) -> Self {
        Self {
            name: name.to_string(),
            values,
        }
    }

    /// Sets `field` to `true`, e.g. `flag("mark_updated", "updated")`.
    pub fn flag(name: &str, field: &str) -> Self {
        let mut values = Fields::new();
        values.insert(field.to_string(), true.into());
        Self::new(name, values)
    }
}

impl Notifier for SetFieldNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn action(
        &self,
        ctx: &Propagation<'_>,
        _observable: &Record,
        observer: &Record,
    ) -> anyhow::Result<()> {
        ctx.update(&observer.to_ref(), self.values.clone())?;
        Ok(())
    }

    fn as_batch(&self) -> Option<&dyn BatchNotifier> {
        Some(self)
    }
}

impl BatchNotifier for SetFieldNotifier {
    fn notify_many(
        &self,
        ctx: &Propagation<'_>,
        _observable: &Record,
        observers: &[Record],
    ) -> anyhow::Result<()> {
        for observer in observers {
            ctx.update(&observer.to_ref(), self.values.clone())?;
        }
        Ok(())
    }
}
