//! Runtime side of the observer graph.
//!
//! Every mutation made through the [`Engine`] fires the hook of the mutated
//! type for the matching [`Event`], and each binding installed on that hook
//! resolves its reverse path and notifies the observers it reaches. Notifier
//! strategies mutate observers through the [`Propagation`] they are handed,
//! so chained observers are notified along the same call chain.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::dispatch::{DispatchQueue, DispatchRequest, WorkItem};
use crate::error::{CascadeError, ConfigurationError, StoreError};
use crate::notifier::{BatchNotifier, NotifierRegistry};
use crate::observe::NotifierBinding;
use crate::record::{Event, Fields, Record, RecordRef};
use crate::schema::{RelationKind, RelationshipDescriptor, Schema};
use crate::store::{CollectionSpec, Store};
use crate::traverse::{self, Reach};
use crate::Result;

pub struct Engine {
    schema: Arc<Schema>,
    notifiers: Arc<NotifierRegistry>,
    store: Arc<dyn Store>,
    dispatch: DispatchQueue,
    suppressed: Mutex<HashSet<RecordRef>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("notifiers", &self.notifiers)
            .field("dispatch", &self.dispatch)
            .field("suppressed", &self.suppressed.lock().len())
            .finish()
    }
}

impl Engine {
    /// An engine delivering every notification inline.
    pub fn new(schema: Arc<Schema>, notifiers: Arc<NotifierRegistry>, store: Arc<dyn Store>) -> Self {
        Self {
            schema,
            notifiers,
            store,
            dispatch: DispatchQueue::local(),
            suppressed: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_dispatch(mut self, dispatch: DispatchQueue) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn notifiers(&self) -> &NotifierRegistry {
        &self.notifiers
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn dispatch(&self) -> &DispatchQueue {
        &self.dispatch
    }

    /// Start a new call chain.
    pub fn propagation(&self) -> Propagation<'_> {
        Propagation {
            engine: self,
            active: RefCell::new(Vec::new()),
        }
    }

    pub fn get(&self, record: &RecordRef) -> Result<Option<Record>> {
        Ok(self.store.get(record)?)
    }

    pub fn create(&self, type_name: &str, fields: Fields) -> Result<Record> {
        self.propagation().create(type_name, fields)
    }

    pub fn update(&self, record: &RecordRef, fields: Fields) -> Result<Record> {
        self.propagation().update(record, fields)
    }

    /// Write columns without firing any hook.
    pub fn update_columns(&self, record: &RecordRef, fields: Fields) -> Result<Record> {
        self.store.update(record, fields).map_err(not_found)
    }

    pub fn destroy(&self, record: &RecordRef) -> Result<Record> {
        self.propagation().destroy(record)
    }

    pub fn link(&self, owner: &RecordRef, association: &str, target: &RecordRef) -> Result<bool> {
        self.propagation().link(owner, association, target)
    }

    pub fn unlink(&self, owner: &RecordRef, association: &str, target: &RecordRef) -> Result<bool> {
        self.propagation().unlink(owner, association, target)
    }

    /// Make `targets` the complete membership of a habtm association.
    pub fn replace_links(
        &self,
        owner: &RecordRef,
        association: &str,
        targets: &[RecordRef],
    ) -> Result<()> {
        self.propagation().replace_links(owner, association, targets)
    }

    /// Follow `association` from `record`.
    pub fn reach(&self, record: &Record, association: &str) -> Result<Reach> {
        let rel = self.schema.resolve(&record.type_name, association)?;
        traverse::reach(&self.schema, self.store.as_ref(), record, rel)
    }

    /// Stop `record` from notifying its observers until [`Engine::observable`].
    pub fn unobservable(&self, record: &RecordRef) {
        debug!(record = %record, "suppressing notifications");
        self.suppressed.lock().insert(record.clone());
    }

    pub fn observable(&self, record: &RecordRef) {
        debug!(record = %record, "resuming notifications");
        self.suppressed.lock().remove(record);
    }

    pub fn is_suppressed(&self, record: &RecordRef) -> bool {
        self.suppressed.lock().contains(record)
    }

    /// Run a work item that was submitted to a delivery backend.
    pub fn execute(&self, item: &WorkItem) -> Result<()> {
        let prop = self.propagation();
        let Some(observable) = self.store.get(&item.observable)? else {
            warn!(
                observable = %item.observable,
                notifier = %item.notifier,
                "observable vanished before delivery, skipping work item"
            );
            return Ok(());
        };
        prop.enter(observable.to_ref(), item.event);
        let result = prop.execute_in(item, &observable);
        prop.leave();
        result
    }
}

fn not_found(err: StoreError) -> CascadeError {
    match err {
        StoreError::NotFound(r) => CascadeError::RecordNotFound(r),
        other => other.into(),
    }
}

/// One call chain of notifications.
///
/// Tracks the `(record, event)` pairs currently propagating. A mutation that
/// would re-fire one of them is applied but does not notify again, which
/// breaks observation cycles.
pub struct Propagation<'a> {
    engine: &'a Engine,
    active: RefCell<Vec<(RecordRef, Event)>>,
}

impl<'a> Propagation<'a> {
    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    pub fn get(&self, record: &RecordRef) -> Result<Option<Record>> {
        self.engine.get(record)
    }

    pub fn create(&self, type_name: &str, fields: Fields) -> Result<Record> {
        self.engine.schema.type_schema(type_name)?;
        let record = self.engine.store.insert(type_name, fields)?;
        self.notify_observers(&record, Event::Create)?;
        Ok(record)
    }

    pub fn update(&self, record: &RecordRef, fields: Fields) -> Result<Record> {
        let record = self.engine.update_columns(record, fields)?;
        self.notify_observers(&record, Event::Update)?;
        Ok(record)
    }

    pub fn update_columns(&self, record: &RecordRef, fields: Fields) -> Result<Record> {
        self.engine.update_columns(record, fields)
    }

    pub fn destroy(&self, record: &RecordRef) -> Result<Record> {
        let store = self.engine.store();
        let existing = store
            .get(record)?
            .ok_or_else(|| CascadeError::RecordNotFound(record.clone()))?;
        self.notify_observers(&existing, Event::Destroy)?;

        for rel in self.engine.schema.join_relations(&record.type_name) {
            if let RelationKind::HasAndBelongsToMany {
                join_table,
                owner_key,
                ..
            } = &rel.kind
            {
                store.delete_where(&CollectionSpec::new(join_table.as_str()).eq(owner_key, record.id))?;
            }
        }
        store.delete(record)?;
        self.engine.suppressed.lock().remove(record);
        Ok(existing)
    }

    /// Add `target` to `owner`'s habtm `association`. Returns false when the
    /// pair was already linked.
    pub fn link(&self, owner: &RecordRef, association: &str, target: &RecordRef) -> Result<bool> {
        let pair = self.habtm_pair(owner, association, target)?;
        let store = self.engine.store();
        if store.find_first(&pair.spec)?.is_some() {
            return Ok(false);
        }
        store.insert(&pair.spec.type_name, pair.row.clone())?;
        self.notify_membership(&pair, Event::Create)?;
        Ok(true)
    }

    /// Remove `target` from `owner`'s habtm `association`. The observing end
    /// sees a destroy while the link still exists.
    pub fn unlink(&self, owner: &RecordRef, association: &str, target: &RecordRef) -> Result<bool> {
        let pair = self.habtm_pair(owner, association, target)?;
        let store = self.engine.store();
        if store.find_first(&pair.spec)?.is_none() {
            return Ok(false);
        }
        self.notify_membership(&pair, Event::Destroy)?;
        store.delete_where(&pair.spec)?;
        Ok(true)
    }

    pub fn replace_links(
        &self,
        owner: &RecordRef,
        association: &str,
        targets: &[RecordRef],
    ) -> Result<()> {
        let owner_rec = self
            .get(owner)?
            .ok_or_else(|| CascadeError::RecordNotFound(owner.clone()))?;
        let current = match self.engine.reach(&owner_rec, association)? {
            Reach::Many(spec) => spec,
            Reach::One(_) => {
                return Err(not_habtm(owner, association));
            }
        };
        let store = self.engine.store();
        let mut offset = 0;
        let mut existing = Vec::new();
        loop {
            let page = store.page_ids(&current, 256, offset)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            existing.extend(page.into_iter().map(|id| RecordRef::new(current.type_name.as_str(), id)));
        }

        for stale in existing.iter().filter(|r| !targets.contains(r)) {
            self.unlink(owner, association, stale)?;
        }
        for target in targets.iter().filter(|r| !existing.contains(r)) {
            self.link(owner, association, target)?;
        }
        Ok(())
    }

    fn habtm_pair(
        &self,
        owner: &RecordRef,
        association: &str,
        target: &RecordRef,
    ) -> Result<JoinRow> {
        let rel = self.engine.schema.resolve(&owner.type_name, association)?;
        let RelationKind::HasAndBelongsToMany {
            join_table,
            owner_key,
            target_key,
        } = &rel.kind
        else {
            return Err(not_habtm(owner, association));
        };
        if !rel.targets(&target.type_name) {
            return Err(CascadeError::InvalidOperation(format!(
                "{} cannot be linked through {}.{}",
                target, owner.type_name, rel.name
            )));
        }
        let owner_rec = self
            .get(owner)?
            .ok_or_else(|| CascadeError::RecordNotFound(owner.clone()))?;
        let target_rec = self
            .get(target)?
            .ok_or_else(|| CascadeError::RecordNotFound(target.clone()))?;

        // The same join rows seen from the target's side, if it declares them.
        let inverse = self.engine.schema.get(&target.type_name).and_then(|ts| {
            ts.relations()
                .iter()
                .find(|r| {
                    r.targets(&owner.type_name)
                        && matches!(
                            &r.kind,
                            RelationKind::HasAndBelongsToMany {
                                join_table: table,
                                owner_key: own,
                                target_key: other,
                            } if table == join_table && own == target_key && other == owner_key
                        )
                })
                .map(|r| r.name.clone())
        });

        let mut row = Fields::new();
        row.insert(owner_key.clone(), Value::from(owner.id));
        row.insert(target_key.clone(), Value::from(target.id));
        let spec = CollectionSpec::new(join_table.as_str())
            .eq(owner_key, owner.id)
            .eq(target_key, target.id);
        Ok(JoinRow {
            owner: owner_rec,
            target: target_rec,
            association: rel.name.clone(),
            inverse,
            spec,
            row,
        })
    }

    /// A habtm link was added or removed: each end notifies the other end
    /// only through bindings whose reverse path is this join. Neither record
    /// fires its own lifecycle hook.
    fn notify_membership(&self, pair: &JoinRow, event: Event) -> Result<()> {
        self.notify_member(&pair.owner, &pair.association, &pair.target, event)?;
        if let Some(inverse) = &pair.inverse {
            self.notify_member(&pair.target, inverse, &pair.owner, event)?;
        }
        Ok(())
    }

    fn notify_member(&self, end: &Record, via: &str, other: &Record, event: Event) -> Result<()> {
        let Some(ts) = self.engine.schema.get(&end.type_name) else {
            return Ok(());
        };
        let bindings: Vec<&NotifierBinding> = ts
            .bindings_for(event)
            .filter(|b| b.observable_association == via && b.observer_type == other.type_name)
            .collect();
        if bindings.is_empty() {
            return Ok(());
        }
        let key = end.to_ref();
        if self.engine.is_suppressed(&key) || self.is_active(&key, event) {
            trace!(record = %key, %event, "membership change not notified");
            return Ok(());
        }

        self.enter(key, event);
        let result = bindings.into_iter().try_for_each(|binding| {
            debug!(
                observable = %end.to_ref(),
                observer = %other.to_ref(),
                via,
                notifier = %binding.notifier,
                %event,
                "notifying habtm member"
            );
            let strategy = self
                .engine
                .notifiers
                .get(&binding.notifier)
                .ok_or_else(|| ConfigurationError::UnknownNotifier(binding.notifier.clone()))?;
            match strategy.as_batch() {
                Some(batch) => {
                    self.notify_page(&binding.notifier, batch, end, std::slice::from_ref(other))
                }
                None => strategy
                    .action(self, end, other)
                    .map_err(|e| CascadeError::strategy(&binding.notifier, e)),
            }
        });
        self.leave();
        result
    }

    fn enter(&self, record: RecordRef, event: Event) {
        self.active.borrow_mut().push((record, event));
    }

    fn leave(&self) {
        self.active.borrow_mut().pop();
    }

    fn is_active(&self, record: &RecordRef, event: Event) -> bool {
        self.active
            .borrow()
            .iter()
            .any(|(r, e)| *e == event && r == record)
    }

    /// Fire every binding installed on `record`'s type for `event`, in
    /// declaration order.
    fn notify_observers(&self, record: &Record, event: Event) -> Result<()> {
        let Some(ts) = self.engine.schema.get(&record.type_name) else {
            return Ok(());
        };
        if !ts.has_hook(event) {
            return Ok(());
        }
        let key = record.to_ref();
        if self.engine.is_suppressed(&key) {
            trace!(record = %key, %event, "notifications suppressed");
            return Ok(());
        }
        if self.is_active(&key, event) {
            debug!(record = %key, %event, "already propagating, not notifying again");
            return Ok(());
        }

        self.enter(key, event);
        let result = ts
            .bindings_for(event)
            .try_for_each(|binding| self.run_binding(binding, record));
        self.leave();
        result
    }

    fn run_binding(&self, binding: &NotifierBinding, observable: &Record) -> Result<()> {
        let engine = self.engine;
        let strategy = engine
            .notifiers
            .get(&binding.notifier)
            .ok_or_else(|| ConfigurationError::UnknownNotifier(binding.notifier.clone()))?;
        let reverse: &RelationshipDescriptor = engine
            .schema
            .resolve(&observable.type_name, &binding.observable_association)?;

        match traverse::reach(&engine.schema, engine.store(), observable, reverse)? {
            Reach::One(None) => {
                trace!(observable = %observable.to_ref(), reverse = %reverse.name, "no observer");
                Ok(())
            }
            Reach::One(Some(observer)) if observer.type_name != binding.observer_type => {
                trace!(
                    observer = %observer.to_ref(),
                    expected = %binding.observer_type,
                    "reached record is not an observer of this binding"
                );
                Ok(())
            }
            Reach::One(Some(observer)) => {
                debug!(
                    observable = %observable.to_ref(),
                    observer = %observer.to_ref(),
                    notifier = %binding.notifier,
                    event = %binding.event,
                    "notifying observer"
                );
                strategy
                    .action(self, observable, &observer)
                    .map_err(|e| CascadeError::strategy(&binding.notifier, e))
            }
            Reach::Many(observers) => {
                let batch = strategy.as_batch().ok_or_else(|| ConfigurationError::BatchUnsupported {
                    notifier: binding.notifier.clone(),
                    owner: binding.observer_type.clone(),
                    association: binding.association.clone(),
                })?;
                let mut request = DispatchRequest::new(
                    &binding.notifier,
                    binding.event,
                    observable.to_ref(),
                    observers,
                    binding.batch_size,
                );
                let pages = engine.dispatch.enqueue_notifications(
                    engine.store(),
                    &mut request,
                    &mut |page| self.notify_page(&binding.notifier, batch, observable, page),
                    &mut |item| self.execute_in(item, observable),
                )?;
                debug!(
                    observable = %observable.to_ref(),
                    notifier = %binding.notifier,
                    pages,
                    "observer pages dispatched"
                );
                Ok(())
            }
        }
    }

    /// Deliver one work item within this call chain.
    fn execute_in(&self, item: &WorkItem, observable: &Record) -> Result<()> {
        let strategy = self
            .engine
            .notifiers
            .get(&item.notifier)
            .ok_or_else(|| ConfigurationError::UnknownNotifier(item.notifier.clone()))?;
        let batch = strategy.as_batch().ok_or_else(|| {
            CascadeError::InvalidOperation(format!(
                "notifier '{}' cannot deliver a batch",
                item.notifier
            ))
        })?;
        let observers = self.engine.store.get_many(&item.observer_type, &item.ids)?;
        self.notify_page(&item.notifier, batch, observable, &observers)
    }

    fn notify_page(
        &self,
        notifier: &str,
        batch: &dyn BatchNotifier,
        observable: &Record,
        observers: &[Record],
    ) -> Result<()> {
        if observers.is_empty() {
            return Ok(());
        }
        trace!(
            observable = %observable.to_ref(),
            notifier,
            count = observers.len(),
            "notifying observer page"
        );
        batch
            .notify_many(self, observable, observers)
            .map_err(|e| CascadeError::strategy(notifier, e))
    }
}

struct JoinRow {
    owner: Record,
    target: Record,
    association: String,
    /// Name of the same habtm relationship declared on the target type.
    inverse: Option<String>,
    spec: CollectionSpec,
    row: Fields,
}

fn not_habtm(owner: &RecordRef, association: &str) -> CascadeError {
    CascadeError::InvalidOperation(format!(
        "{}.{} is not a has-and-belongs-to-many association",
        owner.type_name, association
    ))
}
