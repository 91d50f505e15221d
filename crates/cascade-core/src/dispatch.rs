//! Delivery boundary between the engine and whatever executes notifications.
//!
//! A [`DispatchRequest`] describes "notify these observers of this event";
//! the [`DispatchQueue`] turns it into pages. Destroy requests are delivered
//! synchronously through [`Store::batched_each`]. Every other event is paged
//! by id and each page is handed to the [`DeliveryBackend`] as a serialisable
//! [`WorkItem`] naming the notifier, so no executable state ever crosses the
//! boundary.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::record::{Event, Record, RecordId, RecordRef};
use crate::store::{CollectionSpec, Store};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    Created,
    /// Destroy path: pages are delivered inline, straight from the store.
    BatchIterating,
    /// The notifier name has been attached to the request.
    ActionRegistered,
    Paging,
    /// The n-th page (zero based) was accepted by the backend.
    Submitted(usize),
    Done,
    ActionUnregistered,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchState::Created => f.write_str("created"),
            DispatchState::BatchIterating => f.write_str("batch_iterating"),
            DispatchState::ActionRegistered => f.write_str("action_registered"),
            DispatchState::Paging => f.write_str("paging"),
            DispatchState::Submitted(n) => write!(f, "submitted({n})"),
            DispatchState::Done => f.write_str("done"),
            DispatchState::ActionUnregistered => f.write_str("action_unregistered"),
        }
    }
}

/// One "notify these observers" request, built per triggering event.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub id: Uuid,
    pub notifier: String,
    pub event: Event,
    pub observable: RecordRef,
    pub observers: CollectionSpec,
    pub batch_size: usize,
    state: DispatchState,
    transitions: Vec<DispatchState>,
}

impl DispatchRequest {
    pub fn new(
        notifier: &str,
        event: Event,
        observable: RecordRef,
        observers: CollectionSpec,
        batch_size: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            notifier: notifier.to_string(),
            event,
            observable,
            observers,
            batch_size: batch_size.max(1),
            state: DispatchState::Created,
            transitions: vec![DispatchState::Created],
        }
    }

    pub fn observer_type(&self) -> &str {
        &self.observers.type_name
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Every state the request has been in, oldest first.
    pub fn transitions(&self) -> &[DispatchState] {
        &self.transitions
    }

    fn advance(&mut self, next: DispatchState) {
        trace!(request = %self.id, from = %self.state, to = %next, "dispatch transition");
        self.state = next;
        self.transitions.push(next);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    BatchNotify,
}

/// A page of observers to notify, as submitted to a delivery backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub request_id: Uuid,
    pub kind: WorkKind,
    pub notifier: String,
    pub event: Event,
    pub observable: RecordRef,
    pub observer_type: String,
    pub ids: Vec<RecordId>,
    pub batch_index: usize,
    pub submitted_at: DateTime<Utc>,
}

pub trait DeliveryBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Accept one work item. `inline` executes it in the caller's context,
    /// for backends that deliver synchronously.
    fn submit(
        &self,
        item: &WorkItem,
        inline: &mut dyn FnMut(&WorkItem) -> Result<()>,
    ) -> Result<()>;
}

/// Executes every work item immediately, on the mutating thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalBackend;

impl DeliveryBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn submit(
        &self,
        item: &WorkItem,
        inline: &mut dyn FnMut(&WorkItem) -> Result<()>,
    ) -> Result<()> {
        inline(item)
    }
}

#[derive(Clone)]
pub struct DispatchQueue {
    backend: Arc<dyn DeliveryBackend>,
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::local()
    }
}

impl DispatchQueue {
    pub fn new(backend: Arc<dyn DeliveryBackend>) -> Self {
        Self { backend }
    }

    pub fn local() -> Self {
        Self::new(Arc::new(LocalBackend))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Deliver `request` page by page and return the number of pages.
    ///
    /// Destroy requests call `deliver` with each page of records; all other
    /// events submit one [`WorkItem`] per page of ids, with `inline` as the
    /// executor for synchronous backends. Paging stops at the first empty page.
    pub fn enqueue_notifications(
        &self,
        store: &dyn Store,
        request: &mut DispatchRequest,
        deliver: &mut dyn FnMut(&[Record]) -> Result<()>,
        inline: &mut dyn FnMut(&WorkItem) -> Result<()>,
    ) -> Result<usize> {
        debug!(
            request = %request.id,
            notifier = %request.notifier,
            event = %request.event,
            observable = %request.observable,
            observer_type = %request.observer_type(),
            batch_size = request.batch_size,
            backend = self.backend.name(),
            "enqueueing notifications"
        );

        if request.event == Event::Destroy {
            request.advance(DispatchState::BatchIterating);
            let mut pages = 0;
            store.batched_each(&request.observers, request.batch_size, &mut |page| {
                pages += 1;
                deliver(page.as_slice())
            })?;
            request.advance(DispatchState::Done);
            return Ok(pages);
        }

        request.advance(DispatchState::ActionRegistered);
        request.advance(DispatchState::Paging);
        let mut batch_index = 0;
        loop {
            let offset = batch_index * request.batch_size;
            let ids = store.page_ids(&request.observers, request.batch_size, offset)?;
            if ids.is_empty() {
                break;
            }
            let item = WorkItem {
                request_id: request.id,
                kind: WorkKind::BatchNotify,
                notifier: request.notifier.clone(),
                event: request.event,
                observable: request.observable.clone(),
                observer_type: request.observer_type().to_string(),
                ids,
                batch_index,
                submitted_at: Utc::now(),
            };
            self.backend.submit(&item, inline)?;
            request.advance(DispatchState::Submitted(batch_index));
            batch_index += 1;
        }
        request.advance(DispatchState::Done);
        request.advance(DispatchState::ActionUnregistered);
        Ok(batch_index)
    }
}
