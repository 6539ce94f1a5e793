//! # AggregateToggleController
//! For one subject (a game), tracks how many edges point at it and whether the current actor owns one of them,
//! and lets the actor flip their own edge.
//!
//! Both `count` and `is_active` only ever come from a full fetch of the subject's edges. A toggle issues exactly one
//! insert or delete and then waits for a refetch to show the result; it never bumps the count itself.
//!
//! While a write is waiting for the server, `phase` is `Pending` and further toggles are refused.
//! A refetch confirms the write if it started after the write was issued and either shows the expected membership
//! or started after the write had already come back. The second case covers someone else flipping the edge right
//! after us.

use std::cell::RefCell;
use std::rc::Rc;

use futures::task::LocalSpawnExt;

use crate::Spawner;
use crate::config::SyncConfig;
use crate::data_model::{
    ActorId, FlushLater, FlushNotifications, ListenerKey, MembershipEdge, Observable,
};
use crate::error::SyncError;
use crate::refetch::{Liveness, RefetchGate};
use crate::store::{BackingStore, FeedEvent, Filter, Query, Subscription};

/// How often a toggle reloads membership for a newly seen actor before giving up.
const MAX_RELOADS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
#[serde(rename_all = "camelCase")]
pub enum TogglePhase {
    /// Nothing has loaded yet.
    Loading,
    Idle,
    /// A write was issued and no refetch has confirmed it yet.
    Pending,
    /// The last refetch failed. `count` and `is_active` are from the last good one.
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleState {
    pub count: u64,
    pub is_active: bool,
    pub phase: TogglePhase,
    pub error: Option<SyncError>,
}

impl Default for ToggleState {
    fn default() -> Self {
        Self {
            count: 0,
            is_active: false,
            phase: TogglePhase::Loading,
            error: None,
        }
    }
}

impl ToggleState {
    pub fn pending(&self) -> bool {
        self.phase == TogglePhase::Pending
    }

    pub fn loading(&self) -> bool {
        self.phase == TogglePhase::Loading
    }

    /// Returns whether the write should create the edge (as opposed to removing it).
    fn begin_write(&mut self) -> Result<bool, SyncError> {
        if self.pending() {
            return Err(SyncError::ToggleInProgress);
        }
        self.phase = TogglePhase::Pending;
        Ok(!self.is_active)
    }

    /// The write failed, so there's nothing to wait for. Count and membership stay as they were.
    fn abort_write(&mut self) {
        if self.pending() {
            self.phase = self.resting_phase();
        }
    }

    fn apply_snapshot(&mut self, count: u64, is_active: bool, still_pending: bool) {
        self.count = count;
        self.is_active = is_active;
        self.error = None;
        self.phase = if still_pending {
            TogglePhase::Pending
        } else {
            TogglePhase::Idle
        };
    }

    fn apply_failure(&mut self, error: SyncError, still_pending: bool) {
        self.error = Some(error);
        if !still_pending {
            self.phase = TogglePhase::Error;
        }
    }

    fn resting_phase(&self) -> TogglePhase {
        if self.error.is_some() {
            TogglePhase::Error
        } else {
            TogglePhase::Idle
        }
    }
}

/// Like count and like/unlike for one game, on behalf of whoever is signed in.
pub struct AggregateToggleController<S: BackingStore> {
    shared: Rc<Shared<S>>,
}

struct Shared<S: BackingStore> {
    store: Rc<S>,
    spawner: Spawner,
    config: SyncConfig,
    subject_id: String,
    liveness: Liveness,
    // never hold a borrow of this across an .await
    inner: RefCell<Inner>,
}

struct Inner {
    state: Observable<ToggleState>,
    gate: RefetchGate,
    subscription: Option<Subscription>,
    /// Set while the change feed is down. Outlives any snapshot applied in the meantime.
    feed_lost: Option<SyncError>,
    /// Who `state.is_active` was computed for.
    snapshot_actor: Option<ActorId>,
    write: Option<WriteTicket>,
    next_write_seq: u64,
}

impl Inner {
    fn needs_snapshot_for(&self, actor: &ActorId) -> bool {
        !self.state.loaded_at_least_once() || self.snapshot_actor.as_ref() != Some(actor)
    }
}

#[derive(Clone, Copy, Debug)]
struct WriteTicket {
    seq: u64,
    /// Last fetch epoch issued before the write went out.
    issued_after: u64,
    /// Last fetch epoch issued before the write came back, once it has.
    completed_after: Option<u64>,
    creates_edge: bool,
}

impl WriteTicket {
    fn confirmed_by(&self, epoch: u64, is_active: bool) -> bool {
        epoch > self.issued_after
            && (is_active == self.creates_edge
                || self.completed_after.is_some_and(|done| epoch > done))
    }
}

struct EdgeSnapshot {
    actor: Option<ActorId>,
    count: u64,
    is_active: bool,
}

impl<S: BackingStore> AggregateToggleController<S> {
    /// Starts loading and watching the edges of `subject_id` right away.
    pub fn observe(
        store: Rc<S>,
        spawner: Spawner,
        config: &SyncConfig,
        subject_id: impl Into<String>,
    ) -> Self {
        let shared = Rc::new(Shared {
            store,
            spawner,
            config: config.clone(),
            subject_id: subject_id.into(),
            liveness: Liveness::default(),
            inner: RefCell::new(Inner {
                state: Observable::new(ToggleState::default()),
                gate: RefetchGate::default(),
                subscription: None,
                feed_lost: None,
                snapshot_actor: None,
                write: None,
                next_write_seq: 0,
            }),
        });
        shared.open_subscription();
        shared.request_refresh();
        Self { shared }
    }

    pub fn subject_id(&self) -> &str {
        &self.shared.subject_id
    }

    /// Adds the current actor's edge if they don't have one, removes it if they do.
    ///
    /// Returns once the write itself is done. `count`/`is_active` follow when the refetch lands.
    pub async fn toggle(&self) -> Result<(), SyncError> {
        let shared = &self.shared;
        let edges = shared.config.edges_collection.as_str();
        if !shared.liveness.is_alive() {
            return Err(SyncError::write_failed(edges, "controller was released"));
        }

        let Some(actor) = shared.store.resolve_actor_identity().await else {
            log::warn!("Not toggling {}: nobody is signed in", shared.subject_id);
            return Err(SyncError::Unauthenticated);
        };
        if shared.inner.borrow().state.get().pending() {
            return Err(SyncError::ToggleInProgress);
        }

        // is_active must describe this actor before we decide between insert and delete.
        // A newer refetch can win over our reload, so try once more before giving up.
        let mut reloads = 0;
        while shared.inner.borrow().needs_snapshot_for(&actor) {
            if reloads == MAX_RELOADS {
                return Err(SyncError::fetch_failed(
                    edges,
                    format!("no snapshot for {actor} after {MAX_RELOADS} reloads"),
                ));
            }
            reloads += 1;
            log::debug!("Reloading {} for {actor} before toggling", shared.subject_id);
            shared.load_for(actor.clone()).await?;
        }

        let edge = MembershipEdge::new(shared.subject_id.as_str(), actor);
        let ticket = {
            let _flusher = FlushLater::new(&**shared);
            let mut inner = shared.inner.borrow_mut();
            if inner.state.get().pending() {
                return Err(SyncError::ToggleInProgress);
            }
            let creates_edge = inner.state.get_mut().begin_write()?;
            inner.next_write_seq += 1;
            let ticket = WriteTicket {
                seq: inner.next_write_seq,
                issued_after: inner.gate.last_issued(),
                completed_after: None,
                creates_edge,
            };
            inner.write = Some(ticket);
            ticket
        };

        let outcome = if ticket.creates_edge {
            shared
                .store
                .insert(edges, edge.to_row(&shared.config))
                .await
                .map(|_| ())
        } else {
            shared
                .store
                .delete(edges, &edge.filter(&shared.config))
                .await
        };

        if shared.liveness.discard_if_released("toggle write") {
            return outcome.map_err(|e| SyncError::write_failed(edges, e));
        }

        let result = {
            let _flusher = FlushLater::new(&**shared);
            let mut inner = shared.inner.borrow_mut();
            let ours = inner.write.is_some_and(|w| w.seq == ticket.seq);
            match outcome {
                Ok(()) => {
                    log::info!(
                        "{} {} for {}",
                        if ticket.creates_edge { "Added" } else { "Removed" },
                        shared.subject_id,
                        edge.actor_id
                    );
                    let last_issued = inner.gate.last_issued();
                    if let Some(write) = inner.write.as_mut().filter(|_| ours) {
                        write.completed_after = Some(last_issued);
                    }
                    Ok(())
                }
                Err(e) => {
                    log::error!("Toggling {} failed: {e}", shared.subject_id);
                    if ours {
                        inner.write = None;
                        inner.state.get_mut().abort_write();
                    }
                    Err(SyncError::write_failed(edges, e))
                }
            }
        };

        // a write that changed no rows produces no push, so don't wait for one
        if result.is_ok() {
            shared.request_refresh();
        }
        result
    }

    /// Releases the subscription. Anything in flight is dropped when it lands. Idempotent.
    pub fn release(&self) {
        let shared = &self.shared;
        if !shared.liveness.release() {
            return;
        }
        log::debug!("Releasing likes of {}", shared.subject_id);
        let subscription = {
            let mut inner = shared.inner.borrow_mut();
            inner.state.clear_listeners();
            inner.subscription.take()
        };
        drop(subscription);
    }

    /// Re-opens the change feed after a [`SyncError::SubscriptionLost`] and refetches.
    pub fn resubscribe(&self) {
        let shared = &self.shared;
        if !shared.liveness.is_alive() {
            return;
        }
        let connected = shared
            .inner
            .borrow()
            .subscription
            .as_ref()
            .is_some_and(Subscription::is_active);
        if connected {
            return;
        }
        shared.open_subscription();
        shared.request_refresh();
    }

    pub fn state(&self) -> ToggleState {
        self.shared.inner.borrow().state.get().clone()
    }

    pub fn register_listener(&self, listener: impl Fn(&ToggleState) + 'static) -> ListenerKey {
        self.shared
            .inner
            .borrow_mut()
            .state
            .register_listener(listener)
    }

    pub fn unregister_listener(&self, key: ListenerKey) {
        self.shared.inner.borrow_mut().state.unregister_listener(key)
    }

    pub fn is_live(&self) -> bool {
        self.shared.liveness.is_alive()
    }

    pub fn discarded_results(&self) -> usize {
        self.shared.liveness.discarded_results()
    }
}

impl<S: BackingStore> Drop for AggregateToggleController<S> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<S: BackingStore> FlushNotifications for Shared<S> {
    fn flush_notifications(&self) {
        // do it like this to avoid holding the borrow while we call the callbacks
        let notifications = self.inner.borrow_mut().state.drain_due_notifications();
        for notification in notifications {
            notification();
        }
    }
}

impl<S: BackingStore> Shared<S> {
    fn edges_filter(&self) -> Filter {
        Filter::eq(&self.config.subject_column, self.subject_id.as_str())
    }

    fn open_subscription(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let subscription = self.store.subscribe(
            &self.config.edges_collection,
            Some(self.edges_filter()),
            Box::new(move |event| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_feed_event(event);
                }
            }),
        );
        let previous = {
            let mut inner = self.inner.borrow_mut();
            inner.feed_lost = None;
            inner.subscription.replace(subscription)
        };
        drop(previous);
    }

    fn on_feed_event(self: &Rc<Self>, event: FeedEvent) {
        match event {
            FeedEvent::Change(kind) => {
                log::debug!("Likes of {} changed ({kind:?})", self.subject_id);
                self.request_refresh();
            }
            FeedEvent::Lost { reason } => {
                if !self.liveness.is_alive() {
                    return;
                }
                log::warn!("Lost change feed for likes of {}: {reason}", self.subject_id);
                let _flusher = FlushLater::new(&**self);
                let dead = {
                    let mut inner = self.inner.borrow_mut();
                    let still_pending = inner.write.is_some();
                    let error =
                        SyncError::subscription_lost(&self.config.edges_collection, &reason);
                    inner.feed_lost = Some(error.clone());
                    inner.state.get_mut().apply_failure(error, still_pending);
                    inner.subscription.take()
                };
                drop(dead);
            }
        }
    }

    fn request_refresh(self: &Rc<Self>) {
        if !self.liveness.is_alive() {
            return;
        }
        if !self.inner.borrow_mut().gate.request() {
            return;
        }

        let this = Rc::clone(self);
        if let Err(e) = self.spawner.spawn_local(this.run_refetches()) {
            log::error!("Could not spawn refetch of likes of {}: {e:?}", self.subject_id);
            self.inner.borrow_mut().gate.reset();
        }
    }

    async fn run_refetches(self: Rc<Self>) {
        loop {
            let epoch = self.inner.borrow_mut().gate.issue();
            let actor = self.store.resolve_actor_identity().await;
            let result = self.fetch_snapshot(actor).await;
            if self.liveness.discard_if_released("edge fetch") {
                return;
            }
            self.apply(epoch, result);
            if !self.inner.borrow_mut().gate.settle() {
                break;
            }
        }
    }

    /// A one-off fetch outside the refetch loop, for when a toggle can't trust the current snapshot.
    async fn load_for(&self, actor: ActorId) -> Result<(), SyncError> {
        let epoch = self.inner.borrow_mut().gate.issue();
        let result = self.fetch_snapshot(Some(actor)).await;
        if self.liveness.discard_if_released("edge fetch") {
            return Err(SyncError::fetch_failed(
                &self.config.edges_collection,
                "controller was released",
            ));
        }
        let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);
        self.apply(epoch, result);
        outcome
    }

    async fn fetch_snapshot(&self, actor: Option<ActorId>) -> Result<EdgeSnapshot, SyncError> {
        let edges = &self.config.edges_collection;
        let query = Query {
            filter: self.edges_filter(),
            order: None,
        };
        let rows = self
            .store
            .fetch_all(edges, &query)
            .await
            .map_err(|e| SyncError::fetch_failed(edges, e))?;

        let is_active = actor.as_ref().is_some_and(|actor| {
            rows.iter()
                .filter_map(|row| MembershipEdge::from_row(row, &self.config))
                .any(|edge| &edge.actor_id == actor)
        });
        Ok(EdgeSnapshot {
            actor,
            count: rows.len() as u64,
            is_active,
        })
    }

    fn apply(&self, epoch: u64, result: Result<EdgeSnapshot, SyncError>) {
        let _flusher = FlushLater::new(self);
        let mut inner = self.inner.borrow_mut();
        if !inner.gate.accept(epoch) {
            log::debug!("Dropping out-of-order fetch of likes of {}", self.subject_id);
            return;
        }

        match result {
            Ok(snapshot) => {
                let confirmed = inner
                    .write
                    .is_some_and(|w| w.confirmed_by(epoch, snapshot.is_active));
                if confirmed {
                    inner.write = None;
                }
                let still_pending = inner.write.is_some();
                inner
                    .state
                    .get_mut()
                    .apply_snapshot(snapshot.count, snapshot.is_active, still_pending);
                inner.state.tracker_mut().mark_loaded();
                inner.snapshot_actor = snapshot.actor;
            }
            Err(e) => {
                log::error!("Failed to refresh likes of {}: {e}", self.subject_id);
                let still_pending = inner.write.is_some();
                inner.state.get_mut().apply_failure(e, still_pending);
            }
        }
        // a fresh snapshot doesn't mean pushes are flowing again
        if let Some(lost) = inner.feed_lost.clone() {
            let still_pending = inner.write.is_some();
            inner.state.get_mut().apply_failure(lost, still_pending);
        }
    }
}
