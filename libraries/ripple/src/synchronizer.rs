//! # CollectionSynchronizer
//! Keeps a local, ordered copy of a whole collection, re-fetched in full whenever the store says it changed.
//!
//! Lifecycle: `new` → `start` (load + subscribe) → any number of pushes → `stop` (or drop).
//! The cache is only ever replaced by a complete, successfully decoded fetch. If a fetch fails, the previous
//! snapshot stays up with `error` set next to it, and the next push gets another chance to recover.

use std::cell::RefCell;
use std::rc::Rc;

use futures::task::LocalSpawnExt;

use crate::Spawner;
use crate::config::SyncConfig;
use crate::data_model::{
    FlushLater, FlushNotifications, ListenerKey, Observable, Record, Row, decode_snapshot,
};
use crate::error::{StoreError, SyncError};
use crate::refetch::{Liveness, RefetchGate};
use crate::store::{BackingStore, FeedEvent, Filter, OrderBy, Query, Subscription};

/// What the UI renders.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct CollectionState<T: Clone> {
    pub loading: bool,
    /// Newest first.
    pub items: im::Vector<T>,
    pub error: Option<SyncError>,
}

impl<T: Clone> Default for CollectionState<T> {
    fn default() -> Self {
        Self {
            loading: false,
            items: im::Vector::new(),
            error: None,
        }
    }
}

impl<T: Clone> CollectionState<T> {
    fn begin_load(&mut self) {
        self.loading = true;
        self.items = im::Vector::new();
        self.error = None;
    }

    fn replace(&mut self, items: im::Vector<T>) {
        self.loading = false;
        self.items = items;
        self.error = None;
    }

    /// Keeps whatever items we had.
    fn fail(&mut self, error: SyncError) {
        self.loading = false;
        self.error = Some(error);
    }
}

/// A live, newest-first mirror of one collection.
pub struct CollectionSynchronizer<S: BackingStore, T: Record + 'static> {
    shared: Rc<Shared<S, T>>,
}

struct Shared<S: BackingStore, T: Record + 'static> {
    store: Rc<S>,
    spawner: Spawner,
    collection: String,
    query: Query,
    liveness: Liveness,
    // never hold a borrow of this across an .await
    inner: RefCell<Inner<T>>,
}

struct Inner<T: Record + 'static> {
    state: Observable<CollectionState<T>>,
    gate: RefetchGate,
    subscription: Option<Subscription>,
    /// Set while the change feed is down. Outlives any snapshot applied in the meantime.
    feed_lost: Option<SyncError>,
    started: bool,
}

impl<S: BackingStore, T: Record + 'static> CollectionSynchronizer<S, T> {
    pub fn new(store: Rc<S>, spawner: Spawner, config: &SyncConfig) -> Self {
        let shared = Shared {
            store,
            spawner,
            collection: config.items_collection.clone(),
            query: Query {
                filter: Filter::all(),
                order: Some(OrderBy::descending(&config.order_column)),
            },
            liveness: Liveness::default(),
            inner: RefCell::new(Inner {
                state: Observable::new(CollectionState::default()),
                gate: RefetchGate::default(),
                subscription: None,
                feed_lost: None,
                started: false,
            }),
        };
        Self {
            shared: Rc::new(shared),
        }
    }

    /// Begins the initial load and opens the change feed. Only the first call does anything.
    pub fn start(&self) {
        let shared = &self.shared;
        if !shared.liveness.is_alive() {
            log::warn!("Ignoring start() on stopped sync of {}", shared.collection);
            return;
        }
        {
            let _flusher = FlushLater::new(&**shared);
            let mut inner = shared.inner.borrow_mut();
            if inner.started {
                log::warn!("Sync of {} already started", shared.collection);
                return;
            }
            inner.started = true;
            inner.state.get_mut().begin_load();
        }

        // Subscribe before the first fetch lands, so a change made in between still triggers a refetch.
        shared.open_subscription();
        shared.request_refresh();
    }

    /// Releases the subscription. Anything still in flight is dropped when it lands. Idempotent.
    pub fn stop(&self) {
        let shared = &self.shared;
        if !shared.liveness.release() {
            return;
        }
        log::info!("Stopping sync of {}", shared.collection);
        let subscription = {
            let mut inner = shared.inner.borrow_mut();
            inner.state.clear_listeners();
            inner.subscription.take()
        };
        drop(subscription);
    }

    /// Re-opens the change feed after a [`SyncError::SubscriptionLost`] and refetches whatever we missed.
    /// Deciding *when* to call this (backoff, online events, ...) is up to the caller.
    pub fn resubscribe(&self) {
        let shared = &self.shared;
        if !shared.liveness.is_alive() {
            return;
        }
        {
            let inner = shared.inner.borrow();
            if !inner.started {
                log::warn!("resubscribe() before start() on {}", shared.collection);
                return;
            }
            if inner.subscription.as_ref().is_some_and(Subscription::is_active) {
                return;
            }
        }
        shared.open_subscription();
        shared.request_refresh();
    }

    pub fn state(&self) -> CollectionState<T> {
        self.shared.inner.borrow().state.get().clone()
    }

    pub fn register_listener(
        &self,
        listener: impl Fn(&CollectionState<T>) + 'static,
    ) -> ListenerKey {
        self.shared
            .inner
            .borrow_mut()
            .state
            .register_listener(listener)
    }

    pub fn unregister_listener(&self, key: ListenerKey) {
        self.shared.inner.borrow_mut().state.unregister_listener(key)
    }

    /// Inserts a new item. The cache isn't touched here: the insert's own push brings it in.
    pub async fn add_item<N: serde::Serialize>(&self, new_item: &N) -> Result<T, SyncError> {
        let collection = self.shared.collection.as_str();
        let row = serde_json::to_value(new_item)
            .map_err(|e| SyncError::write_failed(collection, e))?;
        let stored = self
            .shared
            .store
            .insert(collection, row)
            .await
            .inspect_err(|e| log::error!("Error inserting into {collection}: {e:?}"))
            .map_err(|e| SyncError::write_failed(collection, e))?;
        T::from_row(&stored).map_err(|e| SyncError::write_failed(collection, e))
    }

    pub fn is_live(&self) -> bool {
        self.shared.liveness.is_alive()
    }

    /// Fetch results that arrived after `stop` and were thrown away.
    pub fn discarded_results(&self) -> usize {
        self.shared.liveness.discarded_results()
    }
}

impl<S: BackingStore, T: Record + 'static> Drop for CollectionSynchronizer<S, T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S: BackingStore, T: Record + 'static> FlushNotifications for Shared<S, T> {
    fn flush_notifications(&self) {
        // do it like this to avoid holding the borrow while we call the callbacks
        let notifications = self.inner.borrow_mut().state.drain_due_notifications();
        for notification in notifications {
            notification();
        }
    }
}

impl<S: BackingStore, T: Record + 'static> Shared<S, T> {
    fn open_subscription(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let subscription = self.store.subscribe(
            &self.collection,
            None,
            Box::new(move |event| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_feed_event(event);
                }
            }),
        );
        log::info!("Subscribed to changes on {}", self.collection);
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
                log::debug!("{} changed ({kind:?})", self.collection);
                self.request_refresh();
            }
            FeedEvent::Lost { reason } => self.on_subscription_lost(&reason),
        }
    }

    fn on_subscription_lost(&self, reason: &str) {
        if !self.liveness.is_alive() {
            return;
        }
        log::warn!("Lost change feed for {}: {reason}", self.collection);
        let _flusher = FlushLater::new(self);
        let dead = {
            let mut inner = self.inner.borrow_mut();
            let lost = SyncError::subscription_lost(&self.collection, reason);
            inner.feed_lost = Some(lost.clone());
            inner.state.get_mut().error = Some(lost);
            inner.subscription.take()
        };
        drop(dead);
    }

    fn request_refresh(self: &Rc<Self>) {
        if !self.liveness.is_alive() {
            return;
        }
        if !self.inner.borrow_mut().gate.request() {
            log::debug!("Refetch of {} already in flight, coalescing", self.collection);
            return;
        }

        let this = Rc::clone(self);
        if let Err(e) = self.spawner.spawn_local(this.run_refetches()) {
            log::error!("Could not spawn refetch of {}: {e:?}", self.collection);
            self.inner.borrow_mut().gate.reset();
        }
    }

    async fn run_refetches(self: Rc<Self>) {
        loop {
            let epoch = self.inner.borrow_mut().gate.issue();
            let result = self.store.fetch_all(&self.collection, &self.query).await;
            if self.liveness.discard_if_released("collection fetch") {
                return;
            }
            self.apply(epoch, result);
            if !self.inner.borrow_mut().gate.settle() {
                break;
            }
        }
    }

    fn apply(&self, epoch: u64, result: Result<Vec<Row>, StoreError>) {
        let _flusher = FlushLater::new(self);
        let mut inner = self.inner.borrow_mut();
        if !inner.gate.accept(epoch) {
            log::debug!("Dropping out-of-order fetch of {}", self.collection);
            return;
        }

        let snapshot = result
            .map_err(|e| SyncError::fetch_failed(&self.collection, e))
            .and_then(|rows| {
                decode_snapshot::<T>(&rows).map_err(|e| SyncError::fetch_failed(&self.collection, e))
            });
        match snapshot {
            Ok(items) => {
                log::debug!("Loaded {} rows of {}", items.len(), self.collection);
                inner.state.get_mut().replace(items);
            }
            Err(e) => {
                log::error!("Keeping previous snapshot of {}: {e}", self.collection);
                inner.state.get_mut().fail(e);
            }
        }
        // a fresh snapshot doesn't mean pushes are flowing again
        if let Some(lost) = inner.feed_lost.clone() {
            inner.state.get_mut().error = Some(lost);
        }
    }
}
