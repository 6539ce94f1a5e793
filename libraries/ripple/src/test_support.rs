//! Helpers for driving components by hand in unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;

use crate::Spawner;
use crate::data_model::{ActorId, Row};
use crate::error::StoreError;
use crate::store::{BackingStore, FeedEvent, Filter, MemoryStore, Query, Subscription};

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn game_row(id: &str, created_at: &str) -> Row {
    serde_json::json!({
        "id": id,
        "title": format!("Game {id}"),
        "description": "",
        "game_url": format!("https://example.com/{id}"),
        "youtube_url": null,
        "thumbnail_url": null,
        "author_id": "author",
        "author_username": "author",
        "created_at": created_at,
        "likes_count": 0,
        "views_count": 0,
    })
}

pub(crate) fn like_row(game_id: &str, user_id: &str) -> Row {
    serde_json::json!({ "game_id": game_id, "user_id": user_id })
}

/// A local executor we can step through.
pub(crate) struct Harness {
    pub pool: LocalPool,
    pub spawner: Spawner,
}

impl Harness {
    pub fn new() -> Self {
        init_logging();
        let pool = LocalPool::new();
        let spawner: Spawner = Rc::new(pool.spawner());
        Self { pool, spawner }
    }

    /// Runs every spawned task until none can make progress.
    pub fn settle(&mut self) {
        self.pool.run_until_stalled();
    }

    pub fn block_on<F: Future>(&mut self, future: F) -> F::Output {
        self.pool.run_until(future)
    }

    /// Spawns `future` and hands back a slot that is filled once it completes.
    pub fn spawn<T: 'static>(
        &self,
        future: impl Future<Output = T> + 'static,
    ) -> Rc<RefCell<Option<T>>> {
        let slot = Rc::new(RefCell::new(None));
        let slot_clone = slot.clone();
        self.spawner
            .spawn_local(async move {
                let output = future.await;
                *slot_clone.borrow_mut() = Some(output);
            })
            .expect("pool is alive");
        slot
    }
}

/// A [`MemoryStore`] whose fetches and identity lookups can be parked until the test lets them through.
///
/// A parked fetch reads the underlying store when it's released, not when it was started.
pub(crate) struct GatedStore {
    pub inner: MemoryStore,
    hold_fetches: Cell<bool>,
    parked_fetches: RefCell<VecDeque<oneshot::Sender<()>>>,
    fetches_started: Cell<usize>,
    hold_identity: Cell<bool>,
    parked_identity: RefCell<Vec<oneshot::Sender<()>>>,
}

impl GatedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            hold_fetches: Cell::new(false),
            parked_fetches: RefCell::new(VecDeque::new()),
            fetches_started: Cell::new(0),
            hold_identity: Cell::new(false),
            parked_identity: RefCell::new(Vec::new()),
        }
    }

    pub fn hold_fetches(&self) {
        self.hold_fetches.set(true);
    }

    /// Lets the oldest parked fetch through. Later fetches are still held.
    pub fn release_next_fetch(&self) -> bool {
        let next = self.parked_fetches.borrow_mut().pop_front();
        match next {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Lets the most recently parked fetch through, overtaking older ones.
    pub fn release_newest_fetch(&self) -> bool {
        let newest = self.parked_fetches.borrow_mut().pop_back();
        match newest {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Stops holding, and lets every parked fetch through.
    pub fn release_fetches(&self) {
        self.hold_fetches.set(false);
        while self.release_next_fetch() {}
    }

    pub fn parked_fetches(&self) -> usize {
        self.parked_fetches.borrow().len()
    }

    pub fn fetches_started(&self) -> usize {
        self.fetches_started.get()
    }

    pub fn hold_identity(&self) {
        self.hold_identity.set(true);
    }

    pub fn release_identity(&self) {
        self.hold_identity.set(false);
        let parked = std::mem::take(&mut *self.parked_identity.borrow_mut());
        for tx in parked {
            let _ = tx.send(());
        }
    }
}

impl BackingStore for GatedStore {
    async fn fetch_all(&self, collection: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.fetches_started.set(self.fetches_started.get() + 1);
        if self.hold_fetches.get() {
            let (tx, rx) = oneshot::channel();
            self.parked_fetches.borrow_mut().push_back(tx);
            let _ = rx.await;
        }
        self.inner.fetch_all(collection, query).await
    }

    async fn insert(&self, collection: &str, record: Row) -> Result<Row, StoreError> {
        self.inner.insert(collection, record).await
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<(), StoreError> {
        self.inner.delete(collection, filter).await
    }

    fn subscribe(
        &self,
        collection: &str,
        filter: Option<Filter>,
        on_event: Box<dyn Fn(FeedEvent)>,
    ) -> Subscription {
        self.inner.subscribe(collection, filter, on_event)
    }

    async fn resolve_actor_identity(&self) -> Option<ActorId> {
        if self.hold_identity.get() {
            let (tx, rx) = oneshot::channel();
            self.parked_identity.borrow_mut().push(tx);
            let _ = rx.await;
        }
        self.inner.resolve_actor_identity().await
    }
}
