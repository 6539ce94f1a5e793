//! The seam between the sync components and whatever actually stores rows.
//!
//! A backing store offers four things over named collections: fetch everything matching a query,
//! insert a row, delete matching rows, and push a notification when anything matching a filter changes.
//! It also knows who the current actor is. Auth, transport, timeouts and retries are its business, not ours.

use std::future::Future;

use crate::data_model::{ActorId, Row};
use crate::error::StoreError;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

#[cfg(any(test, feature = "memory"))]
pub use memory::{MemoryStore, StoreOp};

/// A conjunction of `column = value` conditions. The empty filter matches every row.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Filter {
    pub eq: Vec<(String, serde_json::Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: &str, value: impl Into<serde_json::Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    pub fn and_eq(mut self, column: &str, value: impl Into<serde_json::Value>) -> Self {
        self.eq.push((column.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.eq.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.eq
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn descending(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Query {
    pub filter: Filter,
    pub order: Option<OrderBy>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// What a subscription hears from the store.
///
/// Changes deliberately carry no row: consumers refetch instead of patching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedEvent {
    Change(ChangeKind),
    /// The transport dropped the subscription. No more events will arrive on it.
    Lost { reason: String },
}

/// A standing watch on a collection, released exactly once.
///
/// Dropping a subscription releases it, so whoever holds it owns it.
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A subscription that was never connected (or is already gone).
    pub fn closed() -> Self {
        Self { release: None }
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    /// Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

pub trait BackingStore: 'static {
    fn fetch_all(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Row>, StoreError>>;

    /// Returns the row as stored, including anything the store filled in (ids, timestamps).
    fn insert(&self, collection: &str, record: Row) -> impl Future<Output = Result<Row, StoreError>>;

    fn delete(&self, collection: &str, filter: &Filter) -> impl Future<Output = Result<(), StoreError>>;

    /// `on_event` may be called at any time until the subscription is released.
    /// It should not call back into the store synchronously.
    fn subscribe(
        &self,
        collection: &str,
        filter: Option<Filter>,
        on_event: Box<dyn Fn(FeedEvent)>,
    ) -> Subscription;

    /// None when nobody is signed in.
    fn resolve_actor_identity(&self) -> impl Future<Output = Option<ActorId>>;
}
