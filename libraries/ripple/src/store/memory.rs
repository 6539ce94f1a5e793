//! An in-process backing store.
//! Good enough to run the whole sync layer without a server: it keeps rows as JSON, fills in ids and timestamps,
//! enforces unique column sets, and pushes a change event per affected row to every matching subscriber.
//!
//! It can also be told to misbehave (fail fetches or writes, drop subscriptions), and it records every operation
//! so callers can check exactly what was asked of it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::{BackingStore, ChangeKind, FeedEvent, Filter, Query, Subscription};
use crate::data_model::{ActorId, Row};
use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Fetch { collection: String },
    Insert { collection: String },
    Delete { collection: String },
    Update { collection: String },
}

struct Subscriber {
    collection: String,
    filter: Option<Filter>,
    on_event: Rc<dyn Fn(FeedEvent)>,
}

type Subscribers = RefCell<slotmap::SlotMap<slotmap::DefaultKey, Subscriber>>;

#[derive(Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
    unique: HashMap<String, Vec<Vec<String>>>,
    next_row_id: u64,
    actor: Option<ActorId>,
    failing_fetches: usize,
    failing_writes: usize,
    operations: Vec<StoreOp>,
}

#[derive(Default)]
pub struct MemoryStore {
    // btw, we should never hold a borrow of either of these while calling a subscriber
    tables: RefCell<Tables>,
    subscribers: Rc<Subscribers>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects inserts that would duplicate the values of `columns` in an existing row.
    pub fn with_unique(self, collection: &str, columns: &[&str]) -> Self {
        self.tables
            .borrow_mut()
            .unique
            .entry(collection.to_string())
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Inserts rows directly, without notifying anyone. For setting up initial contents.
    pub fn seed(&self, collection: &str, rows: impl IntoIterator<Item = Row>) {
        let mut tables = self.tables.borrow_mut();
        for row in rows {
            let row = tables.complete_row(row);
            tables.rows.entry(collection.to_string()).or_default().push(row);
        }
    }

    pub fn sign_in(&self, actor: ActorId) {
        self.tables.borrow_mut().actor = Some(actor);
    }

    pub fn sign_out(&self) {
        self.tables.borrow_mut().actor = None;
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.tables.borrow_mut().failing_fetches = count;
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.tables.borrow_mut().failing_writes = count;
    }

    pub fn operations(&self) -> Vec<StoreOp> {
        self.tables.borrow().operations.clone()
    }

    pub fn count_operations(&self, matches: impl Fn(&StoreOp) -> bool) -> usize {
        self.tables
            .borrow()
            .operations
            .iter()
            .filter(|op| matches(op))
            .count()
    }

    pub fn rows(&self, collection: &str) -> Vec<Row> {
        self.tables
            .borrow()
            .rows
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn num_subscribers(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Merges `patch` into every matching row, like an edit made by some other client.
    pub fn update(&self, collection: &str, filter: &Filter, patch: Row) -> Result<usize, StoreError> {
        let Some(patch) = patch.as_object() else {
            return Err(StoreError::Malformed("update patch must be an object".to_string()));
        };
        let touched = {
            let mut tables = self.tables.borrow_mut();
            tables.operations.push(StoreOp::Update {
                collection: collection.to_string(),
            });
            tables.take_write_failure()?;

            let mut touched = Vec::new();
            for row in tables.rows.entry(collection.to_string()).or_default() {
                if !filter.matches(row) {
                    continue;
                }
                if let Some(fields) = row.as_object_mut() {
                    for (key, value) in patch {
                        fields.insert(key.clone(), value.clone());
                    }
                }
                touched.push(row.clone());
            }
            touched
        };

        for row in &touched {
            self.notify(collection, row, FeedEvent::Change(ChangeKind::Update));
        }
        Ok(touched.len())
    }

    /// Drops every subscription on `collection` as if the connection died.
    pub fn disconnect(&self, collection: &str, reason: &str) {
        let dropped: Vec<_> = {
            let mut subscribers = self.subscribers.borrow_mut();
            let keys: Vec<_> = subscribers
                .iter()
                .filter(|(_, s)| s.collection == collection)
                .map(|(key, _)| key)
                .collect();
            keys.into_iter()
                .filter_map(|key| subscribers.remove(key))
                .map(|s| s.on_event)
                .collect()
        };
        log::info!(
            "Dropping {} subscription(s) on {collection}: {reason}",
            dropped.len()
        );
        for on_event in dropped {
            on_event(FeedEvent::Lost {
                reason: reason.to_string(),
            });
        }
    }

    fn notify(&self, collection: &str, row: &Row, event: FeedEvent) {
        // do it like this to avoid holding the borrow while we call the callbacks
        let due: Vec<_> = self
            .subscribers
            .borrow()
            .values()
            .filter(|s| s.collection == collection)
            .filter(|s| s.filter.as_ref().is_none_or(|f| f.matches(row)))
            .map(|s| s.on_event.clone())
            .collect();
        for on_event in due {
            on_event(event.clone());
        }
    }
}

impl Tables {
    fn take_fetch_failure(&mut self) -> Result<(), StoreError> {
        if self.failing_fetches > 0 {
            self.failing_fetches -= 1;
            return Err(StoreError::Unavailable("injected fetch failure".to_string()));
        }
        Ok(())
    }

    fn take_write_failure(&mut self) -> Result<(), StoreError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    /// Fills in what the server would: an id and a creation time.
    fn complete_row(&mut self, mut row: Row) -> Row {
        if let Some(fields) = row.as_object_mut() {
            if !fields.contains_key("id") {
                self.next_row_id += 1;
                fields.insert(
                    "id".to_string(),
                    serde_json::Value::String(format!("row-{}", self.next_row_id)),
                );
            }
            if !fields.contains_key("created_at") {
                fields.insert(
                    "created_at".to_string(),
                    serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
                );
            }
        }
        row
    }

    fn check_unique(&self, collection: &str, row: &Row) -> Result<(), StoreError> {
        let Some(constraints) = self.unique.get(collection) else {
            return Ok(());
        };
        let existing = self.rows.get(collection).map(Vec::as_slice).unwrap_or_default();
        for columns in constraints {
            let clash = existing.iter().any(|other| {
                columns
                    .iter()
                    .all(|column| other.get(column) == row.get(column))
            });
            if clash {
                return Err(StoreError::Conflict(format!(
                    "duplicate ({}) in {collection}",
                    columns.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn compare_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> std::cmp::Ordering {
    use serde_json::Value;
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        _ => std::cmp::Ordering::Equal,
    }
}

impl BackingStore for MemoryStore {
    async fn fetch_all(&self, collection: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        let mut tables = self.tables.borrow_mut();
        tables.operations.push(StoreOp::Fetch {
            collection: collection.to_string(),
        });
        tables.take_fetch_failure()?;

        let mut rows: Vec<Row> = tables
            .rows
            .get(collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        Ok(rows)
    }

    async fn insert(&self, collection: &str, record: Row) -> Result<Row, StoreError> {
        if !record.is_object() {
            return Err(StoreError::Malformed(format!(
                "cannot insert a non-object into {collection}"
            )));
        }
        let row = {
            let mut tables = self.tables.borrow_mut();
            tables.operations.push(StoreOp::Insert {
                collection: collection.to_string(),
            });
            tables.take_write_failure()?;
            let row = tables.complete_row(record);
            tables.check_unique(collection, &row)?;
            tables
                .rows
                .entry(collection.to_string())
                .or_default()
                .push(row.clone());
            row
        };

        self.notify(collection, &row, FeedEvent::Change(ChangeKind::Insert));
        Ok(row)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<(), StoreError> {
        let removed = {
            let mut tables = self.tables.borrow_mut();
            tables.operations.push(StoreOp::Delete {
                collection: collection.to_string(),
            });
            tables.take_write_failure()?;
            let rows = tables.rows.entry(collection.to_string()).or_default();
            let (removed, kept): (Vec<Row>, Vec<Row>) =
                rows.drain(..).partition(|row| filter.matches(row));
            *rows = kept;
            removed
        };

        for row in &removed {
            self.notify(collection, row, FeedEvent::Change(ChangeKind::Delete));
        }
        Ok(())
    }

    fn subscribe(
        &self,
        collection: &str,
        filter: Option<Filter>,
        on_event: Box<dyn Fn(FeedEvent)>,
    ) -> Subscription {
        let key = self.subscribers.borrow_mut().insert(Subscriber {
            collection: collection.to_string(),
            filter,
            on_event: Rc::from(on_event),
        });
        log::debug!("Opened subscription on {collection}");

        let subscribers: Weak<Subscribers> = Rc::downgrade(&self.subscribers);
        Subscription::new(move || {
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers.borrow_mut().remove(key);
            }
        })
    }

    async fn resolve_actor_identity(&self) -> Option<ActorId> {
        self.tables.borrow().actor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::cell::RefCell;

    fn recorder() -> (Rc<RefCell<Vec<FeedEvent>>>, Box<dyn Fn(FeedEvent)>) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let events_clone = events.clone();
        (
            events,
            Box::new(move |event| events_clone.borrow_mut().push(event)),
        )
    }

    #[test]
    fn test_insert_fills_id_and_notifies_matching_subscribers() {
        let store = MemoryStore::new();
        let (g1_events, on_g1) = recorder();
        let (g2_events, on_g2) = recorder();
        let _g1 = store.subscribe("game_likes", Some(Filter::eq("game_id", "g1")), on_g1);
        let _g2 = store.subscribe("game_likes", Some(Filter::eq("game_id", "g2")), on_g2);

        let row = block_on(store.insert(
            "game_likes",
            serde_json::json!({ "game_id": "g1", "user_id": "u1" }),
        ))
        .unwrap();

        assert!(row["id"].is_string());
        assert!(row["created_at"].is_string());
        assert_eq!(
            *g1_events.borrow(),
            vec![FeedEvent::Change(ChangeKind::Insert)]
        );
        assert!(g2_events.borrow().is_empty());
    }

    #[test]
    fn test_unique_columns_reject_duplicates() {
        let store = MemoryStore::new().with_unique("game_likes", &["game_id", "user_id"]);
        let edge = serde_json::json!({ "game_id": "g1", "user_id": "u1" });
        block_on(store.insert("game_likes", edge.clone())).unwrap();

        let err = block_on(store.insert("game_likes", edge)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.rows("game_likes").len(), 1);
    }

    #[test]
    fn test_delete_pushes_once_per_removed_row() {
        let store = MemoryStore::new();
        store.seed(
            "game_likes",
            [
                serde_json::json!({ "game_id": "g1", "user_id": "u1" }),
                serde_json::json!({ "game_id": "g1", "user_id": "u2" }),
                serde_json::json!({ "game_id": "g2", "user_id": "u1" }),
            ],
        );
        let (events, on_event) = recorder();
        let _subscription = store.subscribe("game_likes", None, on_event);

        block_on(store.delete("game_likes", &Filter::eq("game_id", "g1"))).unwrap();

        assert_eq!(events.borrow().len(), 2);
        assert_eq!(store.rows("game_likes").len(), 1);
    }

    #[test]
    fn test_fetch_orders_and_filters() {
        let store = MemoryStore::new();
        store.seed(
            "games",
            [
                serde_json::json!({ "id": "a", "owner": "x", "created_at": "2024-01-01T00:00:00Z" }),
                serde_json::json!({ "id": "b", "owner": "x", "created_at": "2024-01-03T00:00:00Z" }),
                serde_json::json!({ "id": "c", "owner": "y", "created_at": "2024-01-02T00:00:00Z" }),
            ],
        );
        let query = Query {
            filter: Filter::eq("owner", "x"),
            order: Some(super::super::OrderBy::descending("created_at")),
        };
        let rows = block_on(store.fetch_all("games", &query)).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_unsubscribed_callbacks_stop_hearing() {
        let store = MemoryStore::new();
        let (events, on_event) = recorder();
        let mut subscription = store.subscribe("games", None, on_event);
        assert_eq!(store.num_subscribers(), 1);

        subscription.unsubscribe();
        block_on(store.insert("games", serde_json::json!({ "title": "t" }))).unwrap();

        assert_eq!(store.num_subscribers(), 0);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_disconnect_reports_loss_and_forgets_subscribers() {
        let store = MemoryStore::new();
        let (events, on_event) = recorder();
        let _subscription = store.subscribe("games", None, on_event);

        store.disconnect("games", "socket closed");

        assert_eq!(
            *events.borrow(),
            vec![FeedEvent::Lost {
                reason: "socket closed".to_string()
            }]
        );
        assert_eq!(store.num_subscribers(), 0);
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_fetches(1);
        assert!(block_on(store.fetch_all("games", &Query::default())).is_err());
        assert!(block_on(store.fetch_all("games", &Query::default())).is_ok());

        store.fail_next_writes(1);
        assert!(block_on(store.insert("games", serde_json::json!({}))).is_err());
        assert!(store.rows("games").is_empty());
        assert_eq!(
            store.count_operations(|op| matches!(op, StoreOp::Insert { .. })),
            1
        );
    }

    #[test]
    fn test_update_merges_patch_and_notifies() {
        let store = MemoryStore::new();
        store.seed("games", [serde_json::json!({ "id": "a", "title": "old" })]);
        let (events, on_event) = recorder();
        let _subscription = store.subscribe("games", None, on_event);

        let touched = store
            .update("games", &Filter::eq("id", "a"), serde_json::json!({ "title": "new" }))
            .unwrap();

        assert_eq!(touched, 1);
        assert_eq!(store.rows("games")[0]["title"], "new");
        assert_eq!(
            *events.borrow(),
            vec![FeedEvent::Change(ChangeKind::Update)]
        );
    }
}
