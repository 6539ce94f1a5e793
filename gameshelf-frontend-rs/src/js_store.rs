//! The backing store as seen from the browser: a JS object that wraps the hosted client.
//!
//! The JS side is expected to look like this:
//!
//! ```ts
//! interface JsStore {
//!   fetchAll(collection: string, query: { filter: { eq: [string, unknown][] }, order?: { column: string, ascending: boolean } }): Promise<object[]>;
//!   insert(collection: string, row: object): Promise<object>;
//!   delete(collection: string, filter: { eq: [string, unknown][] }): Promise<void>;
//!   // `filter` is a realtime filter string like "game_id=eq.123"; returns an unsubscribe function
//!   subscribe(collection: string, filter: string | undefined, onEvent: (payload: { eventType?: string, status?: string, reason?: string }) => void): () => void;
//!   resolveActorIdentity(): Promise<string | null>;
//! }
//! ```

use ripple::StoreError;
use ripple::data_model::{ActorId, Row};
use ripple::store::{BackingStore, ChangeKind, FeedEvent, Filter, Query, Subscription};
use serde::Serialize;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    pub type JsStore;

    #[wasm_bindgen(method, catch, js_name = fetchAll)]
    async fn fetch_all(this: &JsStore, collection: &str, query: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, catch)]
    async fn insert(this: &JsStore, collection: &str, row: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, catch)]
    async fn delete(this: &JsStore, collection: &str, filter: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method)]
    fn subscribe(
        this: &JsStore,
        collection: &str,
        filter: Option<String>,
        on_event: &js_sys::Function,
    ) -> js_sys::Function;

    #[wasm_bindgen(method, catch, js_name = resolveActorIdentity)]
    async fn resolve_actor_identity(this: &JsStore) -> Result<JsValue, JsValue>;
}

pub struct JsBackingStore {
    js: JsStore,
}

impl JsBackingStore {
    pub fn new(js: JsStore) -> Self {
        Self { js }
    }
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, StoreError> {
    // plain objects rather than `Map`s, since that's what the JS client expects
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| StoreError::Malformed(e.to_string()))
}

fn from_js<T: serde::de::DeserializeOwned>(value: JsValue) -> Result<T, StoreError> {
    serde_wasm_bindgen::from_value(value).map_err(|e| StoreError::Malformed(e.to_string()))
}

fn unavailable(error: JsValue) -> StoreError {
    StoreError::Unavailable(format!("{error:?}"))
}

impl BackingStore for JsBackingStore {
    async fn fetch_all(&self, collection: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        let rows = self
            .js
            .fetch_all(collection, to_js(query)?)
            .await
            .map_err(unavailable)?;
        from_js(rows)
    }

    async fn insert(&self, collection: &str, record: Row) -> Result<Row, StoreError> {
        let stored = self
            .js
            .insert(collection, to_js(&record)?)
            .await
            .map_err(unavailable)?;
        from_js(stored)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<(), StoreError> {
        self.js
            .delete(collection, to_js(filter)?)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    fn subscribe(
        &self,
        collection: &str,
        filter: Option<Filter>,
        on_event: Box<dyn Fn(FeedEvent)>,
    ) -> Subscription {
        let name = collection.to_string();
        let callback = Closure::<dyn Fn(JsValue)>::new(move |payload: JsValue| {
            match serde_wasm_bindgen::from_value::<RealtimePayload>(payload) {
                Ok(payload) => {
                    if let Some(event) = payload.into_feed_event() {
                        on_event(event);
                    }
                }
                Err(e) => log::warn!("Ignoring unreadable realtime payload on {name}: {e}"),
            }
        });
        let unsubscribe = self.js.subscribe(
            collection,
            filter.as_ref().and_then(realtime_filter),
            callback.as_ref().unchecked_ref(),
        );

        // the closure has to outlive the JS subscription, so it's dropped along with it
        Subscription::new(move || {
            if let Err(e) = unsubscribe.call0(&JsValue::NULL) {
                log::warn!("Error unsubscribing: {e:?}");
            }
            drop(callback);
        })
    }

    async fn resolve_actor_identity(&self) -> Option<ActorId> {
        match self.js.resolve_actor_identity().await {
            Ok(value) => value.as_string().map(ActorId),
            Err(e) => {
                log::error!("Error resolving current user: {e:?}");
                None
            }
        }
    }
}

/// What the JS side forwards from the realtime channel: either a row change or a channel status.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RealtimePayload {
    #[serde(default)]
    event_type: Option<ChangeKind>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl RealtimePayload {
    fn into_feed_event(self) -> Option<FeedEvent> {
        if let Some(kind) = self.event_type {
            return Some(FeedEvent::Change(kind));
        }
        match self.status.as_deref() {
            Some(status @ ("CHANNEL_ERROR" | "TIMED_OUT" | "CLOSED")) => Some(FeedEvent::Lost {
                reason: self.reason.unwrap_or_else(|| status.to_lowercase()),
            }),
            // SUBSCRIBED and friends
            _ => None,
        }
    }
}

/// Realtime filters only support `column=eq.value`, joined by commas.
fn realtime_filter(filter: &Filter) -> Option<String> {
    if filter.is_empty() {
        return None;
    }
    let conditions: Vec<String> = filter
        .eq
        .iter()
        .map(|(column, value)| match value {
            serde_json::Value::String(s) => format!("{column}=eq.{s}"),
            other => format!("{column}=eq.{other}"),
        })
        .collect();
    Some(conditions.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: serde_json::Value) -> RealtimePayload {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_row_changes_become_change_events() {
        assert_eq!(
            payload(serde_json::json!({ "eventType": "DELETE" })).into_feed_event(),
            Some(FeedEvent::Change(ChangeKind::Delete))
        );
    }

    #[test]
    fn test_channel_failures_become_lost_events() {
        assert_eq!(
            payload(serde_json::json!({ "status": "TIMED_OUT" })).into_feed_event(),
            Some(FeedEvent::Lost {
                reason: "timed_out".to_string()
            })
        );
        assert_eq!(
            payload(serde_json::json!({ "status": "CHANNEL_ERROR", "reason": "jwt expired" }))
                .into_feed_event(),
            Some(FeedEvent::Lost {
                reason: "jwt expired".to_string()
            })
        );
        assert_eq!(
            payload(serde_json::json!({ "status": "SUBSCRIBED" })).into_feed_event(),
            None
        );
    }

    #[test]
    fn test_realtime_filter_format() {
        assert_eq!(realtime_filter(&Filter::all()), None);
        assert_eq!(
            realtime_filter(&Filter::eq("game_id", "g1")),
            Some("game_id=eq.g1".to_string())
        );
        assert_eq!(
            realtime_filter(&Filter::eq("game_id", "g1").and_eq("rank", 3)),
            Some("game_id=eq.g1,rank=eq.3".to_string())
        );
    }
}
