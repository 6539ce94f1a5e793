mod js_store;
mod spawner;
mod utils;

use std::rc::Rc;
use std::sync::LazyLock;

use ripple::data_model::{Game, ListenerKey, NewGame};
use ripple::{AggregateToggleController, CollectionSynchronizer, Spawner, SyncConfig, SyncError};
use serde::Serialize;
use wasm_bindgen::prelude::*;

pub use js_store::{JsBackingStore, JsStore};
pub use spawner::WasmSpawner;

/// Entry point for the UI. Hands out live views of the game list and of individual games' likes.
#[wasm_bindgen]
pub struct GameShelf {
    store: Rc<JsBackingStore>,
    spawner: Spawner,
    config: SyncConfig,
}

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
#[allow(clippy::declare_interior_mutable_const)]
const LOGGER: LazyLock<()> = LazyLock::new(|| {
    utils::set_panic_hook();

    wasm_logger::init(wasm_logger::Config::default());
    log::info!("Logging initialized");
});

fn to_js<T: Serialize + ?Sized>(value: &T) -> JsValue {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .unwrap_or_else(|e| JsValue::from_str(&format!("Serialization error: {e:?}")))
}

fn sync_error_to_js(error: SyncError) -> JsValue {
    to_js(&error)
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl GameShelf {
    /// `config` optionally overrides collection and column names, e.g. `{ itemsCollection: "games" }`.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen(constructor))]
    pub fn new(store: JsStore, config: JsValue) -> Result<GameShelf, JsValue> {
        // used to only initialize the logger once
        #[allow(clippy::borrow_interior_mutable_const)]
        *LOGGER;

        let config = if config.is_undefined() || config.is_null() {
            SyncConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)
                .inspect_err(|e| log::error!("Invalid sync config: {e:?}"))
                .map_err(|e| JsValue::from_str(&format!("Invalid sync config: {e}")))?
        };

        Ok(Self {
            store: Rc::new(JsBackingStore::new(store)),
            spawner: Rc::new(WasmSpawner),
            config,
        })
    }

    /// Starts mirroring the game list. `on_change` gets `{ loading, items, error }` every time it changes.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn games(&self, on_change: js_sys::Function) -> GamesHandle {
        let sync = CollectionSynchronizer::new(self.store.clone(), self.spawner.clone(), &self.config);
        sync.register_listener(move |state| {
            let _ = on_change.call1(&JsValue::NULL, &to_js(state));
        });
        sync.start();
        GamesHandle {
            sync: Rc::new(sync),
        }
    }

    /// Starts watching the likes of one game. `on_change` gets `{ count, isActive, phase, error }`.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn likes(&self, game_id: String, on_change: js_sys::Function) -> LikesHandle {
        let controller = AggregateToggleController::observe(
            self.store.clone(),
            self.spawner.clone(),
            &self.config,
            game_id,
        );
        controller.register_listener(move |state| {
            let _ = on_change.call1(&JsValue::NULL, &to_js(state));
        });
        LikesHandle {
            controller: Rc::new(controller),
        }
    }
}

/// A live game list. Stops syncing when freed.
#[wasm_bindgen]
pub struct GamesHandle {
    sync: Rc<CollectionSynchronizer<JsBackingStore, Game>>,
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl GamesHandle {
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn state(&self) -> JsValue {
        to_js(&self.sync.state())
    }

    /// Resolves with the stored game. The list picks it up through the change feed.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen(js_name = addGame))]
    pub async fn add_game(&self, game: NewGame) -> Result<Game, JsValue> {
        let sync = self.sync.clone();
        sync.add_item(&game).await.map_err(sync_error_to_js)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn subscribe(&self, callback: js_sys::Function) -> ListenerKey {
        self.sync.register_listener(move |state| {
            let _ = callback.call1(&JsValue::NULL, &to_js(state));
        })
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn unsubscribe(&self, key: ListenerKey) {
        self.sync.unregister_listener(key)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn resubscribe(&self) {
        self.sync.resubscribe()
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn stop(&self) {
        self.sync.stop()
    }
}

/// Like count and like button state for one game. Stops syncing when freed.
#[wasm_bindgen]
pub struct LikesHandle {
    controller: Rc<AggregateToggleController<JsBackingStore>>,
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl LikesHandle {
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn state(&self) -> JsValue {
        to_js(&self.controller.state())
    }

    /// Rejects with `{ kind: "unauthenticated" }` when nobody is signed in, and with
    /// `{ kind: "toggleInProgress" }` while the previous toggle is still unconfirmed.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn toggle(&self) -> Result<(), JsValue> {
        let controller = self.controller.clone();
        controller.toggle().await.map_err(sync_error_to_js)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn subscribe(&self, callback: js_sys::Function) -> ListenerKey {
        self.controller.register_listener(move |state| {
            let _ = callback.call1(&JsValue::NULL, &to_js(state));
        })
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn unsubscribe(&self, key: ListenerKey) {
        self.controller.unregister_listener(key)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn resubscribe(&self) {
        self.controller.resubscribe()
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn release(&self) {
        self.controller.release()
    }
}
