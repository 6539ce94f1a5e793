#[path = "1-record.rs"]
mod record;

#[path = "2-game.rs"]
mod game;

#[path = "3-membership.rs"]
mod membership;

#[path = "4-snapshot.rs"]
mod snapshot;

#[path = "5-dirty-tracker.rs"]
mod dirty_tracker;

#[path = "6-observable.rs"]
mod observable;

pub use dirty_tracker::*;
pub use game::*;
pub use membership::*;
pub use observable::*;
pub use record::*;
pub use snapshot::*;

#[cfg_attr(target_arch = "wasm32", wasm_bindgen::prelude::wasm_bindgen)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ListenerKey(pub(crate) slotmap::DefaultKey);
