//! This is a library for keeping a local view of a remote collection live.
//! It was created for a game listing site, so it doesn't include much that was not needed for that project.
//!
//! Syncing strategy:
//! 1. A component (a [`CollectionSynchronizer`] or an [`AggregateToggleController`]) does one full fetch of the rows it cares about.
//! 2. It then subscribes to the remote store's change feed for those rows. Pushes don't carry data we trust, they only say "something changed".
//! 3. On every push, the component re-fetches everything and replaces its snapshot wholesale. There is no patching, so there is nothing to merge.
//! 4. Pushes that arrive while a refetch is in flight are collapsed into exactly one trailing refetch.
//!
//! Writes (like inserting or deleting a "like" edge) go straight to the store. The component doesn't pretend the write
//! happened until a refetch shows it did.
//!
//! Everything here is single-threaded: state lives in `Rc<RefCell<_>>`, background work is spawned on a [`Spawner`],
//! and no borrow is ever held across an `.await`.

pub mod config;
pub mod data_model;
pub mod error;
pub mod refetch;
pub mod store;
pub mod synchronizer;
pub mod toggle;

#[cfg(test)]
mod test_support;

use std::rc::Rc;

pub use config::SyncConfig;
pub use error::{ErrorKind, StoreError, SyncError};
pub use synchronizer::{CollectionState, CollectionSynchronizer};
pub use toggle::{AggregateToggleController, TogglePhase, ToggleState};

/// Where components spawn their background refetches.
/// In the browser this wraps `wasm_bindgen_futures::spawn_local`; in tests it's a `LocalPool` spawner.
pub type Spawner = Rc<dyn futures::task::LocalSpawn>;
