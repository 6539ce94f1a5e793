//! # Observable
//! Component state plus the UI callbacks that want to hear about it.
//!
//! Listeners are never invoked while the owner's `RefCell` is borrowed: the owner drains due notifications
//! into closures, drops its borrow, and only then runs them. A listener is therefore free to call back into
//! the component (to read state, or even to `stop` it).

use std::rc::Rc;

use super::{DirtyOnDerefMut, DirtyTracker, ListenerKey};

pub struct Observable<State> {
    tracker: DirtyTracker<State>,
    listeners: slotmap::SlotMap<slotmap::DefaultKey, Rc<dyn Fn(&State)>>,
}

impl<State: Clone + 'static> Observable<State> {
    pub fn new(state: State) -> Self {
        Self {
            tracker: DirtyTracker::new(state),
            listeners: Default::default(),
        }
    }

    pub fn get(&self) -> &State {
        self.tracker.get()
    }

    pub fn get_mut(&mut self) -> DirtyOnDerefMut<'_, State> {
        self.tracker.get_mut()
    }

    pub fn tracker_mut(&mut self) -> &mut DirtyTracker<State> {
        &mut self.tracker
    }

    pub fn loaded_at_least_once(&self) -> bool {
        self.tracker.loaded_at_least_once()
    }

    /// The listener is invoked with a copy of the state every time it changes.
    pub fn register_listener(&mut self, listener: impl Fn(&State) + 'static) -> ListenerKey {
        let key = self.listeners.insert(Rc::new(listener));
        ListenerKey(key)
    }

    pub fn unregister_listener(&mut self, key: ListenerKey) {
        self.listeners.remove(key.0);
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    pub fn drain_due_notifications(&mut self) -> Vec<Box<dyn FnOnce()>> {
        if !self.tracker.take_dirty() {
            return Vec::new();
        }

        let snapshot = Rc::new(self.tracker.get().clone());
        let mut notifications: Vec<Box<dyn FnOnce()>> = Vec::new();
        for (_, listener) in self.listeners.iter() {
            let listener = listener.clone();
            let snapshot = snapshot.clone();
            notifications.push(Box::new(move || listener(&snapshot)));
        }
        notifications
    }
}

/// Something that owns an [`Observable`] behind a `RefCell` and knows how to flush it safely.
pub trait FlushNotifications {
    fn flush_notifications(&self);
}

/// A simple struct that flushes listeners when dropped. This is useful if you want to ensure you don't forget to flush listeners, regardless of the code path a function takes.
pub struct FlushLater<'a, F: FlushNotifications + ?Sized> {
    owner: &'a F,
}

impl<'a, F: FlushNotifications + ?Sized> FlushLater<'a, F> {
    pub fn new(owner: &'a F) -> Self {
        Self { owner }
    }
}

impl<F: FlushNotifications + ?Sized> Drop for FlushLater<'_, F> {
    fn drop(&mut self) {
        self.owner.flush_notifications();
    }
}
