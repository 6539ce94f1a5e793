//! # DirtyTracker
//! A DirtyTracker is a wrapper around any type, that adds a "dirty" flag. This is used to track whether component state has changed
//! since listeners were last told about it, so the UI only re-renders when there is something new to show.

use std::ops::{Deref, DerefMut};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirtyState {
    /// Not dirty, no pending notifications
    Clean,
    /// Dirty, notify all listeners
    Dirty,
}

#[derive(Clone, Debug)]
pub struct DirtyTracker<State> {
    state: State,
    /// Tracks whether there are pending notifications
    pub dirty_state: DirtyState,
    loaded_at_least_once: bool,
}

impl<State> DirtyTracker<State> {
    pub fn new(state: State) -> Self {
        Self {
            state,
            // Mounting a component is an action that warrants a notification.
            dirty_state: DirtyState::Dirty,
            loaded_at_least_once: false,
        }
    }
}

/// Smart pointer that marks the state as dirty when dereferenced mutably
pub struct DirtyOnDerefMut<'a, State> {
    state: &'a mut State,
    dirty_state: &'a mut DirtyState,
}

impl<State> Deref for DirtyOnDerefMut<'_, State> {
    type Target = State;

    fn deref(&self) -> &Self::Target {
        self.state
    }
}

impl<State> DerefMut for DirtyOnDerefMut<'_, State> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        *self.dirty_state = DirtyState::Dirty;
        self.state
    }
}

impl<State> DirtyTracker<State> {
    /// Returns true if the `loaded` marker was changed
    pub fn mark_loaded(&mut self) -> bool {
        if !self.loaded_at_least_once {
            self.loaded_at_least_once = true;
            self.dirty_state = DirtyState::Dirty;
            true
        } else {
            false
        }
    }

    pub fn get(&self) -> &State {
        &self.state
    }

    pub fn get_mut(&mut self) -> DirtyOnDerefMut<'_, State> {
        DirtyOnDerefMut {
            state: &mut self.state,
            dirty_state: &mut self.dirty_state,
        }
    }

    pub fn loaded_at_least_once(&self) -> bool {
        self.loaded_at_least_once
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_state == DirtyState::Dirty
    }

    /// Clears the flag, returning whether it was set.
    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty_state, DirtyState::Clean) == DirtyState::Dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_do_not_dirty() {
        let mut tracker = DirtyTracker::new(5);
        assert!(tracker.take_dirty());

        let value = *tracker.get_mut();
        assert_eq!(value, 5);
        assert!(!tracker.is_dirty());

        *tracker.get_mut() += 1;
        assert!(tracker.is_dirty());
        assert_eq!(*tracker.get(), 6);
    }

    #[test]
    fn test_mark_loaded_only_flips_once() {
        let mut tracker = DirtyTracker::new(());
        tracker.take_dirty();
        assert!(tracker.mark_loaded());
        assert!(tracker.take_dirty());
        assert!(!tracker.mark_loaded());
        assert!(!tracker.is_dirty());
        assert!(tracker.loaded_at_least_once());
    }
}
