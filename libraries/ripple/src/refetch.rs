//! The refetch policy shared by every component.
//!
//! A push means "refetch everything". Pushes can come in bursts (a delete of N rows is N pushes), and a refetch
//! takes a while, so a naive handler would pile up N overlapping fetches that resolve in any order.
//! Instead, each component owns a [`RefetchGate`]:
//!
//! - While idle, a request starts a refetch loop.
//! - While a refetch is in flight, any number of requests collapse into one trailing refetch.
//! - Every fetch gets an epoch, and a result is only applied if nothing newer has been applied already.
//!
//! A component also owns a [`Liveness`] flag. Once it's released, results that were already on their way are
//! dropped on arrival instead of being written into a torn-down component.

use std::cell::Cell;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GatePhase {
    Idle,
    Running,
    /// Running, and at least one more request came in since the current fetch started.
    RunningDirty,
}

/// Keeps at most one refetch in flight and orders results by the epoch they were issued in.
#[derive(Debug)]
pub struct RefetchGate {
    phase: GatePhase,
    issued: u64,
    applied: u64,
}

impl Default for RefetchGate {
    fn default() -> Self {
        Self {
            phase: GatePhase::Idle,
            issued: 0,
            applied: 0,
        }
    }
}

impl RefetchGate {
    /// Returns true if the caller should start a refetch loop now.
    /// Otherwise the request has been folded into the pending trailing run.
    pub fn request(&mut self) -> bool {
        match self.phase {
            GatePhase::Idle => {
                self.phase = GatePhase::Running;
                true
            }
            GatePhase::Running | GatePhase::RunningDirty => {
                self.phase = GatePhase::RunningDirty;
                false
            }
        }
    }

    /// Called by the loop after each fetch settles. Returns true if exactly one more fetch is owed.
    pub fn settle(&mut self) -> bool {
        match self.phase {
            GatePhase::RunningDirty => {
                self.phase = GatePhase::Running;
                true
            }
            GatePhase::Running | GatePhase::Idle => {
                self.phase = GatePhase::Idle;
                false
            }
        }
    }

    /// Abandons the loop, e.g. because it could not be spawned.
    pub fn reset(&mut self) {
        self.phase = GatePhase::Idle;
    }

    pub fn is_running(&self) -> bool {
        self.phase != GatePhase::Idle
    }

    /// Stamps a fetch that is about to start.
    pub fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    /// The epoch of the most recently started fetch (0 if none).
    pub fn last_issued(&self) -> u64 {
        self.issued
    }

    /// Returns true (and records it) if the result of fetch `epoch` is newer than anything applied so far.
    pub fn accept(&mut self, epoch: u64) -> bool {
        if epoch <= self.applied {
            return false;
        }
        self.applied = epoch;
        true
    }
}

/// Shared "is this component still mounted" flag. Counts the results dropped after release.
#[derive(Clone, Debug)]
pub struct Liveness {
    alive: Rc<Cell<bool>>,
    discarded: Rc<Cell<usize>>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            alive: Rc::new(Cell::new(true)),
            discarded: Rc::new(Cell::new(0)),
        }
    }
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    /// Returns true the first time only.
    pub fn release(&self) -> bool {
        self.alive.replace(false)
    }

    /// Call with a result that arrived after release. Returns true if the caller must drop it.
    pub fn discard_if_released(&self, what: &str) -> bool {
        if self.is_alive() {
            return false;
        }
        self.discarded.set(self.discarded.get() + 1);
        log::debug!("Discarding {what}: component was released while it was in flight");
        true
    }

    /// How many results were dropped because they landed after release.
    pub fn discarded_results(&self) -> usize {
        self.discarded.get()
    }
}
