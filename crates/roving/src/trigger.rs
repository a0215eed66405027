//! Loose/tight reference trigger.
//!
//! A hosted object is *loose* while local handles to it exist. When the last
//! local handle goes away the object is held only by protocol bookkeeping
//! (lifetime managers anchoring it for remote claimants) and the trigger
//! flips to *tight*. A tight object is a candidate for relocation to the next
//! remote caller. Migration pins the trigger so the object is never offered
//! twice while a move is in flight.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Observable state of an object's trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceStrength {
    /// Local handles exist; the object is in ordinary use here.
    Loose,
    /// Only protocol bookkeeping holds the object.
    Tight,
    /// A migration is in progress; neither loosening nor tightening applies.
    Pinned,
}

const LOOSE: u8 = 0;
const TIGHT: u8 = 1;
const PINNED: u8 = 2;

impl ReferenceStrength {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            TIGHT => Self::Tight,
            PINNED => Self::Pinned,
            _ => Self::Loose,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Trigger {
    state: AtomicU8,
    handles: AtomicUsize,
}

impl Trigger {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU8::new(LOOSE),
            handles: AtomicUsize::new(0),
        }
    }

    pub(crate) fn strength(&self) -> ReferenceStrength {
        ReferenceStrength::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_tight(&self) -> bool {
        self.state.load(Ordering::Acquire) == TIGHT
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.handles.load(Ordering::Acquire)
    }

    /// Records a new local handle. Any handle is proof of local use.
    pub(crate) fn handle_acquired(&self) {
        self.handles.fetch_add(1, Ordering::AcqRel);
        self.loosen();
    }

    /// Records a dropped local handle.
    ///
    /// Returns `true` if this was the last handle on the host and the trigger
    /// tightened as a result.
    pub(crate) fn handle_released(&self, hosted: bool) -> bool {
        let previous = self.handles.fetch_sub(1, Ordering::AcqRel);
        previous == 1 && hosted && self.tighten()
    }

    /// Tight to loose. Pinned triggers are left alone.
    pub(crate) fn loosen(&self) {
        let _ = self
            .state
            .compare_exchange(TIGHT, LOOSE, Ordering::AcqRel, Ordering::Acquire);
    }

    fn tighten(&self) -> bool {
        self.state
            .compare_exchange(LOOSE, TIGHT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Forces the trigger tight for the duration of a migration.
    pub(crate) fn pin(&self) {
        self.state.store(PINNED, Ordering::Release);
    }

    /// Ends a migration pin. The trigger resumes as tight if no local handle
    /// exists, loose otherwise.
    pub(crate) fn unpin(&self) {
        let next = if self.handle_count() == 0 { TIGHT } else { LOOSE };
        let _ = self
            .state
            .compare_exchange(PINNED, next, Ordering::AcqRel, Ordering::Acquire);
    }
}
