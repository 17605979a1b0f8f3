//! Resume cursor tracking under out-of-order completion
//!
//! Records are registered in ascending identity order as they are
//! dispatched and resolved in any order by workers. The cursor is the
//! greatest identity such that every registered record at or below it
//! has been resolved. Abandoned records (in flight or queued when the run
//! stopped) pin the cursor below them forever, so a resumed run picks
//! them up again.

use parking_lot::Mutex;
use std::collections::BTreeSet;

use crate::record::RecordId;

#[derive(Debug, Default)]
struct CursorState {
    cursor: Option<RecordId>,
    outstanding: BTreeSet<RecordId>,
    resolved_ahead: BTreeSet<RecordId>,
    abandoned: BTreeSet<RecordId>,
}

impl CursorState {
    fn advance(&mut self) {
        let boundary = match (self.outstanding.first(), self.abandoned.first()) {
            (Some(a), Some(b)) => Some(a.min(b).clone()),
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };

        let still_ahead = match &boundary {
            Some(boundary) => self.resolved_ahead.split_off(boundary),
            None => BTreeSet::new(),
        };
        let settled = std::mem::replace(&mut self.resolved_ahead, still_ahead);

        if let Some(last) = settled.into_iter().next_back() {
            self.cursor = Some(last);
        }
    }
}

/// Monotonic "fully resolved prefix" tracker
#[derive(Debug, Default)]
pub struct ResumeCursorTracker {
    state: Mutex<CursorState>,
}

impl ResumeCursorTracker {
    /// Start from an existing cursor (or from the beginning)
    pub fn new(start: Option<RecordId>) -> Self {
        Self {
            state: Mutex::new(CursorState {
                cursor: start,
                ..Default::default()
            }),
        }
    }

    /// Mark a record as dispatched
    pub fn register(&self, id: RecordId) {
        self.state.lock().outstanding.insert(id);
    }

    /// Mark a record as resolved and return the new cursor
    pub fn resolve(&self, id: &RecordId) -> Option<RecordId> {
        self.resolve_with(id, |cursor| cursor.cloned())
    }

    /// Resolve a record and observe the new cursor while still holding the lock
    ///
    /// Observers therefore see cursors in non-decreasing order.
    pub fn resolve_with<R>(&self, id: &RecordId, observe: impl FnOnce(Option<&RecordId>) -> R) -> R {
        let mut state = self.state.lock();
        if state.outstanding.remove(id) {
            state.resolved_ahead.insert(id.clone());
            state.advance();
        }
        observe(state.cursor.as_ref())
    }

    /// Give up on a record without resolving it
    pub fn abandon(&self, id: &RecordId) {
        let mut state = self.state.lock();
        if state.outstanding.remove(id) {
            state.abandoned.insert(id.clone());
            state.advance();
        }
    }

    pub fn cursor(&self) -> Option<RecordId> {
        self.state.lock().cursor.clone()
    }

    /// Records dispatched but not yet resolved or abandoned
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding.len()
    }
}
