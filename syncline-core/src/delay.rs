//! A queued, time-deferred record of one pending filesystem event.

use crate::clock::Timestamp;
use crate::event::EventKind;

/// Identity of a delay within its sync's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelayId(pub u64);

/// One pending event for one pathname.
///
/// Created by watch-manager delivery, mutated only by collapse (its `kind`
/// may be rewritten, including to [`EventKind::None`]), and destroyed when
/// popped by the dispatcher.
#[derive(Debug, Clone)]
pub struct Delay {
    pub id: DelayId,
    pub kind: EventKind,
    /// Pathname relative to the sync's source root.
    pub path: String,
    /// Second pathname, for move targets.
    pub path2: Option<String>,
    /// Monotonic time at which this delay becomes eligible for dispatch.
    pub alarm: Timestamp,
    /// Next stacked delay on the same pathname, if any.
    pub(crate) next: Option<DelayId>,
}
