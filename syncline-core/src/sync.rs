//! One configured (source, target, policy) unit and its delay queue.
//!
//! The queue buffers events for `delay` seconds and coalesces bursts: a new
//! event on a pathname that already has a pending delay is resolved through
//! the collapse table — cancelled, stacked behind it, or folded into it.
//! Stacked delays on one pathname form a chain; `delayname` points at the
//! oldest entry and collapse always operates on the youngest live one.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use tracing::{debug, error};

use crate::clock::{Clock, Timestamp};
use crate::collapse::{CollapseRule, CollapseTable};
use crate::command::{EventRecord, Inlet};
use crate::config::SyncDecl;
use crate::delay::{Delay, DelayId};
use crate::error::EngineError;
use crate::event::EventKind;
use crate::process::{CommandLine, Pid};

pub struct Sync {
    decl: SyncDecl,
    collapse: CollapseTable,
    delays: VecDeque<Delay>,
    delayname: HashMap<String, DelayId>,
    processes: HashMap<Pid, Delay>,
    next_id: u64,
}

impl Sync {
    pub fn new(decl: SyncDecl) -> Self {
        let mut collapse = CollapseTable::default();
        collapse.apply_overrides(&decl.collapse);
        Self {
            decl,
            collapse,
            delays: VecDeque::new(),
            delayname: HashMap::new(),
            processes: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn decl(&self) -> &SyncDecl {
        &self.decl
    }

    pub fn source(&self) -> &Path {
        &self.decl.source
    }

    pub fn target(&self) -> &str {
        &self.decl.target
    }

    // -----------------------------------------------------------------------
    // Offer — the collapse decision
    // -----------------------------------------------------------------------

    /// Offer one event to the delay queue.
    ///
    /// Without a move handler, move events degrade to delete/create pairs
    /// before queueing. The alarm is `time + delay` when a timestamp was
    /// supplied and the sync buffers, otherwise "now".
    pub fn offer(
        &mut self,
        clock: &dyn Clock,
        kind: EventKind,
        time: Option<Timestamp>,
        path: String,
        path2: Option<String>,
    ) {
        if kind == EventKind::None {
            debug!(path = %path, "tombstone offer ignored");
            return;
        }
        if self.decl.move_.is_none() {
            match kind {
                EventKind::Move => {
                    self.offer(clock, EventKind::Delete, time, path, None);
                    if let Some(dest) = path2 {
                        self.offer(clock, EventKind::Create, time, dest, None);
                    }
                    return;
                }
                EventKind::MoveFrom => {
                    self.offer(clock, EventKind::Delete, time, path, None);
                    return;
                }
                EventKind::MoveTo => {
                    self.offer(clock, EventKind::Create, time, path, None);
                    return;
                }
                _ => {}
            }
        }

        let alarm = match time {
            Some(t) if self.decl.delay > 0 => t.add_secs(self.decl.delay),
            _ => clock.now(),
        };

        let Some(head_id) = self.delayname.get(&path).copied() else {
            self.push_indexed(kind, path, path2, alarm);
            return;
        };

        let Some((link_tail, live_tail)) = self.chain_ends(head_id) else {
            // The index referenced a delay that is gone; repair and requeue.
            error!(path = %path, "stale delay index entry repaired");
            self.delayname.remove(&path);
            self.push_indexed(kind, path, path2, alarm);
            return;
        };

        let Some((old_id, old_kind)) = live_tail else {
            // Only tombstones left on this chain; start a fresh one.
            self.delayname.remove(&path);
            self.push_indexed(kind, path, path2, alarm);
            return;
        };

        // Moves are never coalesced with other events on the same path.
        if old_kind.is_move() || kind.is_move() {
            debug!(path = %path, pending = %old_kind, event = %kind, "move collision, event dropped");
            return;
        }

        match self.collapse.rule(old_kind, kind) {
            Some(CollapseRule::Cancel) => {
                if let Some(delay) = self.delay_mut(old_id) {
                    delay.kind = EventKind::None;
                    delay.path2 = None;
                }
                if old_id == head_id {
                    self.delayname.remove(&path);
                }
                debug!(path = %path, pending = %old_kind, event = %kind, "events annihilated");
            }
            Some(CollapseRule::Stack) => {
                let id = self.push(kind, path.clone(), path2, alarm);
                if let Some(tail) = self.delay_mut(link_tail) {
                    tail.next = Some(id);
                }
                debug!(path = %path, pending = %old_kind, event = %kind, "event stacked");
            }
            Some(CollapseRule::Replace(to)) => {
                if let Some(delay) = self.delay_mut(old_id) {
                    delay.kind = to;
                }
                debug!(path = %path, pending = %old_kind, event = %kind, collapsed = %to, "event collapsed");
            }
            None => {
                debug!(path = %path, pending = %old_kind, event = %kind, "uncollapsible event dropped");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch side
    // -----------------------------------------------------------------------

    /// Pop the head delay iff its alarm has passed and a process slot is
    /// free. Tombstones pop like any other delay; the dispatcher skips them.
    pub fn pop_if_ready(&mut self, now: Timestamp) -> Option<Delay> {
        if self.processes.len() >= self.decl.max_processes {
            return None;
        }
        if !self.delays.front().map(|d| d.alarm <= now).unwrap_or(false) {
            return None;
        }
        let delay = self.delays.pop_front()?;
        self.advance_index(&delay);
        Some(delay)
    }

    /// Earliest alarm this sync could actually dispatch, or `None` when the
    /// queue is empty or every process slot is taken.
    pub fn next_alarm(&self) -> Option<Timestamp> {
        if self.has_free_slot() {
            self.head_alarm()
        } else {
            None
        }
    }

    pub fn has_free_slot(&self) -> bool {
        self.processes.len() < self.decl.max_processes
    }

    pub fn head_alarm(&self) -> Option<Timestamp> {
        self.delays.front().map(|d| d.alarm)
    }

    /// Rendered transfer command for a popped delay, or `None` when the
    /// policy has no handler for its kind.
    pub fn action_command(&self, delay: &Delay) -> Option<Result<CommandLine, EngineError>> {
        let template = self.decl.template_for(delay.kind)?;
        let inlet = Inlet::new(&self.decl, Some(self.event_record(delay)));
        Some(template.render(&inlet))
    }

    /// Rendered startup command, when configured.
    pub fn startup_command(&self) -> Option<Result<CommandLine, EngineError>> {
        let template = self.decl.startup.as_ref()?;
        let inlet = Inlet::new(&self.decl, None);
        Some(template.render(&inlet))
    }

    /// Event record handed to the action through its inlet.
    pub fn event_record(&self, delay: &Delay) -> EventRecord {
        let source = self.decl.source.display().to_string();
        EventRecord {
            kind: delay.kind,
            spath: join_under(&source, &delay.path),
            tpath: join_under(&self.decl.target, &delay.path),
            spath2: delay.path2.as_deref().map(|p| join_under(&source, p)),
            tpath2: delay.path2.as_deref().map(|p| join_under(&self.decl.target, p)),
        }
    }

    pub fn register_child(&mut self, pid: Pid, delay: Delay) {
        debug_assert!(self.processes.len() < self.decl.max_processes);
        self.processes.insert(pid, delay);
    }

    pub fn release_child(&mut self, pid: Pid) -> Option<Delay> {
        self.processes.remove(&pid)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Queued delays, oldest first (tombstones included).
    pub fn pending(&self) -> impl Iterator<Item = &Delay> {
        self.delays.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.delays.len()
    }

    // -----------------------------------------------------------------------
    // Chain plumbing
    // -----------------------------------------------------------------------

    fn push(&mut self, kind: EventKind, path: String, path2: Option<String>, alarm: Timestamp) -> DelayId {
        let id = DelayId(self.next_id);
        self.next_id += 1;
        self.delays.push_back(Delay {
            id,
            kind,
            path,
            path2,
            alarm,
            next: None,
        });
        id
    }

    fn push_indexed(&mut self, kind: EventKind, path: String, path2: Option<String>, alarm: Timestamp) {
        let key = path.clone();
        let id = self.push(kind, path, path2, alarm);
        self.delayname.insert(key, id);
    }

    fn delay_ref(&self, id: DelayId) -> Option<&Delay> {
        self.delays.iter().find(|d| d.id == id)
    }

    fn delay_mut(&mut self, id: DelayId) -> Option<&mut Delay> {
        self.delays.iter_mut().find(|d| d.id == id)
    }

    /// Walk the chain starting at `head`: the absolute last entry (for
    /// linking) and the youngest non-tombstone (for collapse).
    fn chain_ends(&self, head: DelayId) -> Option<(DelayId, Option<(DelayId, EventKind)>)> {
        let mut current = self.delay_ref(head)?;
        let mut live = (current.kind != EventKind::None).then_some((current.id, current.kind));
        loop {
            match current.next.and_then(|id| self.delay_ref(id)) {
                Some(next) => {
                    if next.kind != EventKind::None {
                        live = Some((next.id, next.kind));
                    }
                    current = next;
                }
                None => return Some((current.id, live)),
            }
        }
    }

    /// After popping `popped`, point the index at the next live entry of its
    /// chain, or drop the entry when the chain is exhausted.
    fn advance_index(&mut self, popped: &Delay) {
        if self.delayname.get(&popped.path).copied() != Some(popped.id) {
            return;
        }
        let mut cursor = popped.next;
        while let Some(id) = cursor {
            match self.delay_ref(id) {
                Some(d) if d.kind != EventKind::None => {
                    self.delayname.insert(popped.path.clone(), id);
                    return;
                }
                Some(d) => cursor = d.next,
                None => break,
            }
        }
        self.delayname.remove(&popped.path);
    }
}

fn join_under(base: &str, rel: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), rel)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
