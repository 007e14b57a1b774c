//! Filesystem event kinds flowing through the delay queues.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of event kinds.
///
/// `Move` carries both pathnames of a rename observed inside one directory.
/// The kernel may also deliver unpaired halves as `MoveFrom`/`MoveTo`.
/// `None` is the tombstone left behind when a pending delay is cancelled;
/// it stays queued until popped and is a no-op on dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Attrib,
    Modify,
    Create,
    Delete,
    Move,
    MoveFrom,
    MoveTo,
    None,
}

impl EventKind {
    /// Whether this kind is any flavour of move. Moves are never coalesced
    /// with other events on the same pathname.
    pub fn is_move(self) -> bool {
        matches!(self, EventKind::Move | EventKind::MoveFrom | EventKind::MoveTo)
    }

    /// Row/column index into the collapse table; `None` for kinds that do
    /// not participate in collapsing.
    pub(crate) fn collapse_index(self) -> Option<usize> {
        match self {
            EventKind::Attrib => Some(0),
            EventKind::Modify => Some(1),
            EventKind::Create => Some(2),
            EventKind::Delete => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Attrib => "attrib",
            EventKind::Modify => "modify",
            EventKind::Create => "create",
            EventKind::Delete => "delete",
            EventKind::Move => "move",
            EventKind::MoveFrom => "movefrom",
            EventKind::MoveTo => "moveto",
            EventKind::None => "none",
        };
        f.write_str(name)
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attrib" => Ok(EventKind::Attrib),
            "modify" => Ok(EventKind::Modify),
            "create" => Ok(EventKind::Create),
            "delete" => Ok(EventKind::Delete),
            "move" => Ok(EventKind::Move),
            "movefrom" => Ok(EventKind::MoveFrom),
            "moveto" => Ok(EventKind::MoveTo),
            "none" => Ok(EventKind::None),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }
}
