//! The two-dimensional policy table deciding how a newly offered event
//! merges with a delay already pending on the same pathname.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::event::EventKind;

/// Decision for a new event arriving while an older delay is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapseRule {
    /// The pending delay and the new event annihilate.
    Cancel,
    /// Keep both, ordered; the new delay fires only after the old one.
    Stack,
    /// Rewrite the pending delay to this kind and drop the new event.
    Replace(EventKind),
}

impl FromStr for CollapseRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cancel" => Ok(CollapseRule::Cancel),
            "stack" => Ok(CollapseRule::Stack),
            other => {
                let kind: EventKind = other.parse()?;
                if kind.collapse_index().is_none() {
                    return Err(format!(
                        "collapse rule must be cancel, stack, attrib, modify, create or delete, got '{other}'"
                    ));
                }
                Ok(CollapseRule::Replace(kind))
            }
        }
    }
}

impl<'de> Deserialize<'de> for CollapseRule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Sparse per-sync overrides: pending kind → new kind → rule.
pub type CollapseOverrides = HashMap<EventKind, HashMap<EventKind, CollapseRule>>;

/// Full table over the four collapsible kinds. Rows are the pending kind,
/// columns the newly offered one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollapseTable {
    rules: [[CollapseRule; 4]; 4],
}

impl Default for CollapseTable {
    /// The stock policy: a `Create` followed by `Delete` annihilates,
    /// `Delete` followed by `Create` degrades to `Modify` (the file returns
    /// with new content), same-kind repetitions are idempotent, and
    /// `Modify` dominates `Attrib`.
    fn default() -> Self {
        use CollapseRule::{Cancel, Replace};
        use EventKind::{Attrib, Create, Delete, Modify};
        CollapseTable {
            rules: [
                [Replace(Attrib), Replace(Modify), Replace(Create), Replace(Delete)],
                [Replace(Modify), Replace(Modify), Replace(Create), Replace(Delete)],
                [Replace(Create), Replace(Create), Replace(Create), Cancel],
                [Replace(Delete), Replace(Delete), Replace(Modify), Replace(Delete)],
            ],
        }
    }
}

impl CollapseTable {
    /// Rule for a (pending, new) pair; `None` when either kind does not
    /// participate in collapsing.
    pub fn rule(&self, old: EventKind, new: EventKind) -> Option<CollapseRule> {
        let row = old.collapse_index()?;
        let col = new.collapse_index()?;
        Some(self.rules[row][col])
    }

    /// Merge user overrides into the table. Keys outside the collapsible
    /// kinds are rejected by config validation before this runs and are
    /// skipped here.
    pub fn apply_overrides(&mut self, overrides: &CollapseOverrides) {
        for (old, columns) in overrides {
            let Some(row) = old.collapse_index() else { continue };
            for (new, rule) in columns {
                let Some(col) = new.collapse_index() else { continue };
                self.rules[row][col] = *rule;
            }
        }
    }
}
