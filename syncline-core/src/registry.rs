//! Process-wide collection of configured syncs.

use crate::clock::Timestamp;
use crate::config::Config;
use crate::delay::Delay;
use crate::process::Pid;
use crate::sync::Sync;

/// Stable identity of a sync within the registry; watch bindings refer to
/// syncs by this index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncId(pub usize);

#[derive(Default)]
pub struct Syncs {
    syncs: Vec<Sync>,
}

impl Syncs {
    pub fn from_config(config: Config) -> Self {
        Self {
            syncs: config.syncs.into_iter().map(Sync::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.syncs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syncs.is_empty()
    }

    pub fn get(&self, id: SyncId) -> &Sync {
        &self.syncs[id.0]
    }

    pub fn get_mut(&mut self, id: SyncId) -> &mut Sync {
        &mut self.syncs[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SyncId, &Sync)> {
        self.syncs.iter().enumerate().map(|(i, s)| (SyncId(i), s))
    }

    /// Release `pid` from whichever sync owns it.
    pub fn release_child(&mut self, pid: Pid) -> Option<(SyncId, Delay)> {
        for (i, sync) in self.syncs.iter_mut().enumerate() {
            if let Some(delay) = sync.release_child(pid) {
                return Some((SyncId(i), delay));
            }
        }
        None
    }

    /// Earliest alarm any sync could dispatch right now.
    pub fn next_alarm(&self) -> Option<Timestamp> {
        self.syncs.iter().filter_map(|s| s.next_alarm()).min()
    }
}
