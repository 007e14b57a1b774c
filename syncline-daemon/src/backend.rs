//! Production host primitives: the notify-based watch backend and the child
//! process table.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use syncline_core::{CommandLine, Pid, Spawner, Waiter, WatchBackend, Wd};

/// Watch backend over notify's recommended watcher.
///
/// Each directory gets its own non-recursive watch; recursion is the watch
/// manager's job. Descriptor numbers are assigned here and shared when the
/// same canonical directory is registered twice.
pub(crate) struct NotifyBackend {
    watcher: RecommendedWatcher,
    by_dir: HashMap<PathBuf, Wd>,
    next_wd: i32,
}

impl NotifyBackend {
    pub(crate) fn new(
        event_tx: mpsc::UnboundedSender<notify::Result<notify::Event>>,
    ) -> Result<Self, notify::Error> {
        let watcher = notify::recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        Ok(Self {
            watcher,
            by_dir: HashMap::new(),
            next_wd: 0,
        })
    }

    /// Descriptor registered for `dir`, if any. Kernel event paths arrive
    /// canonical, so a plain map lookup resolves them.
    pub(crate) fn wd_for_dir(&self, dir: &Path) -> Option<Wd> {
        self.by_dir.get(dir).copied()
    }
}

impl WatchBackend for NotifyBackend {
    fn add_watch(&mut self, path: &Path) -> Option<Wd> {
        let canonical = match fs::canonicalize(path) {
            Ok(canonical) => canonical,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot canonicalize watch path");
                return None;
            }
        };
        if let Some(wd) = self.by_dir.get(&canonical) {
            return Some(*wd);
        }
        match self.watcher.watch(&canonical, RecursiveMode::NonRecursive) {
            Ok(()) => {
                self.next_wd += 1;
                let wd = Wd(self.next_wd);
                self.by_dir.insert(canonical, wd);
                Some(wd)
            }
            Err(err) => {
                error!(path = %canonical.display(), error = %err, "kernel watch registration failed");
                None
            }
        }
    }

    fn sub_dirs(&mut self, path: &Path) -> Vec<std::ffi::OsString> {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot list subdirectories");
                return Vec::new();
            }
        };
        let mut names: Vec<std::ffi::OsString> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.file_name())
            .collect();
        names.sort();
        names
    }
}

/// Spawner/waiter over `std::process`. Spawned children are parked here
/// until the runtime hands them to reaper tasks (or, during startup, waits
/// for them inline).
#[derive(Default)]
pub(crate) struct ProcessTable {
    children: HashMap<u32, Child>,
}

impl ProcessTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Move all parked children out, for reaping.
    pub(crate) fn drain(&mut self) -> Vec<(Pid, Child)> {
        self.children
            .drain()
            .map(|(pid, child)| (Pid(pid), child))
            .collect()
    }
}

impl Spawner for ProcessTable {
    fn spawn(&mut self, command: &CommandLine) -> Option<Pid> {
        match Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                let pid = child.id();
                debug!(pid, command = %command, "spawned transfer command");
                self.children.insert(pid, child);
                Some(Pid(pid))
            }
            Err(err) => {
                error!(command = %command, error = %err, "failed to spawn transfer command");
                None
            }
        }
    }
}

impl Waiter for ProcessTable {
    fn wait(&mut self, pid: Pid) -> i32 {
        let Some(mut child) = self.children.remove(&pid.0) else {
            warn!(pid = %pid, "wait for a child that is not in the table");
            return -1;
        };
        match child.wait() {
            Ok(status) => status.code().unwrap_or(-1),
            Err(err) => {
                error!(pid = %pid, error = %err, "wait on child failed");
                -1
            }
        }
    }
}
