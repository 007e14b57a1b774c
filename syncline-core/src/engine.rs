//! The dispatcher: one engine value owning the syncs registry and the watch
//! table, driven by host callbacks.
//!
//! The host loop is: compute [`Engine::next_alarm`], block on the earliest
//! of alarm expiry / kernel notification / child exit, deliver the matching
//! callback, repeat. Callbacks run to completion without yielding.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::clock::{Clock, Timestamp};
use crate::config::Config;
use crate::error::EngineError;
use crate::event::EventKind;
use crate::process::{Pid, Spawner, Waiter};
use crate::registry::{SyncId, Syncs};
use crate::watch::{Binding, KernelEvent, WatchBackend, WatchManager};

pub struct Engine {
    clock: Arc<dyn Clock + Send + Sync>,
    syncs: Syncs,
    watches: WatchManager,
}

impl Engine {
    pub fn new(config: Config, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            clock,
            syncs: Syncs::from_config(config),
            watches: WatchManager::new(),
        }
    }

    pub fn syncs(&self) -> &Syncs {
        &self.syncs
    }

    /// Register recursive watches for every sync.
    ///
    /// Runs before the startup phase so that changes made during bulk
    /// initial synchronization are already captured.
    pub fn arm_watches(&mut self, backend: &mut dyn WatchBackend) {
        let roots: Vec<(SyncId, std::path::PathBuf)> = self
            .syncs
            .iter()
            .map(|(id, sync)| (id, sync.source().to_path_buf()))
            .collect();
        for (id, root) in roots {
            self.watches.add(backend, &root, id, "", true);
        }
    }

    /// Spawn every configured startup command, then block until all of them
    /// exit. Any nonzero exit is fatal; normal operation must not begin.
    pub fn run_startup<H: Spawner + Waiter>(&mut self, host: &mut H) -> Result<(), EngineError> {
        let mut pending: Vec<(SyncId, Pid)> = Vec::new();
        for (id, sync) in self.syncs.iter() {
            let Some(rendered) = sync.startup_command() else { continue };
            let command = rendered?;
            info!(source = %sync.source().display(), command = %command, "running startup command");
            if let Some(pid) = host.spawn(&command) {
                pending.push((id, pid));
            }
        }
        for (id, pid) in pending {
            let code = host.wait(pid);
            if code != 0 {
                return Err(EngineError::StartupFailed {
                    path: self.syncs.get(id).source().to_path_buf(),
                    code,
                });
            }
            debug!(pid = %pid, "startup command finished");
        }
        Ok(())
    }

    /// Kernel callback: resolve the descriptor and offer the event to every
    /// bound sync. A directory appearing under a watched one is itself
    /// watched immediately.
    pub fn on_kernel_event(&mut self, backend: &mut dyn WatchBackend, event: KernelEvent) {
        let Some(bindings) = self.watches.bindings(event.wd) else {
            // Expected when a directory was deleted and the kernel dropped
            // the descriptor while events were still queued.
            info!(wd = event.wd.0, name = %event.name, "event for unknown watch descriptor dropped");
            return;
        };
        let bindings: Vec<Binding> = bindings.to_vec();

        for binding in bindings {
            let path = format!("{}{}", binding.prefix, event.name);
            let path2 = event
                .name2
                .as_ref()
                .map(|name| format!("{}{}", binding.prefix, name));
            debug!(event = %event.kind, path = %path, "event delivered");
            self.syncs.get_mut(binding.sync).offer(
                self.clock.as_ref(),
                event.kind,
                event.time,
                path,
                path2,
            );

            if event.isdir {
                let new_prefix = match event.kind {
                    EventKind::Create | EventKind::MoveTo => {
                        Some(format!("{}{}/", binding.prefix, event.name))
                    }
                    EventKind::Move => event
                        .name2
                        .as_ref()
                        .map(|name| format!("{}{}/", binding.prefix, name)),
                    _ => None,
                };
                if let Some(prefix) = new_prefix {
                    self.watches
                        .add(backend, &binding.root, binding.sync, &prefix, true);
                }
            }
        }
    }

    /// One dispatch pass: per sync, pop at most one ready delay and hand it
    /// to its action. Returns whether anything was popped; repeated calls
    /// drain further.
    pub fn tick(&mut self, now: Timestamp, spawner: &mut dyn Spawner) -> bool {
        let mut progressed = false;
        for index in 0..self.syncs.len() {
            let sync = self.syncs.get_mut(SyncId(index));
            let Some(delay) = sync.pop_if_ready(now) else { continue };
            progressed = true;
            if delay.kind == EventKind::None {
                continue; // tombstone
            }
            match sync.action_command(&delay) {
                None => {
                    debug!(event = %delay.kind, path = %delay.path, "no handler for event, skipped")
                }
                Some(Err(err)) => {
                    error!(error = %err, path = %delay.path, "failed to render transfer command")
                }
                Some(Ok(command)) => {
                    debug!(command = %command, path = %delay.path, "dispatching transfer command");
                    match spawner.spawn(&command) {
                        Some(pid) => sync.register_child(pid, delay),
                        None => debug!(path = %delay.path, "action declined to spawn"),
                    }
                }
            }
        }
        progressed
    }

    /// Child-exit callback: free the owning sync's slot. Exit codes are
    /// observational in steady state.
    pub fn on_child_exit(&mut self, pid: Pid, code: i32) {
        match self.syncs.release_child(pid) {
            Some((id, delay)) => {
                debug!(
                    pid = %pid,
                    code,
                    event = %delay.kind,
                    path = %delay.path,
                    source = %self.syncs.get(id).source().display(),
                    "transfer command finished"
                );
            }
            None => info!(pid = %pid, code, "exit for unknown child ignored"),
        }
    }

    /// Earliest pending alarm across syncs with a free process slot; `None`
    /// means the host may sleep until an external event.
    pub fn next_alarm(&self) -> Option<Timestamp> {
        self.syncs.next_alarm()
    }

    /// Write the watch table report: timestamp header, directory count, and
    /// one line of bindings per descriptor.
    pub fn status_report(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            out,
            "Syncline status report at {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(out)?;
        writeln!(out, "Watching {} directories", self.watches.watch_count())?;
        for (wd, bindings) in self.watches.iter() {
            write!(out, "  {}: ", wd.0)?;
            for binding in bindings {
                write!(out, "({}/{})", binding.root.display(), binding.prefix)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
