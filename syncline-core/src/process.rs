//! Child-process primitives the engine consumes from its host.

use std::fmt;

/// Kernel process id of a spawned transfer command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A fully rendered transfer command, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Non-blocking spawn primitive.
///
/// `None` means the action declined to spawn, or the spawn failed and was
/// logged by the implementation; either way the delay is complete.
pub trait Spawner {
    fn spawn(&mut self, command: &CommandLine) -> Option<Pid>;
}

/// Blocking wait primitive, used only during the startup phase.
pub trait Waiter {
    /// Wait for `pid` to exit and return its exit code.
    fn wait(&mut self, pid: Pid) -> i32;
}
