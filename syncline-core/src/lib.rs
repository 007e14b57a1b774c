//! Syncline event engine — delay queues, collapse policy, watch bindings,
//! and the alarm-driven dispatcher.
//!
//! The engine is synchronous and single-threaded. All I/O happens through
//! host primitives supplied by the embedding runtime: [`WatchBackend`] for
//! kernel watch registration, [`Spawner`]/[`Waiter`] for child processes,
//! and [`Clock`] for monotonic time. The daemon crate provides the
//! production implementations; tests drive the engine with fakes.

pub mod clock;
pub mod collapse;
pub mod command;
pub mod config;
pub mod delay;
pub mod engine;
pub mod error;
pub mod event;
pub mod process;
pub mod registry;
pub mod sync;
pub mod watch;

pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use command::{CommandTemplate, EventRecord, Inlet};
pub use config::{Config, SyncDecl};
pub use engine::Engine;
pub use error::EngineError;
pub use event::EventKind;
pub use process::{CommandLine, Pid, Spawner, Waiter};
pub use registry::{SyncId, Syncs};
pub use watch::{Binding, KernelEvent, WatchBackend, WatchManager, Wd};
