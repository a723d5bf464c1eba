//! Engine module housing the playback and synchronization core.
//!
//! - `scheduler`: epoch-gated per-track playback generations
//! - `coordinator`: applies queued structural changes at loop boundaries
//! - `core`: the `LooperEngine` control surface tying both to the tracks

pub mod coordinator;
pub mod core;
pub mod scheduler;

pub use coordinator::{ActionQueue, PendingAction, SeamGate};
pub use core::{LooperEngine, LooperEvent, LooperEventKind};
pub use scheduler::{FiredTrigger, LogSink, MemorySink, Scheduler, TriggerPulse, TriggerSink};
