//! Single-threaded event engine.
//!
//! An [`EventEngine`] owns a current-thread tokio runtime and drives it from
//! whichever thread calls [`EventEngine::run_main`]. Other threads talk to it
//! through a cloned [`EngineHandle`], whose [`EngineHandle::schedule`] is the
//! only entry point meant to be used off the engine thread.

mod engine;
mod handle;
mod signal;
mod types;

pub use engine::EventEngine;
pub use handle::{EngineHandle, InitialTask, Scheduled};
pub use types::{EngineConfig, EngineError, Phase, StopReason};
