//! The replay engine: a virtual-clock tick loop that replays historical
//! sensor events from a [`replay_storage::StorageAdapter`] into an
//! [`replay_sink::OutputSink`], one command channel away from the control
//! plane.
//!
//! Callers never touch the tick loop directly — [`EngineHandle::spawn`]
//! starts it as its own task and returns a cheap, cloneable handle. Every
//! mutation goes through a command with a `oneshot` reply, so the tick loop
//! is the sole owner of [`state::EngineState`] and no lock is needed.

pub mod cache;
pub mod driver;
pub mod error;
pub mod state;

pub use driver::{Command, EngineEvent, EngineHandle, EngineRuntimeConfig, StatusSnapshot};
pub use error::EngineError;
pub use state::{EngineState, SensorSlot, StateSnapshot};
