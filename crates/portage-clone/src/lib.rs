//! portage-clone
//!
//! The clone/migrate orchestrator: template shaping and export, volume
//! sub-stacks, stack submission and watching, gateway-driven data copy,
//! identity cut-over, and the undo stack that makes partial progress
//! recoverable.

pub mod config;
pub mod cutover;
pub mod datacopy;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod shape;
pub mod undo;
pub mod waiter;

pub use crate::config::{CloneConfig, CloneMode};
pub use crate::error::CloneError;
pub use crate::orchestrator::CloneOrchestrator;
pub use crate::undo::UndoManager;
pub use crate::waiter::{AbortFlag, Tick, WaitOutcome, Waiter};
