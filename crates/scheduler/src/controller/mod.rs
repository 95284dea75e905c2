//! Task controller -- owns the shared pools and tracks in-flight tasks.
//!
//! Split into focused submodules:
//! - `core`: TaskController struct, constructor, pool accessors, and the task registry
//! - `submission`: single-task submission, blocking execution, and default batches

mod core;
mod submission;

pub use self::core::{ControllerSnapshot, TaskController};
