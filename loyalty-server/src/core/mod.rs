//! Core runtime pieces

pub mod tasks;

pub use tasks::{BackgroundTasks, TaskKind};
