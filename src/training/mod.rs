//! Training module
//!
//! This module provides:
//! - The supervised training loop ([`fit`])
//! - Step-level learning rate schedules
//! - Early stopping and reduce-on-plateau callbacks
//! - Per-epoch training history

pub mod callbacks;
pub mod history;
pub mod scheduler;
pub mod trainer;

pub use callbacks::{CallbackSet, EarlyStopping, Monitor, ReduceLrOnPlateau, StopDecision};
pub use history::{EpochMetrics, TrainingHistory};
pub use scheduler::LrSchedule;
pub use trainer::{evaluate, fit, FitConfig};
