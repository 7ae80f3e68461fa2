//! Learning Rate Scheduler Module
//!
//! Step-level learning rate schedules. The enhanced model decays its learning
//! rate exponentially with every optimizer step; the baseline keeps it
//! constant.

use serde::{Deserialize, Serialize};

use crate::config::TrainingSection;

/// Learning rate as a function of the optimizer step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LrSchedule {
    /// Constant learning rate (no scheduling)
    Constant { lr: f64 },

    /// `lr = initial_lr * decay_rate^(step / decay_steps)`
    ///
    /// With `staircase` the exponent is floored, so the rate drops in
    /// discrete steps every `decay_steps` optimizer steps.
    ExponentialDecay {
        initial_lr: f64,
        decay_steps: usize,
        decay_rate: f64,
        staircase: bool,
    },
}

impl LrSchedule {
    /// Create a constant learning rate schedule
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    /// Create an exponential decay schedule
    pub fn exponential_decay(
        initial_lr: f64,
        decay_steps: usize,
        decay_rate: f64,
        staircase: bool,
    ) -> Self {
        Self::ExponentialDecay {
            initial_lr,
            decay_steps,
            decay_rate,
            staircase,
        }
    }

    /// Pick the schedule for a model variant
    pub fn for_model(enhanced: bool, training: &TrainingSection) -> Self {
        if enhanced {
            Self::exponential_decay(
                training.learning_rate,
                training.decay_steps,
                training.decay_rate,
                training.staircase,
            )
        } else {
            Self::constant(training.learning_rate)
        }
    }

    /// Learning rate at optimizer step `step` (0-based)
    pub fn lr_at(&self, step: usize) -> f64 {
        match self {
            Self::Constant { lr } => *lr,
            Self::ExponentialDecay {
                initial_lr,
                decay_steps,
                decay_rate,
                staircase,
            } => {
                let mut exponent = step as f64 / (*decay_steps).max(1) as f64;
                if *staircase {
                    exponent = exponent.floor();
                }
                initial_lr * decay_rate.powf(exponent)
            }
        }
    }

    /// Get a description of the schedule
    pub fn description(&self) -> String {
        match self {
            Self::Constant { lr } => format!("Constant LR: {:.6}", lr),
            Self::ExponentialDecay {
                initial_lr,
                decay_steps,
                decay_rate,
                staircase,
            } => format!(
                "Exponential decay: initial={:.6}, rate={:.4} every {} steps{}",
                initial_lr,
                decay_rate,
                decay_steps,
                if *staircase { " (staircase)" } else { "" }
            ),
        }
    }
}

impl Default for LrSchedule {
    fn default() -> Self {
        Self::Constant { lr: 1e-3 }
    }
}
