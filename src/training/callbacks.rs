//! Training callbacks
//!
//! Early stopping and learning-rate reduction on plateau, both driven by one
//! monitored validation metric at the end of each epoch.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CallbackSection;
use crate::training::history::EpochMetrics;

/// Validation metric watched by the callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    /// Validation loss, lower is better
    ValLoss,
    /// Validation accuracy, higher is better
    ValAccuracy,
}

/// Mode for plateau detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlateauMode {
    /// Metric should decrease (e.g., loss)
    Min,
    /// Metric should increase (e.g., accuracy)
    Max,
}

impl Monitor {
    pub fn mode(&self) -> PlateauMode {
        match self {
            Monitor::ValLoss => PlateauMode::Min,
            Monitor::ValAccuracy => PlateauMode::Max,
        }
    }

    /// Read the monitored value from one epoch's metrics
    pub fn value(&self, metrics: &EpochMetrics) -> f64 {
        match self {
            Monitor::ValLoss => metrics.val_loss,
            Monitor::ValAccuracy => metrics.val_accuracy,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Monitor::ValLoss => "val_loss",
            Monitor::ValAccuracy => "val_accuracy",
        }
    }
}

/// Tracks the best value of a monitored metric
#[derive(Debug, Clone)]
struct BestTracker {
    mode: PlateauMode,
    min_delta: f64,
    best: Option<f64>,
    wait: usize,
}

impl BestTracker {
    fn new(mode: PlateauMode, min_delta: f64) -> Self {
        Self {
            mode,
            min_delta: min_delta.abs(),
            best: None,
            wait: 0,
        }
    }

    /// Record a value; returns `true` when it improves on the best so far.
    /// NaN is ignored entirely.
    fn update(&mut self, value: f64) -> Option<bool> {
        if value.is_nan() {
            return None;
        }
        let improved = match self.best {
            None => true,
            Some(best) => match self.mode {
                PlateauMode::Min => value < best - self.min_delta,
                PlateauMode::Max => value > best + self.min_delta,
            },
        };
        if improved {
            self.best = Some(value);
            self.wait = 0;
        } else {
            self.wait += 1;
        }
        Some(improved)
    }
}

/// What early stopping decided at the end of an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// The monitored metric reached a new best; snapshot the model
    Improved,
    Continue,
    Stop,
}

/// Stop training once the monitored metric stops improving
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    pub monitor: Monitor,
    pub patience: usize,
    pub min_delta: f64,
    pub restore_best_weights: bool,
    tracker: BestTracker,
    best_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(monitor: Monitor, patience: usize, min_delta: f64, restore_best_weights: bool) -> Self {
        Self {
            monitor,
            patience,
            min_delta,
            restore_best_weights,
            tracker: BestTracker::new(monitor.mode(), min_delta),
            best_epoch: None,
        }
    }

    /// Feed the metrics of a finished epoch
    pub fn on_epoch_end(&mut self, metrics: &EpochMetrics) -> StopDecision {
        match self.tracker.update(self.monitor.value(metrics)) {
            None => StopDecision::Continue,
            Some(true) => {
                self.best_epoch = Some(metrics.epoch);
                StopDecision::Improved
            }
            Some(false) if self.tracker.wait >= self.patience => {
                info!(
                    "Early stopping at epoch {}: {} has not improved for {} epochs",
                    metrics.epoch,
                    self.monitor.name(),
                    self.tracker.wait
                );
                StopDecision::Stop
            }
            Some(false) => StopDecision::Continue,
        }
    }

    /// Best monitored value so far
    pub fn best_value(&self) -> Option<f64> {
        self.tracker.best
    }

    /// Epoch (1-based) of the best monitored value
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// Scale the learning rate down when the monitored metric plateaus
///
/// The optimizer uses `schedule(step) * scale()`. The scale is multiplied by
/// `factor` after `patience` epochs without improvement and never brings the
/// effective rate below `min_lr`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    pub monitor: Monitor,
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    tracker: BestTracker,
    scale: f64,
}

impl ReduceLrOnPlateau {
    pub fn new(monitor: Monitor, factor: f64, patience: usize, min_lr: f64, min_delta: f64) -> Self {
        Self {
            monitor,
            factor,
            patience,
            min_lr,
            tracker: BestTracker::new(monitor.mode(), min_delta),
            scale: 1.0,
        }
    }

    /// Current multiplier applied to the scheduled learning rate
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Learning rate actually used for a scheduled rate
    pub fn effective_lr(&self, scheduled_lr: f64) -> f64 {
        (scheduled_lr * self.scale).max(self.min_lr.min(scheduled_lr))
    }

    /// Feed the metrics of a finished epoch; returns `true` if the rate was reduced
    pub fn on_epoch_end(&mut self, metrics: &EpochMetrics, scheduled_lr: f64) -> bool {
        match self.tracker.update(self.monitor.value(metrics)) {
            Some(false) if self.tracker.wait >= self.patience => {
                let current = scheduled_lr * self.scale;
                let target = (current * self.factor).max(self.min_lr);
                self.tracker.wait = 0;
                if target < current && scheduled_lr > 0.0 {
                    self.scale = target / scheduled_lr;
                    info!(
                        "Reducing learning rate to {:.2e} at epoch {} ({} plateaued)",
                        target,
                        metrics.epoch,
                        self.monitor.name()
                    );
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}

/// Callbacks active during one fit
#[derive(Debug, Clone, Default)]
pub struct CallbackSet {
    pub early_stopping: Option<EarlyStopping>,
    pub reduce_lr: Option<ReduceLrOnPlateau>,
}

impl CallbackSet {
    /// Baseline runs get early stopping only; enhanced runs add
    /// reduce-on-plateau.
    pub fn for_model(enhanced: bool, config: &CallbackSection) -> Self {
        let early_stopping = Some(EarlyStopping::new(
            config.monitor,
            config.early_stopping_patience,
            config.min_delta,
            config.restore_best_weights,
        ));
        let reduce_lr = enhanced.then(|| {
            ReduceLrOnPlateau::new(
                config.monitor,
                config.reduce_lr_factor,
                config.reduce_lr_patience,
                config.min_lr,
                config.min_delta,
            )
        });

        Self {
            early_stopping,
            reduce_lr,
        }
    }

    /// Learning rate after any plateau reduction
    pub fn effective_lr(&self, scheduled_lr: f64) -> f64 {
        match &self.reduce_lr {
            Some(reduce) => reduce.effective_lr(scheduled_lr),
            None => scheduled_lr,
        }
    }

    /// Run every callback for a finished epoch
    pub fn on_epoch_end(&mut self, metrics: &EpochMetrics, scheduled_lr: f64) -> StopDecision {
        if let Some(reduce) = &mut self.reduce_lr {
            reduce.on_epoch_end(metrics, scheduled_lr);
        }
        match &mut self.early_stopping {
            Some(early) => early.on_epoch_end(metrics),
            None => StopDecision::Continue,
        }
    }

    /// Whether the best model should be returned instead of the last one
    pub fn restores_best(&self) -> bool {
        self.early_stopping
            .as_ref()
            .map(|e| e.restore_best_weights)
            .unwrap_or(false)
    }
}
