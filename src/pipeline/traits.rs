use std::path::Path;

use candle_core::{Tensor, Var};

use crate::error::CtcError;
use crate::types::Sample;

/// Maps padded features `(batch, time, feature_dim)` to per-frame class scores
/// `(batch, time, num_classes)`.
///
/// Implementations must be deterministic when `train` is false and keep their
/// parameter count independent of the sequence length.
pub trait SequenceEncoder: Send + Sync {
    fn forward(&self, features: &Tensor, train: bool) -> Result<Tensor, CtcError>;

    fn feature_dim(&self) -> usize;

    fn num_classes(&self) -> usize;

    /// Parameters the optimizer is allowed to update.
    fn trainable_vars(&self) -> Vec<Var>;

    fn save_weights(&self, _path: &Path) -> Result<(), CtcError> {
        Err(CtcError::invalid_input("this encoder cannot be saved"))
    }
}

/// Turns one (audio, transcript) source into a feature/label sample.
pub trait SampleSource: Send + Sync {
    fn load(&self) -> Result<Sample, CtcError>;

    /// Identifier used in logs and evaluation reports.
    fn id(&self) -> String;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub epoch: usize,
    pub batch_index: usize,
    pub batch_count: usize,
    pub batch_size: usize,
    pub loss: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub average_loss: f32,
    pub batches: usize,
    pub skipped_samples: usize,
}

/// Hook the trainer calls on epoch and batch boundaries.
///
/// Training results never depend on what an observer does.
pub trait TrainingObserver: Send {
    fn on_epoch_start(&mut self, _epoch: usize, _batch_count: usize) {}

    fn on_batch_end(&mut self, _report: &BatchReport) {}

    fn on_epoch_end(&mut self, _summary: &EpochSummary) {}

    fn on_sample_skipped(&mut self, _sample_id: &str, _error: &CtcError) {}
}
