//! The model capability surface the training loop drives.
//!
//! The loop owns mode switching and checkpoint timing but never looks inside
//! the forward computation; anything implementing [`GoodnessModel`] can be
//! trained. `ffwd-train` tests exercise the loop against a scripted
//! implementation, the CLI wires in [`FfNet`](crate::FfNet).

use std::path::{Path, PathBuf};

use candle_core::{Result, Tensor};
use ffwd_common::ScalarOutputs;

/// Result of one training forward pass: the loss tensor to backpropagate and
/// the named scalar outputs (always including `"Loss"`) to accumulate.
pub struct TrainStep {
    pub loss: Tensor,
    pub scalars: ScalarOutputs,
}

/// A model trainable by goodness threshold: a training forward pass whose
/// loss depends on an injected threshold, plus the two-stage evaluation
/// (classification head, then label-overlay multi-pass).
pub trait GoodnessModel {
    /// Forward + loss for one training batch. `threshold` is the live value
    /// the loss compares goodness against — the adaptive multiplier when a
    /// scheduler is configured.
    fn forward_train(&mut self, inputs: &Tensor, labels: &Tensor, threshold: f64)
        -> Result<TrainStep>;

    /// Primary evaluation stage: downstream classifier outputs.
    fn forward_classification(&self, inputs: &Tensor, labels: &Tensor) -> Result<ScalarOutputs>;

    /// Secondary evaluation stage: label-overlay multi-pass, extending the
    /// primary stage's outputs.
    fn forward_multi_pass(
        &self,
        inputs: &Tensor,
        labels: &Tensor,
        scalars: ScalarOutputs,
    ) -> Result<ScalarOutputs>;

    /// Switch between training and evaluation mode.
    fn set_train_mode(&mut self, train: bool);

    fn is_training(&self) -> bool;

    /// Persist weights (and enough metadata to restore) under `dir`.
    /// Returns the weight file path.
    fn save(&self, dir: &Path) -> anyhow::Result<PathBuf>;
}
