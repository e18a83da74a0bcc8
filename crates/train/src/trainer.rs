//! The training loop and validation/checkpoint selection.
//!
//! One [`Trainer`] drives a full run: per epoch it applies the learning-rate
//! schedule, steps through every batch (forward with the live threshold →
//! backward → optimizer step → metric accumulation), reports, advances the
//! threshold scheduler, and at the configured cadence runs the validation
//! loop, which is the sole writer of `best_val_acc` and the only trigger of
//! checkpoint writes.
//!
//! Failure semantics: every error propagates via `?`. No retries, no
//! partial-epoch recovery — a crash mid-epoch loses that epoch's metrics and
//! the last checkpoint on disk remains the best artifact.

use std::ops::{Deref, DerefMut};
use std::time::Instant;

use anyhow::Result;
use candle_core::Device;
use candle_nn::{AdamW, Optimizer};

use ffwd_common::{
    batch_to_tensors, metrics, BatchSource, ExperimentConfig, Partition, RunningMetrics,
    TrainingConfig,
};
use ffwd_core::GoodnessModel;

use crate::checkpoint::Checkpoint;
use crate::recorder::Recorder;
use crate::scheduler::{LrSchedule, ThresholdScheduler};

/// Training orchestrator. Owns the model, optimizer, and both schedules.
pub struct Trainer<M: GoodnessModel> {
    model: M,
    optimizer: AdamW,
    lr_schedule: LrSchedule,
    threshold: Option<ThresholdScheduler>,
    config: TrainingConfig,
    base_threshold: f64,
    device: Device,
    best_val_acc: f64,
}

impl<M: GoodnessModel> Trainer<M> {
    /// Construct a trainer. Validates the configuration before any work.
    pub fn new(
        model: M,
        optimizer: AdamW,
        config: &ExperimentConfig,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;

        let t = &config.training;
        let lr_schedule = LrSchedule::new(
            t.learning_rate,
            t.lr_min,
            t.lr_warmup_epochs,
            t.epochs,
            t.lr_decay,
        );
        let threshold = config
            .scheduler
            .as_ref()
            .map(ThresholdScheduler::new)
            .transpose()?;

        Ok(Self {
            model,
            optimizer,
            lr_schedule,
            threshold,
            config: t.clone(),
            base_threshold: config.model.threshold,
            device,
            best_val_acc: 0.0,
        })
    }

    /// Start the run from a different best accuracy. Used for standalone
    /// evaluation passes that must never win the checkpoint gate.
    pub fn with_initial_best(mut self, best_val_acc: f64) -> Self {
        self.best_val_acc = best_val_acc;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Hand the (mutated in place) model back to the caller.
    pub fn into_model(self) -> M {
        self.model
    }

    pub fn best_val_acc(&self) -> f64 {
        self.best_val_acc
    }

    /// The threshold the next forward pass will see: the scheduler's live
    /// multiplier, or the model's base threshold when none is configured.
    pub fn threshold_multiplier(&self) -> f64 {
        self.threshold
            .as_ref()
            .map_or(self.base_threshold, ThresholdScheduler::multiplier)
    }

    /// Run the full training loop.
    pub fn train<R: Recorder, C: Checkpoint<M>>(
        &mut self,
        train_data: &impl BatchSource,
        val_data: Option<&impl BatchSource>,
        recorder: &mut R,
        checkpoint: &mut C,
    ) -> Result<()> {
        let batch_size = self.config.batch_size;

        for epoch in 0..self.config.epochs {
            let start = Instant::now();
            self.optimizer
                .set_learning_rate(self.lr_schedule.lr_for_epoch(epoch));

            let num_batches = train_data.num_batches(batch_size);
            let mut running = RunningMetrics::new();
            for (features, labels) in train_data.batches(batch_size) {
                let (inputs, labels) = batch_to_tensors(
                    &features,
                    &labels,
                    batch_size,
                    train_data.feature_dim(),
                    &self.device,
                )?;
                let threshold = self.threshold_multiplier();
                let step = self.model.forward_train(&inputs, &labels, threshold)?;
                let grads = step.loss.backward()?;
                self.optimizer.step(&grads)?;
                running.accumulate(&step.scalars, num_batches);
            }

            recorder.record(Partition::Train.as_str(), start.elapsed(), &running, Some(epoch))?;

            if let Some(sched) = self.threshold.as_mut() {
                let monitored = running.get(sched.monitor());
                sched.step(epoch, monitored);
            }

            if self.config.val_idx != -1 && (epoch as i64) % self.config.val_idx == 0 {
                if let Some(val) = val_data {
                    self.evaluate(val, Partition::Val, Some(epoch), recorder, checkpoint)?;
                }
            }
        }
        Ok(())
    }

    /// Evaluate one partition and, on strict accuracy improvement over the
    /// best seen so far, write a checkpoint. Returns the (possibly updated)
    /// best accuracy.
    ///
    /// The model runs in evaluation mode for the duration of the call;
    /// training mode is restored on every exit path, errors included.
    pub fn evaluate<R: Recorder, C: Checkpoint<M>>(
        &mut self,
        data: &impl BatchSource,
        partition: Partition,
        epoch: Option<usize>,
        recorder: &mut R,
        checkpoint: &mut C,
    ) -> Result<f64> {
        let start = Instant::now();
        let batch_size = self.config.batch_size;
        let num_batches = data.num_batches(batch_size);
        let mut running = RunningMetrics::new();

        {
            let model = EvalGuard::enter(&mut self.model);
            for (features, labels) in data.batches(batch_size) {
                let (inputs, labels) = batch_to_tensors(
                    &features,
                    &labels,
                    batch_size,
                    data.feature_dim(),
                    &self.device,
                )?;
                let scalars = model.forward_classification(&inputs, &labels)?;
                let scalars = model.forward_multi_pass(&inputs, &labels, scalars)?;
                running.accumulate(&scalars, num_batches);
            }
        }

        recorder.record(partition.as_str(), start.elapsed(), &running, epoch)?;

        let accuracy = running.get(metrics::CLASSIFICATION_ACCURACY);
        if accuracy > self.best_val_acc {
            self.best_val_acc = accuracy;
            checkpoint.save(&self.model)?;
        }
        Ok(self.best_val_acc)
    }
}

// ── Eval mode guard ─────────────────────────────────────────────────────────

/// Scoped evaluation mode: flips the model to eval on entry and restores
/// training mode when dropped, so early returns cannot leave the model stuck
/// in evaluation mode.
struct EvalGuard<'a, M: GoodnessModel> {
    model: &'a mut M,
}

impl<'a, M: GoodnessModel> EvalGuard<'a, M> {
    fn enter(model: &'a mut M) -> Self {
        model.set_train_mode(false);
        Self { model }
    }
}

impl<M: GoodnessModel> Drop for EvalGuard<'_, M> {
    fn drop(&mut self) {
        self.model.set_train_mode(true);
    }
}

impl<M: GoodnessModel> Deref for EvalGuard<'_, M> {
    type Target = M;
    fn deref(&self) -> &M {
        self.model
    }
}

impl<M: GoodnessModel> DerefMut for EvalGuard<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.model
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
