//! Learning rate and adaptive threshold schedules.

use anyhow::{bail, Result};
use ffwd_common::{ImproveMode, LrDecay, ThresholdConfig};

// ── LR Schedule ─────────────────────────────────────────────────────────────

/// Per-epoch learning rate: warmup → cosine / linear / constant decay.
///
/// The trainer reads the value at the top of every epoch and writes it into
/// the optimizer; the schedule itself holds no mutable state.
pub struct LrSchedule {
    lr: f64,
    lr_min: f64,
    warmup_epochs: usize,
    total_epochs: usize,
    decay: LrDecay,
}

impl LrSchedule {
    pub fn new(
        lr: f64,
        lr_min: f64,
        warmup_epochs: usize,
        total_epochs: usize,
        decay: LrDecay,
    ) -> Self {
        Self {
            lr,
            lr_min,
            warmup_epochs,
            total_epochs,
            decay,
        }
    }

    /// Learning rate for the given epoch.
    pub fn lr_for_epoch(&self, epoch: usize) -> f64 {
        // Warmup phase: linear ramp from 0 to lr.
        if self.warmup_epochs > 0 && epoch < self.warmup_epochs {
            return self.lr * (epoch as f64 + 1.0) / self.warmup_epochs as f64;
        }

        if self.total_epochs == 0 || self.decay == LrDecay::None {
            return self.lr;
        }

        let epoch = epoch.min(self.total_epochs);
        if epoch <= self.warmup_epochs {
            return self.lr;
        }

        let decay_epochs = (self.total_epochs - self.warmup_epochs).max(1);
        let progress = (epoch - self.warmup_epochs) as f64 / decay_epochs as f64;

        match self.decay {
            LrDecay::Cosine => {
                let cos = (std::f64::consts::PI * progress).cos();
                self.lr_min + 0.5 * (self.lr - self.lr_min) * (1.0 + cos)
            }
            LrDecay::Linear => self.lr - (self.lr - self.lr_min) * progress,
            LrDecay::None => self.lr,
        }
    }
}

// ── Threshold Scheduler ─────────────────────────────────────────────────────

/// Adaptive threshold multiplier under a patience policy.
///
/// Tracks the best value of one monitored metric. Each epoch without
/// improvement increments a counter; when the counter reaches `patience`
/// the multiplier is boosted by `rate` and the counter resets. Improvement
/// resets the counter and records the new best. Runs for the lifetime of
/// the training run — there is no terminal state.
pub struct ThresholdScheduler {
    multiplier: f64,
    rate: f64,
    patience: usize,
    mode: ImproveMode,
    monitor: String,
    best: f64,
    epochs_since_improvement: usize,
}

impl ThresholdScheduler {
    /// Construct from config. Invalid parameters (`rate ≤ 1`,
    /// `patience = 0`, non-positive multiplier) fail here, never at runtime.
    pub fn new(config: &ThresholdConfig) -> Result<Self> {
        if config.initial_multiplier <= 0.0 {
            bail!(
                "initial_multiplier must be positive, got {}",
                config.initial_multiplier
            );
        }
        if config.rate <= 1.0 {
            bail!("rate must exceed 1, got {}", config.rate);
        }
        if config.patience == 0 {
            bail!("patience must be positive");
        }
        Ok(Self {
            multiplier: config.initial_multiplier,
            rate: config.rate,
            patience: config.patience,
            mode: config.mode,
            monitor: config.monitor.clone(),
            best: match config.mode {
                ImproveMode::Min => f64::INFINITY,
                ImproveMode::Max => f64::NEG_INFINITY,
            },
            epochs_since_improvement: 0,
        })
    }

    /// The live multiplier. Read once per forward pass; only
    /// [`step`](Self::step) writes it, strictly between epochs.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Name of the metric this scheduler monitors.
    pub fn monitor(&self) -> &str {
        &self.monitor
    }

    pub fn epochs_since_improvement(&self) -> usize {
        self.epochs_since_improvement
    }

    /// Advance one epoch with the monitored value.
    pub fn step(&mut self, epoch: usize, monitored: f64) {
        let improved = match self.mode {
            ImproveMode::Min => monitored < self.best,
            ImproveMode::Max => monitored > self.best,
        };
        if improved {
            self.best = monitored;
            self.epochs_since_improvement = 0;
            return;
        }

        self.epochs_since_improvement += 1;
        if self.epochs_since_improvement >= self.patience {
            self.multiplier *= self.rate;
            self.epochs_since_improvement = 0;
            tracing::info!(
                epoch,
                multiplier = self.multiplier,
                monitor = %self.monitor,
                "threshold multiplier boosted"
            );
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(initial: f64, rate: f64, patience: usize, mode: ImproveMode) -> ThresholdScheduler {
        ThresholdScheduler::new(&ThresholdConfig {
            initial_multiplier: initial,
            rate,
            patience,
            mode,
            monitor: "Loss".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn rejects_invalid_parameters() {
        let mut config = ThresholdConfig::default();
        config.rate = 1.0;
        assert!(ThresholdScheduler::new(&config).is_err());
        config.rate = 0.9;
        assert!(ThresholdScheduler::new(&config).is_err());

        let mut config = ThresholdConfig::default();
        config.patience = 0;
        assert!(ThresholdScheduler::new(&config).is_err());

        let mut config = ThresholdConfig::default();
        config.initial_multiplier = -0.1;
        assert!(ThresholdScheduler::new(&config).is_err());
    }

    #[test]
    fn improvement_keeps_multiplier_fixed() {
        let mut sched = scheduler(0.15, 1.1, 3, ImproveMode::Min);
        let mut value = 10.0;
        for epoch in 0..50 {
            sched.step(epoch, value);
            value -= 0.1;
        }
        assert_eq!(sched.multiplier(), 0.15);
        assert_eq!(sched.epochs_since_improvement(), 0);
    }

    #[test]
    fn counter_never_exceeds_patience() {
        let mut sched = scheduler(0.15, 1.1, 4, ImproveMode::Min);
        for epoch in 0..100 {
            sched.step(epoch, 1.0);
            assert!(sched.epochs_since_improvement() <= 4);
        }
    }

    #[test]
    fn stagnation_grows_geometrically() {
        // First epoch establishes the best; every later epoch stagnates, so
        // after epoch E the multiplier is initial × rate^floor(E / patience).
        let patience = 5;
        let mut sched = scheduler(1.0, 2.0, patience, ImproveMode::Min);
        for epoch in 0..=23 {
            sched.step(epoch, 1.0);
            let expected = 2.0f64.powi((epoch / patience) as i32);
            assert!(
                (sched.multiplier() - expected).abs() < 1e-12,
                "epoch {epoch}: {} != {expected}",
                sched.multiplier()
            );
        }
    }

    #[test]
    fn multiplier_is_monotone_nondecreasing() {
        let mut sched = scheduler(0.15, 1.1, 3, ImproveMode::Min);
        let values = [5.0, 4.0, 4.5, 4.5, 4.5, 3.0, 3.0, 3.0, 3.0, 2.0, 6.0, 6.0];
        let mut last = sched.multiplier();
        for (epoch, v) in values.iter().enumerate() {
            sched.step(epoch, *v);
            assert!(sched.multiplier() >= last);
            last = sched.multiplier();
        }
    }

    #[test]
    fn max_mode_inverts_improvement() {
        let mut sched = scheduler(0.15, 1.1, 2, ImproveMode::Max);
        sched.step(0, 0.5); // establishes best
        sched.step(1, 0.6); // improvement
        assert_eq!(sched.multiplier(), 0.15);
        sched.step(2, 0.6); // not strict improvement
        sched.step(3, 0.4);
        assert!((sched.multiplier() - 0.15 * 1.1).abs() < 1e-12);
    }

    #[test]
    fn constant_metric_twenty_one_epochs() {
        let mut sched = scheduler(0.15, 1.1, 10, ImproveMode::Min);
        for epoch in 0..21 {
            sched.step(epoch, 0.42);
        }
        assert!((sched.multiplier() - 0.15 * 1.1 * 1.1).abs() < 1e-9);
    }

    #[test]
    fn lr_warmup() {
        let sched = LrSchedule::new(1e-3, 1e-6, 10, 100, LrDecay::Cosine);
        // Epoch 0: (0+1)/10 * 1e-3 = 1e-4
        assert!((sched.lr_for_epoch(0) - 1e-4).abs() < 1e-9);
        assert!((sched.lr_for_epoch(9) - 1e-3).abs() < 1e-9);
    }

    #[test]
    fn lr_cosine_midpoint() {
        let sched = LrSchedule::new(1e-3, 0.0, 0, 100, LrDecay::Cosine);
        // Midpoint of cosine: cos(π·0.5) = 0 → lr = 0.5 * 1e-3
        assert!((sched.lr_for_epoch(50) - 5e-4).abs() < 1e-6);
    }

    #[test]
    fn lr_no_decay() {
        let sched = LrSchedule::new(1e-3, 1e-6, 0, 100, LrDecay::None);
        assert!((sched.lr_for_epoch(50) - 1e-3).abs() < 1e-9);
        assert!((sched.lr_for_epoch(99) - 1e-3).abs() < 1e-9);
    }
}
