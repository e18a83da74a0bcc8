//! Run configuration for the ffwd harness.
//!
//! Serialised as JSON. Every field has a sensible default so a minimal `{}`
//! JSON produces a working (if small) experiment. Backwards-compatible:
//! missing fields fall back to their `#[serde(default)]` values.
//!
//! Invalid parameter combinations are rejected up front by
//! [`ExperimentConfig::validate`] — a bad scheduler rate or cadence is a
//! configuration error, never silently corrected at runtime.

use serde::{Deserialize, Serialize};

/// Top-level configuration: model, training loop, and the optional adaptive
/// threshold scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    /// Adaptive threshold scheduler. `None` means the model's base
    /// `threshold` is used unchanged for the whole run.
    #[serde(default)]
    pub scheduler: Option<ThresholdConfig>,
}

// ── Model ───────────────────────────────────────────────────────────────────

/// Hyper-parameters of the forward-forward network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Flattened input dimension. The first `num_classes` entries are
    /// overwritten by the label overlay, so `input_dim > num_classes`.
    pub input_dim: usize,
    /// Width of every hidden layer.
    pub hidden_size: usize,
    /// Number of hidden layers (at least 2 — the first layer is excluded
    /// from classification features and multi-pass goodness).
    pub num_layers: usize,
    /// Number of target classes.
    pub num_classes: usize,
    /// Post-layer activation, selected by key.
    #[serde(default)]
    pub activation: Activation,
    /// Base goodness threshold, used when no scheduler is configured.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_dim: 784,
            hidden_size: 500,
            num_layers: 3,
            num_classes: 10,
            activation: Activation::default(),
            threshold: 2.0,
        }
    }
}

/// Activations applicable after each hidden layer.
///
/// A closed set selected by configuration key; the tensor-level application
/// lives in `ffwd-core`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Gelu,
    Sigmoid,
    Silu,
}

// ── Training loop ───────────────────────────────────────────────────────────

/// Training-loop knobs: epoch count, validation cadence, learning-rate
/// schedule parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Validation cadence in epochs. `-1` disables validation entirely.
    #[serde(default = "default_val_idx")]
    pub val_idx: i64,
    /// Run the held-out test partition once after training.
    #[serde(default)]
    pub final_test: bool,
    pub learning_rate: f64,
    #[serde(default)]
    pub lr_min: f64,
    #[serde(default)]
    pub lr_warmup_epochs: usize,
    #[serde(default)]
    pub lr_decay: LrDecay,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 100,
            val_idx: 10,
            final_test: false,
            learning_rate: 1e-3,
            lr_min: 0.0,
            lr_warmup_epochs: 0,
            lr_decay: LrDecay::default(),
        }
    }
}

/// Per-epoch learning-rate decay mode after warmup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LrDecay {
    #[default]
    Cosine,
    Linear,
    None,
}

// ── Threshold scheduler ─────────────────────────────────────────────────────

/// Parameters of the adaptive threshold scheduler: the multiplier grows by
/// `rate` whenever the monitored metric fails to improve for `patience`
/// consecutive epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub initial_multiplier: f64,
    pub rate: f64,
    pub patience: usize,
    /// Improvement direction of the monitored metric.
    #[serde(default)]
    pub mode: ImproveMode,
    /// Name of the epoch-level train metric the scheduler monitors.
    #[serde(default = "default_monitor")]
    pub monitor: String,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            initial_multiplier: 0.15,
            rate: 1.1,
            patience: 10,
            mode: ImproveMode::default(),
            monitor: default_monitor(),
        }
    }
}

/// Whether a lower or a higher monitored value counts as improvement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImproveMode {
    #[default]
    Min,
    Max,
}

// ── Default value functions ─────────────────────────────────────────────────

fn default_threshold() -> f64 {
    2.0
}
fn default_val_idx() -> i64 {
    10
}
fn default_monitor() -> String {
    "Loss".to_string()
}

// ── Impl ────────────────────────────────────────────────────────────────────

impl ExperimentConfig {
    /// Save config to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Reject invalid parameter combinations before any work starts.
    pub fn validate(&self) -> anyhow::Result<()> {
        let m = &self.model;
        if m.num_classes < 2 {
            anyhow::bail!("num_classes must be at least 2, got {}", m.num_classes);
        }
        if m.input_dim <= m.num_classes {
            anyhow::bail!(
                "input_dim ({}) must exceed num_classes ({}): the label overlay occupies the first num_classes inputs",
                m.input_dim,
                m.num_classes,
            );
        }
        if m.hidden_size == 0 {
            anyhow::bail!("hidden_size must be positive");
        }
        if m.num_layers < 2 {
            anyhow::bail!("num_layers must be at least 2, got {}", m.num_layers);
        }
        if m.threshold <= 0.0 {
            anyhow::bail!("threshold must be positive, got {}", m.threshold);
        }

        let t = &self.training;
        if t.epochs == 0 {
            anyhow::bail!("epochs must be positive");
        }
        if t.batch_size == 0 {
            anyhow::bail!("batch_size must be positive");
        }
        if t.learning_rate <= 0.0 {
            anyhow::bail!("learning_rate must be positive, got {}", t.learning_rate);
        }
        if t.val_idx != -1 && t.val_idx < 1 {
            anyhow::bail!(
                "val_idx must be a positive cadence or -1 to disable, got {}",
                t.val_idx
            );
        }

        if let Some(s) = &self.scheduler {
            if s.initial_multiplier <= 0.0 {
                anyhow::bail!(
                    "scheduler initial_multiplier must be positive, got {}",
                    s.initial_multiplier
                );
            }
            if s.rate <= 1.0 {
                anyhow::bail!("scheduler rate must exceed 1, got {}", s.rate);
            }
            if s.patience == 0 {
                anyhow::bail!("scheduler patience must be positive");
            }
            if s.monitor.is_empty() {
                anyhow::bail!("scheduler monitor metric name must not be empty");
            }
        }
        Ok(())
    }
}

impl ModelConfig {
    /// Save config to a JSON file (stored alongside checkpointed weights).
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
