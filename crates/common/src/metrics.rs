//! Per-phase running metrics.
//!
//! Every forward pass returns a map of named scalars; [`RunningMetrics`]
//! folds those per-batch maps into the phase mean by accumulating each value
//! weighted by `1 / num_batches`. One instance lives for exactly one phase
//! (a train epoch, or one validation/test pass) and is discarded after
//! reporting.

use std::collections::HashMap;

/// Key of the distinguished loss entry every training forward pass produces.
pub const LOSS: &str = "Loss";
/// Key of the downstream classifier accuracy (the checkpoint gate).
pub const CLASSIFICATION_ACCURACY: &str = "classification_accuracy";
/// Key of the label-overlay multi-pass accuracy.
pub const MULTI_PASS_ACCURACY: &str = "multi_pass_accuracy";

/// Named scalar outputs of a single forward pass.
pub type ScalarOutputs = HashMap<String, f64>;

/// Running mean accumulator over the scalar outputs of one phase.
#[derive(Debug, Clone, Default)]
pub struct RunningMetrics {
    values: HashMap<String, f64>,
}

impl RunningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one batch's outputs in, weighted by the phase's batch count.
    ///
    /// Keys absent from `values` are created at zero; keys absent from
    /// `outputs` are left untouched this call, so batches may report
    /// different key sets. NaN and overflow propagate untouched.
    pub fn accumulate(&mut self, outputs: &ScalarOutputs, num_batches: usize) {
        let weight = 1.0 / num_batches as f64;
        for (name, value) in outputs {
            *self.values.entry(name.clone()).or_insert(0.0) += value * weight;
        }
    }

    /// Accumulated value for `name`, or 0.0 when the metric never appeared.
    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries in name order, for deterministic reporting.
    pub fn iter_sorted(&self) -> Vec<(&str, f64)> {
        let mut entries: Vec<(&str, f64)> =
            self.values.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
