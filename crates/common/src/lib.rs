//! # ffwd-common — Shared Primitives
//!
//! Types and utilities shared across every crate in the workspace:
//!
//! * **[`ExperimentConfig`]** — run configuration (serialised as JSON).
//! * **[`RunningMetrics`]** / **[`ScalarOutputs`]** — per-phase mean
//!   tracking over named scalar outputs.
//! * **[`VectorDataset`]** / **[`BatchSource`]** — data loading & batching.
//! * **[`batch_to_tensors`]** — raw batch → device-placed Candle tensors.

pub mod config;
pub mod data;
pub mod metrics;

pub use config::{
    Activation, ExperimentConfig, ImproveMode, LrDecay, ModelConfig, ThresholdConfig,
    TrainingConfig,
};
pub use data::{batch_to_tensors, BatchSource, Partition, VectorDataset};
pub use metrics::{RunningMetrics, ScalarOutputs};
