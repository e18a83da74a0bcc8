//! # ffwd-train — The Control Loop
//!
//! Training, validation, and checkpoint selection for goodness-trained
//! models:
//!
//! * **[`Trainer`]** — owns model + optimizer + schedules. One call to
//!   [`Trainer::train`] runs the full epoch/batch loop; [`Trainer::evaluate`]
//!   runs one inference-only pass over a partition and gates checkpoints on
//!   accuracy improvement.
//! * **[`ThresholdScheduler`]** — patience-based threshold multiplier growth.
//! * **[`LrSchedule`]** — per-epoch warmup → cosine / linear / constant.
//! * **[`Recorder`]** / **[`RunRecorder`]** — run-scoped metric reporting.
//! * **[`Checkpoint`]** / **[`DiskCheckpoint`]** — best-model persistence.

pub mod checkpoint;
pub mod recorder;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{Checkpoint, DiskCheckpoint};
pub use recorder::{Recorder, RunRecorder};
pub use scheduler::{LrSchedule, ThresholdScheduler};
pub use trainer::Trainer;
