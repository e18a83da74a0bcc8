//! Checkpoint sink for best-model selection.

use std::path::PathBuf;

use anyhow::Result;
use ffwd_core::GoodnessModel;

/// Fire-and-forget model persistence, invoked only on accuracy improvement.
pub trait Checkpoint<M> {
    fn save(&mut self, model: &M) -> Result<()>;
}

/// Writes the model into a fixed directory, overwriting the previous best.
pub struct DiskCheckpoint {
    dir: PathBuf,
}

impl DiskCheckpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl<M: GoodnessModel> Checkpoint<M> for DiskCheckpoint {
    fn save(&mut self, model: &M) -> Result<()> {
        let path = model.save(&self.dir)?;
        tracing::info!(path = %path.display(), "saved best model");
        Ok(())
    }
}
