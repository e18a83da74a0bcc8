//! Data pipeline: partitioned feature-vector datasets and batching.
//!
//! Samples are JSONL records (`{"features": [...], "label": n}`), one file
//! (or directory of files) per partition. Batches are `(features, labels)`
//! raw vectors; [`batch_to_tensors`] performs the device placement right
//! before the forward pass.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyhowResult};
use candle_core::{Device, Result, Tensor};
use rand::seq::SliceRandom;
use serde::Deserialize;

// ── Partition ───────────────────────────────────────────────────────────────

/// A named data split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Train,
    Val,
    Test,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Val => "val",
            Partition::Test => "test",
        }
    }

    /// Conventional file name of this partition inside a dataset directory.
    pub fn file_name(&self) -> String {
        format!("{}.jsonl", self.as_str())
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Partition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "train" => Ok(Partition::Train),
            "val" => Ok(Partition::Val),
            "test" => Ok(Partition::Test),
            other => Err(format!("unknown partition: {other}")),
        }
    }
}

// ── VectorDataset ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SampleRecord {
    features: Vec<f32>,
    label: u32,
}

/// In-memory dataset of fixed-width feature vectors with class labels.
pub struct VectorDataset {
    features: Vec<f32>,
    labels: Vec<u32>,
    feature_dim: usize,
}

impl VectorDataset {
    /// Load a partition from a JSONL file or a directory of JSONL files.
    ///
    /// Every record must carry exactly `feature_dim` features; a mismatch is
    /// a data/config inconsistency and fails the load.
    pub fn load(path: &Path, feature_dim: usize) -> AnyhowResult<Self> {
        let mut dataset = Self {
            features: Vec::new(),
            labels: Vec::new(),
            feature_dim,
        };
        for file in collect_files(path)? {
            dataset.load_file(&file)?;
        }
        Ok(dataset)
    }

    /// Build a dataset from already-materialised samples.
    pub fn from_parts(
        features: Vec<f32>,
        labels: Vec<u32>,
        feature_dim: usize,
    ) -> AnyhowResult<Self> {
        if feature_dim == 0 || features.len() != labels.len() * feature_dim {
            anyhow::bail!(
                "inconsistent dataset: {} feature values for {} samples of width {}",
                features.len(),
                labels.len(),
                feature_dim,
            );
        }
        Ok(Self {
            features,
            labels,
            feature_dim,
        })
    }

    fn load_file(&mut self, path: &Path) -> AnyhowResult<()> {
        let reader = BufReader::new(File::open(path).context("open dataset file")?);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: SampleRecord = serde_json::from_str(line)
                .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
            if record.features.len() != self.feature_dim {
                anyhow::bail!(
                    "{}:{}: expected {} features, got {}",
                    path.display(),
                    line_no + 1,
                    self.feature_dim,
                    record.features.len(),
                );
            }
            self.features.extend(record.features);
            self.labels.push(record.label);
        }
        Ok(())
    }

    pub fn num_samples(&self) -> usize {
        self.labels.len()
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Shuffle samples in place.
    pub fn shuffle<R: rand::Rng>(&mut self, rng: &mut R) {
        let n = self.num_samples();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);

        let dim = self.feature_dim;
        let mut features = Vec::with_capacity(self.features.len());
        let mut labels = Vec::with_capacity(n);
        for i in order {
            features.extend_from_slice(&self.features[i * dim..(i + 1) * dim]);
            labels.push(self.labels[i]);
        }
        self.features = features;
        self.labels = labels;
    }

    /// Yield `(features, labels)` batches. Only full batches are produced;
    /// the remainder is dropped.
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> impl Iterator<Item = (Vec<f32>, Vec<u32>)> + '_ {
        let dim = self.feature_dim;
        let total = self.num_samples();
        let mut start = 0usize;
        std::iter::from_fn(move || {
            if batch_size == 0 || start + batch_size > total {
                return None;
            }
            let features = self.features[start * dim..(start + batch_size) * dim].to_vec();
            let labels = self.labels[start..start + batch_size].to_vec();
            start += batch_size;
            Some((features, labels))
        })
    }

    pub fn num_batches(&self, batch_size: usize) -> usize {
        if batch_size == 0 {
            0
        } else {
            self.num_samples() / batch_size
        }
    }
}

// ── BatchSource trait ───────────────────────────────────────────────────────

/// Common interface for sources that yield `(features, labels)` batches with
/// a known batch count.
pub trait BatchSource {
    fn num_samples(&self) -> usize;
    fn feature_dim(&self) -> usize;
    fn num_batches(&self, batch_size: usize) -> usize;
    fn batches(
        &self,
        batch_size: usize,
    ) -> Box<dyn Iterator<Item = (Vec<f32>, Vec<u32>)> + '_>;
}

impl BatchSource for VectorDataset {
    fn num_samples(&self) -> usize {
        self.num_samples()
    }
    fn feature_dim(&self) -> usize {
        self.feature_dim()
    }
    fn num_batches(&self, batch_size: usize) -> usize {
        self.num_batches(batch_size)
    }
    fn batches(
        &self,
        batch_size: usize,
    ) -> Box<dyn Iterator<Item = (Vec<f32>, Vec<u32>)> + '_> {
        Box::new(self.batches(batch_size))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Convert a raw batch to device-placed Candle tensors: inputs
/// `(batch_size, feature_dim)` f32, labels `(batch_size,)` u32.
pub fn batch_to_tensors(
    features: &[f32],
    labels: &[u32],
    batch_size: usize,
    feature_dim: usize,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let inputs = Tensor::from_vec(features.to_vec(), (batch_size, feature_dim), device)?;
    let labels = Tensor::from_vec(labels.to_vec(), (batch_size,), device)?;
    Ok((inputs, labels))
}

/// Collect JSONL files from a path (file or directory), sorted.
fn collect_files(path: &Path) -> AnyhowResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    if path.is_file() {
        out.push(path.to_path_buf());
    } else if path.is_dir() {
        let mut entries: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .map(|e| e == "jsonl" || e == "json")
                        .unwrap_or(false)
            })
            .collect();
        entries.sort();
        out = entries;
    } else {
        anyhow::bail!("path is neither file nor directory: {}", path.display());
    }
    Ok(out)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_dataset() -> VectorDataset {
        // 5 samples of width 3
        let features: Vec<f32> = (0..15).map(|v| v as f32).collect();
        let labels = vec![0, 1, 0, 1, 0];
        VectorDataset::from_parts(features, labels, 3).unwrap()
    }

    #[test]
    fn batches_drop_remainder() {
        let ds = sample_dataset();
        assert_eq!(ds.num_batches(2), 2);
        let batches: Vec<_> = ds.batches(2).collect();
        assert_eq!(batches.len(), 2);
        let (features, labels) = &batches[0];
        assert_eq!(features, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(labels, &[0, 1]);
    }

    #[test]
    fn shuffle_preserves_sample_pairing() {
        let mut ds = sample_dataset();
        let mut rng = rand::rngs::mock::StepRng::new(13, 7);
        ds.shuffle(&mut rng);
        assert_eq!(ds.num_samples(), 5);
        // Each sample row starts at a multiple of 3 of the original layout,
        // and its label must still match (rows 0,2,4 -> 0; rows 1,3 -> 1).
        for (features, labels) in ds.batches(1) {
            let row = (features[0] as usize) / 3;
            assert_eq!(labels[0], (row % 2) as u32);
        }
    }

    #[test]
    fn load_rejects_width_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.jsonl");
        let mut f = File::create(&path).unwrap();
        writeln!(f, r#"{{"features": [0.1, 0.2], "label": 1}}"#).unwrap();
        assert!(VectorDataset::load(&path, 3).is_err());
    }

    #[test]
    fn load_jsonl_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.jsonl");
        let mut f = File::create(&path).unwrap();
        writeln!(f, r#"{{"features": [0.5, 0.25, 0.0], "label": 2}}"#).unwrap();
        writeln!(f).unwrap();
        writeln!(f, r#"{{"features": [1.0, 0.75, 0.5], "label": 0}}"#).unwrap();

        let ds = VectorDataset::load(&path, 3).unwrap();
        assert_eq!(ds.num_samples(), 2);
        let (features, labels) = ds.batches(2).next().unwrap();
        assert_eq!(labels, vec![2, 0]);
        assert_eq!(features[3], 1.0);
    }

    #[test]
    fn tensors_have_expected_shapes() {
        let ds = sample_dataset();
        let (features, labels) = ds.batches(2).next().unwrap();
        let (inputs, labels) =
            batch_to_tensors(&features, &labels, 2, 3, &Device::Cpu).unwrap();
        assert_eq!(inputs.dims(), &[2, 3]);
        assert_eq!(labels.dims(), &[2]);
    }

    #[test]
    fn partition_names_round_trip() {
        for p in [Partition::Train, Partition::Val, Partition::Test] {
            assert_eq!(p.as_str().parse::<Partition>().unwrap(), p);
        }
        assert!("dev".parse::<Partition>().is_err());
    }
}
