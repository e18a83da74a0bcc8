//! Forward-forward network: a stack of greedily-trained linear layers with a
//! downstream linear classifier.
//!
//! Each layer is trained on its own local loss: the *goodness* of a sample
//! (mean squared activation) should exceed the injected threshold for
//! positive samples (true label overlaid on the input) and fall below it for
//! negative samples (a random wrong label overlaid). Layer inputs are
//! detached, so gradients never cross layer boundaries.
//!
//! The classifier head never sees the label overlay — it runs on a neutral
//! (uniform) overlay and reads the normalised activations of every layer
//! after the first.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{linear, loss, Linear, Module, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ffwd_common::{metrics, ModelConfig, ScalarOutputs};

use crate::activation::{apply, softplus};
use crate::model::{GoodnessModel, TrainStep};

/// The forward-forward network. Owns its parameters via a [`VarMap`].
pub struct FfNet {
    layers: Vec<Linear>,
    classifier: Linear,
    varmap: VarMap,
    config: ModelConfig,
    device: Device,
    rng: StdRng,
    training: bool,
}

impl FfNet {
    /// Construct a fresh network with randomly initialised parameters.
    pub fn new(config: &ModelConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        Self::build(config, device, varmap, vb)
    }

    /// Restore a network from a checkpoint directory written by
    /// [`GoodnessModel::save`].
    pub fn load(dir: &Path, device: &Device) -> anyhow::Result<Self> {
        let config = ModelConfig::load(&dir.join("config.json"))?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let mut net = Self::build(&config, device, varmap, vb)?;
        net.varmap.load(dir.join("model.safetensors"))?;
        Ok(net)
    }

    fn build(
        config: &ModelConfig,
        device: &Device,
        varmap: VarMap,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(config.num_layers);
        let mut in_dim = config.input_dim;
        for i in 0..config.num_layers {
            layers.push(linear(in_dim, config.hidden_size, vb.pp(format!("layer.{i}")))?);
            in_dim = config.hidden_size;
        }
        // Features for the head: layers after the first.
        let feature_dim = config.hidden_size * (config.num_layers - 1);
        let classifier = linear(feature_dim, config.num_classes, vb.pp("classifier"))?;

        Ok(Self {
            layers,
            classifier,
            varmap,
            config: config.clone(),
            device: device.clone(),
            rng: StdRng::from_entropy(),
            training: true,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Parameter map, e.g. for handing the trainable vars to an optimizer.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    // ── Label overlay ───────────────────────────────────────────────────────

    /// One-hot rows for a slice of class labels.
    fn one_hot(&self, labels: &[u32]) -> Result<Tensor> {
        let c = self.config.num_classes;
        let mut values = vec![0f32; labels.len() * c];
        for (i, &y) in labels.iter().enumerate() {
            values[i * c + y as usize] = 1.0;
        }
        Tensor::from_vec(values, (labels.len(), c), &self.device)
    }

    /// Replace the first `num_classes` input columns with `label_block`.
    fn overlay(&self, inputs: &Tensor, label_block: &Tensor) -> Result<Tensor> {
        let c = self.config.num_classes;
        let rest = inputs.narrow(1, c, self.config.input_dim - c)?;
        Tensor::cat(&[label_block, &rest], 1)
    }

    /// Uniform overlay used for the classification pass.
    fn neutral_block(&self, batch: usize) -> Result<Tensor> {
        let c = self.config.num_classes;
        Tensor::full(1.0f32 / c as f32, (batch, c), &self.device)
    }

    /// A wrong label for every sample, drawn uniformly from the other classes.
    fn negative_labels(&mut self, labels: &[u32]) -> Vec<u32> {
        let c = self.config.num_classes as u32;
        labels
            .iter()
            .map(|&y| (y + self.rng.gen_range(1..c)) % c)
            .collect()
    }

    // ── Forward passes ──────────────────────────────────────────────────────

    /// Run every layer, returning each layer's activations. Inputs to each
    /// layer are detached so layer losses stay local.
    fn layer_activations(&self, x: &Tensor) -> Result<Vec<Tensor>> {
        let mut acts = Vec::with_capacity(self.layers.len());
        let mut h = x.clone();
        for layer in &self.layers {
            let z = apply(self.config.activation, &layer.forward(&normalize(&h)?)?)?;
            acts.push(z.clone());
            h = z.detach();
        }
        Ok(acts)
    }

    /// Normalised, detached activations of layers after the first,
    /// concatenated into the classifier's input.
    fn classifier_features(&self, acts: &[Tensor]) -> Result<Tensor> {
        let mut parts = Vec::with_capacity(acts.len() - 1);
        for z in &acts[1..] {
            parts.push(normalize(&z.detach())?);
        }
        Tensor::cat(&parts, 1)
    }

    /// Classifier logits on the neutral overlay.
    fn classification_logits(&self, inputs: &Tensor) -> Result<Tensor> {
        let batch = inputs.dim(0)?;
        let neutral = self.overlay(inputs, &self.neutral_block(batch)?)?;
        let acts = self.layer_activations(&neutral)?;
        self.classifier.forward(&self.classifier_features(&acts)?)
    }
}

impl GoodnessModel for FfNet {
    fn forward_train(
        &mut self,
        inputs: &Tensor,
        labels: &Tensor,
        threshold: f64,
    ) -> Result<TrainStep> {
        let labels_vec = labels.to_vec1::<u32>()?;

        let pos = self.overlay(inputs, &self.one_hot(&labels_vec)?)?;
        let neg_labels = self.negative_labels(&labels_vec);
        let neg = self.overlay(inputs, &self.one_hot(&neg_labels)?)?;

        let pos_acts = self.layer_activations(&pos)?;
        let neg_acts = self.layer_activations(&neg)?;

        // Layer-local goodness losses, summed. Positive goodness is pushed
        // above the threshold, negative goodness below it.
        let mut ff_loss: Option<Tensor> = None;
        for (z_pos, z_neg) in pos_acts.iter().zip(&neg_acts) {
            let g_pos = goodness(z_pos)?;
            let g_neg = goodness(z_neg)?;
            let l_pos = softplus(&g_pos.affine(-1.0, threshold)?)?.mean_all()?;
            let l_neg = softplus(&g_neg.affine(1.0, -threshold)?)?.mean_all()?;
            let layer_loss = (l_pos + l_neg)?;
            ff_loss = Some(match ff_loss {
                None => layer_loss,
                Some(acc) => (acc + layer_loss)?,
            });
        }
        let ff_loss = ff_loss.unwrap();

        // Downstream classifier on the neutral overlay; features are
        // detached, so this head trains without disturbing the layers.
        let logits = self.classification_logits(inputs)?;
        let cls_loss = loss::cross_entropy(&logits, labels)?;
        let accuracy = classification_accuracy(&logits, &labels_vec)?;

        let total = (&ff_loss + &cls_loss)?;

        let mut scalars = ScalarOutputs::new();
        scalars.insert(metrics::LOSS.to_string(), total.to_scalar::<f32>()? as f64);
        scalars.insert("ff_loss".to_string(), ff_loss.to_scalar::<f32>()? as f64);
        scalars.insert(
            "classification_loss".to_string(),
            cls_loss.to_scalar::<f32>()? as f64,
        );
        scalars.insert(metrics::CLASSIFICATION_ACCURACY.to_string(), accuracy);

        Ok(TrainStep {
            loss: total,
            scalars,
        })
    }

    fn forward_classification(&self, inputs: &Tensor, labels: &Tensor) -> Result<ScalarOutputs> {
        let labels_vec = labels.to_vec1::<u32>()?;
        let logits = self.classification_logits(inputs)?;
        let cls_loss = loss::cross_entropy(&logits, labels)?;
        let accuracy = classification_accuracy(&logits, &labels_vec)?;

        let mut scalars = ScalarOutputs::new();
        scalars.insert(
            "classification_loss".to_string(),
            cls_loss.to_scalar::<f32>()? as f64,
        );
        scalars.insert(metrics::CLASSIFICATION_ACCURACY.to_string(), accuracy);
        Ok(scalars)
    }

    fn forward_multi_pass(
        &self,
        inputs: &Tensor,
        labels: &Tensor,
        mut scalars: ScalarOutputs,
    ) -> Result<ScalarOutputs> {
        let labels_vec = labels.to_vec1::<u32>()?;
        let batch = inputs.dim(0)?;
        let c = self.config.num_classes;

        // One pass per candidate class: overlay its one-hot and accumulate
        // goodness over layers after the first. Highest total wins.
        let mut scores = vec![0f32; batch * c];
        for class in 0..c {
            let block = self.one_hot(&vec![class as u32; batch])?;
            let overlaid = self.overlay(inputs, &block)?;
            let acts = self.layer_activations(&overlaid)?;
            for z in &acts[1..] {
                let g = goodness(z)?.to_vec1::<f32>()?;
                for (i, gi) in g.into_iter().enumerate() {
                    scores[i * c + class] += gi;
                }
            }
        }

        let correct = labels_vec
            .iter()
            .enumerate()
            .filter(|(i, &y)| argmax(&scores[i * c..(i + 1) * c]) == y)
            .count();
        scalars.insert(
            metrics::MULTI_PASS_ACCURACY.to_string(),
            correct as f64 / batch.max(1) as f64,
        );
        Ok(scalars)
    }

    fn set_train_mode(&mut self, train: bool) {
        self.training = train;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn save(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("model.safetensors");
        self.varmap.save(&path)?;
        self.config.save(&dir.join("config.json"))?;
        Ok(path)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// L2-normalise each row.
fn normalize(x: &Tensor) -> Result<Tensor> {
    let norm = x.sqr()?.sum_keepdim(1)?.sqrt()?;
    x.broadcast_div(&norm.affine(1.0, 1e-8)?)
}

/// Mean squared activation per sample.
fn goodness(z: &Tensor) -> Result<Tensor> {
    z.sqr()?.mean(1)
}

/// Mean argmax-match between logit rows and labels.
fn classification_accuracy(logits: &Tensor, labels: &[u32]) -> Result<f64> {
    let rows: Vec<Vec<f32>> = logits.to_vec2()?;
    let correct = rows
        .iter()
        .zip(labels)
        .filter(|(row, &y)| argmax(row) == y)
        .count();
    Ok(correct as f64 / labels.len().max(1) as f64)
}

fn argmax(v: &[f32]) -> u32 {
    let mut best = 0usize;
    for (i, &x) in v.iter().enumerate() {
        if x > v[best] {
            best = i;
        }
    }
    best as u32
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ffwd_common::Activation;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            input_dim: 6,
            hidden_size: 8,
            num_layers: 2,
            num_classes: 3,
            activation: Activation::Relu,
            threshold: 2.0,
        }
    }

    fn batch(device: &Device) -> (Tensor, Tensor) {
        let inputs = Tensor::from_vec(
            (0..24).map(|v| v as f32 / 24.0).collect::<Vec<f32>>(),
            (4, 6),
            device,
        )
        .unwrap();
        let labels = Tensor::from_vec(vec![0u32, 1, 2, 1], (4,), device).unwrap();
        (inputs, labels)
    }

    #[test]
    fn train_step_reports_all_scalars() {
        let device = Device::Cpu;
        let mut net = FfNet::new(&tiny_config(), &device).unwrap();
        let (inputs, labels) = batch(&device);

        let step = net.forward_train(&inputs, &labels, 0.15).unwrap();
        for key in [
            metrics::LOSS,
            "ff_loss",
            "classification_loss",
            metrics::CLASSIFICATION_ACCURACY,
        ] {
            assert!(step.scalars.contains_key(key), "missing {key}");
        }
        assert!(step.scalars[metrics::LOSS].is_finite());
        assert_eq!(step.loss.dims().len(), 0);
    }

    #[test]
    fn overlay_replaces_label_columns_only() {
        let device = Device::Cpu;
        let net = FfNet::new(&tiny_config(), &device).unwrap();
        let (inputs, _) = batch(&device);

        let block = net.one_hot(&[2, 0, 1, 2]).unwrap();
        let overlaid = net.overlay(&inputs, &block).unwrap();
        let rows: Vec<Vec<f32>> = overlaid.to_vec2().unwrap();
        assert_eq!(&rows[0][..3], &[0.0, 0.0, 1.0]);
        // Columns past num_classes are untouched.
        let original: Vec<Vec<f32>> = inputs.to_vec2().unwrap();
        assert_eq!(&rows[0][3..], &original[0][3..]);
    }

    #[test]
    fn multi_pass_extends_primary_outputs() {
        let device = Device::Cpu;
        let net = FfNet::new(&tiny_config(), &device).unwrap();
        let (inputs, labels) = batch(&device);

        let primary = net.forward_classification(&inputs, &labels).unwrap();
        let extended = net
            .forward_multi_pass(&inputs, &labels, primary.clone())
            .unwrap();
        assert!(extended.contains_key(metrics::CLASSIFICATION_ACCURACY));
        let mp = extended[metrics::MULTI_PASS_ACCURACY];
        assert!((0.0..=1.0).contains(&mp));
        assert_eq!(
            primary[metrics::CLASSIFICATION_ACCURACY],
            extended[metrics::CLASSIFICATION_ACCURACY]
        );
    }

    #[test]
    fn mode_flag_toggles() {
        let device = Device::Cpu;
        let mut net = FfNet::new(&tiny_config(), &device).unwrap();
        assert!(net.is_training());
        net.set_train_mode(false);
        assert!(!net.is_training());
        net.set_train_mode(true);
        assert!(net.is_training());
    }

    #[test]
    fn save_then_load_restores_outputs() {
        let device = Device::Cpu;
        let net = FfNet::new(&tiny_config(), &device).unwrap();
        let (inputs, labels) = batch(&device);
        let before = net.forward_classification(&inputs, &labels).unwrap();

        let dir = tempfile::tempdir().unwrap();
        net.save(dir.path()).unwrap();
        let restored = FfNet::load(dir.path(), &device).unwrap();
        let after = restored.forward_classification(&inputs, &labels).unwrap();

        assert!(
            (before["classification_loss"] - after["classification_loss"]).abs() < 1e-6
        );
    }

    #[test]
    fn negative_labels_never_match() {
        let device = Device::Cpu;
        let mut net = FfNet::new(&tiny_config(), &device).unwrap();
        let labels: Vec<u32> = vec![0, 1, 2, 0, 1, 2, 0, 1];
        for _ in 0..20 {
            let neg = net.negative_labels(&labels);
            for (y, n) in labels.iter().zip(&neg) {
                assert_ne!(y, n);
                assert!(*n < 3);
            }
        }
    }
}
