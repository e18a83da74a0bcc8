//! Pointwise activation application.
//!
//! The activation is a closed set of variants chosen by configuration key
//! ([`Activation`]); this module maps each tag to its Candle op.

use candle_core::{Result, Tensor};
use ffwd_common::Activation;

/// Apply the configured activation elementwise.
pub fn apply(activation: Activation, x: &Tensor) -> Result<Tensor> {
    match activation {
        Activation::Relu => x.relu(),
        Activation::Tanh => x.tanh(),
        Activation::Gelu => x.gelu(),
        Activation::Sigmoid => candle_nn::ops::sigmoid(x),
        Activation::Silu => candle_nn::ops::silu(x),
    }
}

/// Numerically stable softplus: `ln(1 + e^x) = relu(x) + ln(1 + e^-|x|)`.
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    x.relu()? + tail
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn tensor(values: &[f32]) -> Tensor {
        Tensor::from_vec(values.to_vec(), (values.len(),), &Device::Cpu).unwrap()
    }

    #[test]
    fn relu_clamps_negatives() {
        let y = apply(Activation::Relu, &tensor(&[-1.0, 0.0, 2.0])).unwrap();
        assert_eq!(y.to_vec1::<f32>().unwrap(), vec![0.0, 0.0, 2.0]);
    }

    #[test]
    fn sigmoid_midpoint() {
        let y = apply(Activation::Sigmoid, &tensor(&[0.0])).unwrap();
        assert!((y.to_vec1::<f32>().unwrap()[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn softplus_at_zero_is_ln_two() {
        let y = softplus(&tensor(&[0.0])).unwrap();
        assert!((y.to_vec1::<f32>().unwrap()[0] - 2.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn softplus_is_stable_for_large_inputs() {
        let y = softplus(&tensor(&[80.0, -80.0])).unwrap();
        let v = y.to_vec1::<f32>().unwrap();
        assert!((v[0] - 80.0).abs() < 1e-3);
        assert!(v[1].abs() < 1e-3);
        assert!(v.iter().all(|x| x.is_finite()));
    }
}
