//! Neural network layer implementations
//!
//! All layers work channels-last: a 1D batch is `[batch, length, channels]`,
//! a 2D batch is `[batch, height, width, channels]`.

use super::init::Initializer;
use crate::error::{ensure_positive, Error, Result};
use ndarray::{s, Array, Array1, Array2, Array3, Axis, Dimension, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Padding mode for convolutions and pooling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    /// Pad so that `output = ceil(input / stride)`
    Same,
    /// No padding, only full windows
    Valid,
}

impl Padding {
    /// Output size along one spatial axis
    pub fn output_size(&self, input: usize, kernel: usize, stride: usize) -> usize {
        match self {
            Padding::Same => input.div_ceil(stride),
            Padding::Valid => {
                if input >= kernel {
                    (input - kernel) / stride + 1
                } else {
                    0
                }
            }
        }
    }

    /// Zeros inserted before the first element; any odd remainder goes after
    pub fn pad_before(&self, input: usize, kernel: usize, stride: usize) -> usize {
        match self {
            Padding::Valid => 0,
            Padding::Same => {
                let out = self.output_size(input, kernel, stride);
                let total = (out.saturating_sub(1) * stride + kernel).saturating_sub(input);
                total / 2
            }
        }
    }
}

/// 1D Convolutional layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv1d {
    /// Kernel, rows ordered by (tap, input channel): [kernel_size * in_channels, out_channels]
    pub weight: Array2<f32>,
    /// Bias vector [out_channels]
    pub bias: Array1<f32>,
    /// Stride
    pub stride: usize,
    /// Padding
    pub padding: Padding,
    /// Input channels
    pub in_channels: usize,
    /// Output channels
    pub out_channels: usize,
    /// Kernel size
    pub kernel_size: usize,
}

impl Conv1d {
    /// Create a new Conv1d layer with a zero bias
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: Padding,
        init: Initializer,
        rng: &mut R,
    ) -> Result<Self> {
        ensure_positive("in_channels", in_channels)?;
        ensure_positive("filters", out_channels)?;
        ensure_positive("kernel_size", kernel_size)?;
        ensure_positive("stride", stride)?;

        let fan_in = kernel_size * in_channels;
        let fan_out = kernel_size * out_channels;
        let weight = init.matrix(fan_in, out_channels, fan_in, fan_out, rng);

        Ok(Self {
            weight,
            bias: Array1::zeros(out_channels),
            stride,
            padding,
            in_channels,
            out_channels,
            kernel_size,
        })
    }

    /// Output length for a given input length
    pub fn output_len(&self, len: usize) -> usize {
        self.padding.output_size(len, self.kernel_size, self.stride)
    }

    /// Forward pass
    /// Input shape: [batch, length, in_channels]
    /// Output shape: [batch, new_length, out_channels]
    pub fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>> {
        let (batch_size, in_len, in_channels) = input.dim();
        ensure_channels("conv1d", self.in_channels, in_channels)?;

        let out_len = self.output_len(in_len);
        let pad = self.padding.pad_before(in_len, self.kernel_size, self.stride);
        let mut output = Array3::zeros((batch_size, out_len, self.out_channels));
        let mut patches = Array2::<f32>::zeros((out_len, self.kernel_size * in_channels));

        for (b, sample) in input.outer_iter().enumerate() {
            patches.fill(0.0);
            for o in 0..out_len {
                for k in 0..self.kernel_size {
                    let pos = (o * self.stride + k) as isize - pad as isize;
                    if pos < 0 || pos as usize >= in_len {
                        continue;
                    }
                    patches
                        .slice_mut(s![o, k * in_channels..(k + 1) * in_channels])
                        .assign(&sample.row(pos as usize));
                }
            }

            let mut out = patches.dot(&self.weight);
            out += &self.bias;
            output.index_axis_mut(Axis(0), b).assign(&out);
        }

        Ok(output)
    }

    /// Get number of parameters
    pub fn num_params(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// Batch normalization over the last (channel) axis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNorm {
    /// Number of features (channels)
    pub num_features: usize,
    /// Scale parameter (gamma)
    pub gamma: Array1<f32>,
    /// Shift parameter (beta)
    pub beta: Array1<f32>,
    /// Running mean
    pub running_mean: Array1<f32>,
    /// Running variance
    pub running_var: Array1<f32>,
    /// Small constant for numerical stability
    pub eps: f32,
    /// Momentum for running stats
    pub momentum: f32,
    /// Training mode
    pub training: bool,
}

impl BatchNorm {
    /// Create a new BatchNorm layer in inference mode
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            gamma: Array1::ones(num_features),
            beta: Array1::zeros(num_features),
            running_mean: Array1::zeros(num_features),
            running_var: Array1::ones(num_features),
            eps: 1e-3,
            momentum: 0.99,
            training: false,
        }
    }

    /// Forward pass on any rank, channels last
    pub fn forward<D: Dimension>(&self, input: &Array<f32, D>) -> Result<Array<f32, D>> {
        let channels = input.shape().last().copied().unwrap_or(0);
        ensure_channels("batch_normalization", self.num_features, channels)?;
        let channel_axis = Axis(input.ndim() - 1);

        let (mean, var) = if self.training {
            self.batch_statistics(input)
        } else {
            (self.running_mean.clone(), self.running_var.clone())
        };

        let scale = &self.gamma / &var.mapv(|v| (v + self.eps).sqrt());
        let shift = &self.beta - &(&mean * &scale);

        let mut output = input.to_owned();
        for mut lane in output.lanes_mut(channel_axis) {
            Zip::from(&mut lane)
                .and(&scale)
                .and(&shift)
                .for_each(|x, &a, &b| *x = *x * a + b);
        }

        Ok(output)
    }

    /// Per-channel mean and (biased) variance over every non-channel axis
    fn batch_statistics<D: Dimension>(&self, input: &Array<f32, D>) -> (Array1<f32>, Array1<f32>) {
        let channel_axis = Axis(input.ndim() - 1);
        let mut sum = Array1::<f32>::zeros(self.num_features);
        let mut sq_sum = Array1::<f32>::zeros(self.num_features);
        let mut count = 0usize;

        for lane in input.lanes(channel_axis) {
            Zip::from(&mut sum)
                .and(&mut sq_sum)
                .and(&lane)
                .for_each(|s, q, &x| {
                    *s += x;
                    *q += x * x;
                });
            count += 1;
        }

        let n = count.max(1) as f32;
        let mean = sum / n;
        let var = (sq_sum / n - &mean * &mean).mapv(|v| v.max(0.0));
        (mean, var)
    }

    /// Set training mode
    pub fn train(&mut self, mode: bool) {
        self.training = mode;
    }

    /// Gamma, beta and the two running statistics
    pub fn num_params(&self) -> usize {
        self.num_features * 4
    }
}

/// ReLU activation function
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReLU;

impl ReLU {
    /// Create a new ReLU layer
    pub fn new() -> Self {
        Self
    }

    /// In-place forward pass
    pub fn forward_inplace<D: Dimension>(&self, input: &mut Array<f32, D>) {
        input.mapv_inplace(|x| x.max(0.0));
    }
}

/// Average Pooling 1D
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvgPool1d {
    /// Window size
    pub pool_size: usize,
    /// Stride
    pub stride: usize,
    /// Padding
    pub padding: Padding,
}

impl AvgPool1d {
    /// Non-overlapping pooling: stride equals the window, valid padding
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            stride: pool_size,
            padding: Padding::Valid,
        }
    }

    /// Output length for a given input length
    pub fn output_len(&self, len: usize) -> usize {
        self.padding.output_size(len, self.pool_size, self.stride)
    }

    /// Forward pass
    /// Input shape: [batch, length, channels]
    pub fn forward(&self, input: &Array3<f32>) -> Array3<f32> {
        let (batch_size, in_len, channels) = input.dim();
        let out_len = self.output_len(in_len);
        let pad = self.padding.pad_before(in_len, self.pool_size, self.stride);
        let mut output = Array3::zeros((batch_size, out_len, channels));

        for b in 0..batch_size {
            for o in 0..out_len {
                let start = (o * self.stride) as isize - pad as isize;
                let lo = start.max(0) as usize;
                let hi = ((start + self.pool_size as isize) as usize).min(in_len);
                if hi <= lo {
                    continue;
                }
                let window = input.slice(s![b, lo..hi, ..]);
                if let Some(mean) = window.mean_axis(Axis(0)) {
                    output.slice_mut(s![b, o, ..]).assign(&mean);
                }
            }
        }

        output
    }
}

/// Dense (fully connected) layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    /// Weight matrix [in_features, out_features]
    pub weight: Array2<f32>,
    /// Bias vector [out_features]
    pub bias: Array1<f32>,
    /// Input features
    pub in_features: usize,
    /// Output features
    pub out_features: usize,
}

impl Dense {
    /// Create a new Dense layer with Glorot-uniform weights and zero bias
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        rng: &mut R,
    ) -> Result<Self> {
        ensure_positive("in_features", in_features)?;
        ensure_positive("units", out_features)?;

        let weight = Initializer::GlorotUniform.matrix(
            in_features,
            out_features,
            in_features,
            out_features,
            rng,
        );

        Ok(Self {
            weight,
            bias: Array1::zeros(out_features),
            in_features,
            out_features,
        })
    }

    /// Forward pass
    /// Input shape: [batch, in_features]
    /// Output shape: [batch, out_features]
    pub fn forward(&self, input: &Array2<f32>) -> Result<Array2<f32>> {
        ensure_channels("dense", self.in_features, input.ncols())?;
        let mut output = input.dot(&self.weight);
        output += &self.bias;
        Ok(output)
    }

    /// Get number of parameters
    pub fn num_params(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// Collapse every axis but the batch axis, in row-major order
pub fn flatten<D: Dimension>(input: &Array<f32, D>) -> Result<Array2<f32>> {
    let shape = input.shape();
    let batch_size = shape[0];
    let features: usize = shape[1..].iter().product();

    let flat = input
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((batch_size, features))?;
    Ok(flat)
}

/// Row-wise softmax
pub fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();

    for mut row in probs.rows_mut() {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exp_sum: f32 = row.iter().map(|&x| (x - max).exp()).sum();

        for val in row.iter_mut() {
            *val = (*val - max).exp() / exp_sum;
        }
    }

    probs
}

/// Fail when the last axis of an input disagrees with what a layer was built for
pub(crate) fn ensure_channels(layer: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::ShapeMismatch {
            expected: format!("{} input channels for {}", expected, layer),
            got: format!("{} input channels", got),
        });
    }
    Ok(())
}

/// Fail when a layer would produce a zero-sized axis
pub(crate) fn ensure_nonempty(layer: &str, input: &[usize], output: &[usize]) -> Result<()> {
    if output.iter().any(|&d| d == 0) {
        return Err(Error::EmptyOutput {
            layer: layer.to_string(),
            input: format!("{:?}", input),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::init::make_rng;
    use approx::assert_relative_eq;

    fn conv1d(in_c: usize, out_c: usize, k: usize, stride: usize, padding: Padding) -> Conv1d {
        let mut rng = make_rng(Some(42));
        Conv1d::new(
            in_c,
            out_c,
            k,
            stride,
            padding,
            Initializer::GlorotUniform,
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn test_same_padding_arithmetic() {
        // Even kernel, stride 1: 9 zeros total, 4 before, 5 after
        assert_eq!(Padding::Same.output_size(100, 10, 1), 100);
        assert_eq!(Padding::Same.pad_before(100, 10, 1), 4);

        // Stride 2 rounds up
        assert_eq!(Padding::Same.output_size(101, 5, 2), 51);
        assert_eq!(Padding::Same.pad_before(101, 5, 2), 2);

        // 1x1 projection needs no padding
        assert_eq!(Padding::Same.pad_before(100, 1, 2), 0);
    }

    #[test]
    fn test_valid_padding_arithmetic() {
        assert_eq!(Padding::Valid.output_size(50, 5, 5), 10);
        assert_eq!(Padding::Valid.output_size(54, 5, 5), 10);
        assert_eq!(Padding::Valid.output_size(4, 5, 5), 0);
        assert_eq!(Padding::Valid.pad_before(50, 5, 5), 0);
    }

    #[test]
    fn test_conv1d_forward_same() {
        let conv = conv1d(2, 4, 10, 1, Padding::Same);
        let input = Array3::ones((1, 20, 2));
        let output = conv.forward(&input).unwrap();
        assert_eq!(output.dim(), (1, 20, 4));
    }

    #[test]
    fn test_conv1d_forward_strided() {
        let conv = conv1d(3, 8, 5, 2, Padding::Same);
        let input = Array3::ones((2, 25, 3));
        let output = conv.forward(&input).unwrap();
        assert_eq!(output.dim(), (2, 13, 8));
    }

    #[test]
    fn test_conv1d_known_values() {
        let mut conv = conv1d(1, 1, 3, 1, Padding::Same);
        conv.weight.fill(1.0);
        conv.bias.fill(0.5);

        let input = Array3::from_shape_vec((1, 4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let output = conv.forward(&input).unwrap();

        // Window sums with one zero on each side, plus bias
        let expected = [3.5, 6.5, 9.5, 7.5];
        for (got, want) in output.iter().zip(expected.iter()) {
            assert_relative_eq!(*got, *want, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_conv1d_rejects_wrong_channel_count() {
        let conv = conv1d(4, 4, 3, 1, Padding::Same);
        let err = conv.forward(&Array3::ones((1, 10, 2))).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_conv1d_rejects_zero_filters() {
        let mut rng = make_rng(Some(1));
        let err = Conv1d::new(1, 0, 3, 1, Padding::Same, Initializer::HeNormal, &mut rng)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { name: "filters", .. }));
    }

    #[test]
    fn test_conv1d_num_params() {
        let conv = conv1d(32, 64, 5, 2, Padding::Same);
        assert_eq!(conv.num_params(), 5 * 32 * 64 + 64);
    }

    #[test]
    fn test_batchnorm_inference_is_near_identity() {
        let bn = BatchNorm::new(3);
        let input = Array3::from_elem((2, 4, 3), 2.0);
        let output = bn.forward(&input).unwrap();

        assert_eq!(output.dim(), (2, 4, 3));
        let expected = 2.0 / (1.0f32 + 1e-3).sqrt();
        for &v in output.iter() {
            assert_relative_eq!(v, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_batchnorm_training_normalizes_channels() {
        let mut bn = BatchNorm::new(2);
        bn.train(true);

        let input =
            Array3::from_shape_fn((2, 5, 2), |(b, l, c)| (b * 5 + l) as f32 * (c + 1) as f32);
        let output = bn.forward(&input).unwrap();

        for c in 0..2 {
            let channel = output.index_axis(Axis(2), c);
            assert_relative_eq!(channel.mean().unwrap(), 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_batchnorm_rejects_wrong_channel_count() {
        let bn = BatchNorm::new(3);
        let err = bn.forward(&Array2::<f32>::ones((2, 4))).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_relu_forward() {
        let relu = ReLU::new();
        let mut values = Array3::from_shape_vec((1, 1, 3), vec![-1.0, 0.0, 2.0]).unwrap();
        relu.forward_inplace(&mut values);
        assert_eq!(
            values.iter().cloned().collect::<Vec<_>>(),
            vec![0.0, 0.0, 2.0]
        );
    }

    #[test]
    fn test_avgpool1d_forward() {
        let pool = AvgPool1d::new(5);
        let input = Array3::from_shape_fn((1, 12, 1), |(_, l, _)| l as f32);
        let output = pool.forward(&input);

        // Trailing partial window is dropped
        assert_eq!(output.dim(), (1, 2, 1));
        assert_relative_eq!(output[[0, 0, 0]], 2.0);
        assert_relative_eq!(output[[0, 1, 0]], 7.0);
    }

    #[test]
    fn test_dense_forward() {
        let mut rng = make_rng(Some(3));
        let dense = Dense::new(10, 5, &mut rng).unwrap();
        let input = Array2::ones((2, 10));
        let output = dense.forward(&input).unwrap();
        assert_eq!(output.dim(), (2, 5));
        assert_eq!(dense.num_params(), 55);

        let err = dense.forward(&Array2::ones((2, 9))).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_flatten_is_row_major() {
        let input = Array3::from_shape_fn((2, 3, 2), |(b, l, c)| (b * 100 + l * 10 + c) as f32);
        let flat = flatten(&input).unwrap();

        assert_eq!(flat.dim(), (2, 6));
        assert_eq!(
            flat.row(1).to_vec(),
            vec![100.0, 101.0, 110.0, 111.0, 120.0, 121.0]
        );
    }

    #[test]
    fn test_softmax() {
        let logits = Array2::from_shape_vec((1, 3), vec![1.0, 2.0, 3.0]).unwrap();
        let probs = softmax(&logits);

        let sum: f32 = probs.row(0).iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-5);
        assert!(probs[[0, 2]] > probs[[0, 1]] && probs[[0, 1]] > probs[[0, 0]]);
    }

    #[test]
    fn test_ensure_nonempty() {
        assert!(ensure_nonempty("pool", &[4, 64], &[1, 64]).is_ok());
        let err = ensure_nonempty("pool", &[4, 64], &[0, 64]).unwrap_err();
        assert!(matches!(err, Error::EmptyOutput { .. }));
    }
}
