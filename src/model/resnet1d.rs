//! 1D residual classifier for sequences and time series

use super::blocks::ResidualBlock1d;
use super::init::{make_rng, Initializer};
use super::layers::{
    ensure_nonempty, flatten, softmax, AvgPool1d, BatchNorm, Conv1d, Dense, Padding, ReLU,
};
use super::summary::{LayerSummary, ModelSummary};
use super::Classifier;
use crate::error::{ensure_positive, Error, Result};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Width of the stem and the first section
pub const BASE_FEATURE_MAPS: usize = 32;

/// Stem kernel size when none is given
pub const DEFAULT_KERNEL_SIZE: usize = 10;

/// Window of the average pooling in the head
pub const POOL_SIZE: usize = 5;

const SECTION2_FEATURE_MAPS: usize = BASE_FEATURE_MAPS * 2;

/// `(filters, kernel_size, downsample)` of each residual block, in order.
///
/// The builder's kernel size only reaches the stem; these kernels are fixed.
pub const BLOCK_SCHEDULE: [(usize, usize, bool); 6] = [
    (BASE_FEATURE_MAPS, 10, false),
    (BASE_FEATURE_MAPS, 10, false),
    (SECTION2_FEATURE_MAPS, 5, true),
    (SECTION2_FEATURE_MAPS, 10, false),
    (SECTION2_FEATURE_MAPS, 15, false),
    (SECTION2_FEATURE_MAPS, 20, false),
];

/// Builder for [`ResNet1d`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResNet1dClassifier {
    input_shape: (usize, usize),
    n_classes: usize,
    kernel_size: usize,
    seed: Option<u64>,
}

impl ResNet1dClassifier {
    /// Create a builder for `(length, channels)` inputs and `n_classes` outputs
    pub fn new(input_shape: (usize, usize), n_classes: usize) -> Self {
        Self {
            input_shape,
            n_classes,
            kernel_size: DEFAULT_KERNEL_SIZE,
            seed: None,
        }
    }

    /// Set the stem kernel size
    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    /// Make weight initialization reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn input_shape(&self) -> (usize, usize) {
        self.input_shape
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Build a freshly initialized model
    pub fn model(&self) -> Result<ResNet1d> {
        let (length, channels) = self.input_shape;
        ensure_positive("sequence length", length)?;
        ensure_positive("input channels", channels)?;
        ensure_positive("n_classes", self.n_classes)?;
        ensure_positive("kernel_size", self.kernel_size)?;

        let mut rng = make_rng(self.seed);

        // Stem
        let conv1 = Conv1d::new(
            channels,
            BASE_FEATURE_MAPS,
            self.kernel_size,
            1,
            Padding::Same,
            Initializer::GlorotUniform,
            &mut rng,
        )?;
        let mut len = conv1.output_len(length);
        let mut in_channels = BASE_FEATURE_MAPS;

        // Residual sections
        let mut blocks = Vec::with_capacity(BLOCK_SCHEDULE.len());
        for (i, &(filters, kernel_size, downsample)) in BLOCK_SCHEDULE.iter().enumerate() {
            let block =
                ResidualBlock1d::new(in_channels, filters, kernel_size, downsample, &mut rng)?;
            len = block.output_len(len);
            in_channels = filters;
            debug!(
                block = i + 1,
                filters,
                kernel_size,
                downsample,
                length = len,
                "built residual block"
            );
            blocks.push(block);
        }

        // Head
        let avgpool = AvgPool1d::new(POOL_SIZE);
        let pooled = avgpool.output_len(len);
        ensure_nonempty(
            "average_pooling1d",
            &[len, in_channels],
            &[pooled, in_channels],
        )?;
        let fc = Dense::new(pooled * in_channels, self.n_classes, &mut rng)?;

        let model = ResNet1d {
            conv1,
            bn1: BatchNorm::new(BASE_FEATURE_MAPS),
            relu: ReLU::new(),
            blocks,
            avgpool,
            fc,
            input_shape: self.input_shape,
            num_classes: self.n_classes,
        };

        info!(
            input_shape = ?self.input_shape,
            n_classes = self.n_classes,
            params = model.num_params(),
            "built ResNet1d"
        );

        Ok(model)
    }
}

/// 1D residual network: stem, six residual blocks, pooled dense softmax head
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResNet1d {
    /// Stem convolution
    pub conv1: Conv1d,
    /// Stem batch norm
    pub bn1: BatchNorm,
    /// ReLU activation
    pub relu: ReLU,
    /// Residual blocks, see [`BLOCK_SCHEDULE`]
    pub blocks: Vec<ResidualBlock1d>,
    /// Average pooling
    pub avgpool: AvgPool1d,
    /// Final fully connected layer
    pub fc: Dense,
    input_shape: (usize, usize),
    num_classes: usize,
}

impl ResNet1d {
    /// Input shape `(length, channels)`
    pub fn input_shape(&self) -> (usize, usize) {
        self.input_shape
    }

    /// Output shape without the batch axis
    pub fn output_shape(&self) -> usize {
        self.num_classes
    }

    /// Residual blocks in order
    pub fn blocks(&self) -> &[ResidualBlock1d] {
        &self.blocks
    }

    /// Forward pass returning logits
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape [batch, length, channels]
    ///
    /// # Returns
    ///
    /// Output tensor of shape [batch, num_classes]
    pub fn forward(&self, x: &Array3<f32>) -> Result<Array2<f32>> {
        let (_, length, channels) = x.dim();
        if (length, channels) != self.input_shape {
            return Err(Error::shape_mismatch(self.input_shape, (length, channels)));
        }

        let mut out = self.conv1.forward(x)?;
        out = self.bn1.forward(&out)?;
        self.relu.forward_inplace(&mut out);

        for block in &self.blocks {
            out = block.forward(&out)?;
        }

        out = self.avgpool.forward(&out);
        let flat = flatten(&out)?;

        self.fc.forward(&flat)
    }
}

impl Classifier for ResNet1d {
    type Input = Array3<f32>;

    fn predict_proba(&self, x: &Array3<f32>) -> Result<Array2<f32>> {
        let logits = self.forward(x)?;
        Ok(softmax(&logits))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn summary(&self) -> ModelSummary {
        let (length, channels) = self.input_shape;
        let mut summary = ModelSummary::new("resnet1d", vec![length, channels]);

        let mut len = self.conv1.output_len(length);
        summary.push(LayerSummary::new(
            "conv1d",
            format!(
                "Conv1D({}, k={})",
                self.conv1.out_channels,
                self.conv1.kernel_size
            ),
            vec![len, BASE_FEATURE_MAPS],
            self.conv1.num_params(),
        ));
        summary.push(LayerSummary::new(
            "batch_normalization",
            "BatchNormalization",
            vec![len, BASE_FEATURE_MAPS],
            self.bn1.num_params(),
        ));
        summary.push(LayerSummary::new("activation", "ReLU", vec![len, BASE_FEATURE_MAPS], 0));

        let mut width = BASE_FEATURE_MAPS;
        for (i, block) in self.blocks.iter().enumerate() {
            len = block.output_len(len);
            width = block.filters();
            let kind = format!(
                "ResidualBlock1D({}, k={}{})",
                width,
                block.kernel_size(),
                if block.downsample() { ", downsample" } else { "" }
            );
            summary.push(LayerSummary::new(
                format!("residual_block_{}", i + 1),
                kind,
                vec![len, width],
                block.num_params(),
            ));
        }

        let pooled = self.avgpool.output_len(len);
        summary.push(LayerSummary::new(
            "average_pooling1d",
            format!("AveragePooling1D({})", self.avgpool.pool_size),
            vec![pooled, width],
            0,
        ));
        summary.push(LayerSummary::new("flatten", "Flatten", vec![pooled * width], 0));
        summary.push(LayerSummary::new(
            "dense",
            format!("Dense({}, softmax)", self.num_classes),
            vec![self.num_classes],
            self.fc.num_params(),
        ));

        summary
    }

    fn set_training(&mut self, training: bool) {
        self.bn1.train(training);
        for block in &mut self.blocks {
            block.train(training);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::init::TRUNCATED_NORMAL_STDDEV;
    use approx::assert_relative_eq;
    use ndarray_rand::rand_distr::StandardNormal;
    use ndarray_rand::RandomExt;

    fn build(input_shape: (usize, usize), n_classes: usize) -> ResNet1d {
        ResNet1dClassifier::new(input_shape, n_classes)
            .with_seed(42)
            .model()
            .unwrap()
    }

    #[test]
    fn test_resnet1d_output_is_distribution() {
        let model = build((100, 1), 5);
        let input = Array3::random((3, 100, 1), StandardNormal);
        let probs = model.predict_proba(&input).unwrap();

        assert_eq!(probs.dim(), (3, 5));
        for row in probs.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-4);
            assert!(row.iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn test_resnet1d_width_and_length_schedule() {
        let model = build((100, 1), 5);
        let summary = model.summary();

        assert_eq!(summary.layer("conv1d").unwrap().output_shape, vec![100, 32]);
        assert_eq!(
            summary.layer("residual_block_2").unwrap().output_shape,
            vec![100, 32]
        );
        assert_eq!(
            summary.layer("residual_block_3").unwrap().output_shape,
            vec![50, 64]
        );
        assert_eq!(
            summary.layer("residual_block_6").unwrap().output_shape,
            vec![50, 64]
        );
        assert_eq!(summary.layer("flatten").unwrap().output_shape, vec![640]);
        assert_eq!(summary.output_shape(), &[5]);
        assert_eq!(summary.total_params(), model.num_params());
    }

    #[test]
    fn test_resnet1d_block_kernels_are_fixed() {
        let model = ResNet1dClassifier::new((60, 2), 3)
            .with_kernel_size(7)
            .with_seed(1)
            .model()
            .unwrap();

        assert_eq!(model.conv1.kernel_size, 7);
        let kernels: Vec<usize> = model.blocks().iter().map(|b| b.kernel_size()).collect();
        assert_eq!(kernels, vec![10, 10, 5, 10, 15, 20]);
        let downsamples: Vec<bool> = model.blocks().iter().map(|b| b.downsample()).collect();
        assert_eq!(downsamples, vec![false, false, true, false, false, false]);
    }

    #[test]
    fn test_resnet1d_layer_initializers() {
        let model = build((40, 2), 3);
        let max_abs = |w: &Array2<f32>| w.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let glorot_limit = |conv: &Conv1d| {
            let fan_in = conv.kernel_size * conv.in_channels;
            let fan_out = conv.kernel_size * conv.out_channels;
            (6.0 / (fan_in + fan_out) as f32).sqrt()
        };

        // Stem and projection shortcut stay inside the Glorot-uniform limit
        assert!(max_abs(&model.conv1.weight) <= glorot_limit(&model.conv1));
        let projection = model.blocks()[2].shortcut.as_ref().unwrap();
        assert!(max_abs(&projection.weight) <= glorot_limit(projection));

        // Main-path convolutions are truncated He-normal: wider than Glorot, bounded at 2 sigma
        for block in model.blocks() {
            for conv in [&block.conv1, &block.conv2] {
                let fan_in = (conv.kernel_size * conv.in_channels) as f32;
                let he_bound = 2.0 * (2.0 / fan_in).sqrt() / TRUNCATED_NORMAL_STDDEV;
                let widest = max_abs(&conv.weight);
                assert!(widest > glorot_limit(conv));
                assert!(widest <= he_bound + 1e-6);
            }
        }
    }

    #[test]
    fn test_resnet1d_seed_is_reproducible() {
        let a = build((40, 2), 3);
        let b = build((40, 2), 3);
        let input = Array3::random((2, 40, 2), StandardNormal);

        assert_eq!(
            a.predict_proba(&input).unwrap(),
            b.predict_proba(&input).unwrap()
        );
    }

    #[test]
    fn test_resnet1d_unseeded_builds_are_independent() {
        let builder = ResNet1dClassifier::new((40, 2), 3);
        let a = builder.model().unwrap();
        let b = builder.model().unwrap();

        assert_eq!(a.summary(), b.summary());
        assert_ne!(a.fc.weight, b.fc.weight);
    }

    #[test]
    fn test_resnet1d_minimum_length() {
        // 9 -> 5 after the downsample -> one pooling window
        assert!(ResNet1dClassifier::new((9, 1), 2).model().is_ok());

        let err = ResNet1dClassifier::new((8, 1), 2).model().unwrap_err();
        assert!(matches!(err, Error::EmptyOutput { .. }));
    }

    #[test]
    fn test_resnet1d_rejects_zero_classes() {
        let err = ResNet1dClassifier::new((100, 1), 0).model().unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { name: "n_classes", .. }));
    }

    #[test]
    fn test_resnet1d_rejects_wrong_input_shape() {
        let model = build((32, 1), 2);
        let input = Array3::zeros((1, 31, 1));
        let err = model.predict_proba(&input).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_resnet1d_predict_and_training_mode() {
        let mut model = build((32, 3), 4);
        let input = Array3::random((5, 32, 3), StandardNormal);

        let labels = model.predict(&input).unwrap();
        assert_eq!(labels.len(), 5);
        assert!(labels.iter().all(|&l| l < 4));

        model.set_training(true);
        let probs = model.predict_proba(&input).unwrap();
        for row in probs.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-4);
        }
    }
}
