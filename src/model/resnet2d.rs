//! 2D residual classifier for images

use super::blocks::{BlockOrder, BlockSpec2d, ResidualBlock2d};
use super::init::{make_rng, Initializer, Regularizer};
use super::layers::{flatten, softmax, BatchNorm, Dense, Padding, ReLU};
use super::layers2d::{Conv2d, GlobalAvgPool2d};
use super::summary::{LayerSummary, ModelSummary};
use super::Classifier;
use crate::error::{ensure_positive, Error, Result};
use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// `(width multiplier, downsample)` of each residual block, in order
const BLOCK_SCHEDULE: [(usize, bool); 6] = [
    (1, false),
    (1, false),
    (2, true),
    (2, false),
    (4, true),
    (4, false),
];

/// Options passed to [`ResNet2dClassifier::build_model`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Width of the stem and the first section
    pub num_feature_maps: usize,
    /// Kernel size of every non-projection convolution
    pub kernel_size: usize,
    /// Penalty attached to every convolution kernel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regularizer: Option<Regularizer>,
    /// Keep batch norm inside the residual blocks
    pub batch_norm: bool,
    /// Sub-layer ordering inside the residual blocks
    pub block_order: BlockOrder,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            num_feature_maps: 32,
            kernel_size: 3,
            regularizer: None,
            batch_norm: true,
            block_order: BlockOrder::ConvBnRelu,
        }
    }
}

impl BuildOptions {
    pub fn new(num_feature_maps: usize, kernel_size: usize) -> Self {
        Self {
            num_feature_maps,
            kernel_size,
            ..Default::default()
        }
    }

    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.regularizer = Some(regularizer);
        self
    }

    pub fn with_batch_norm(mut self, batch_norm: bool) -> Self {
        self.batch_norm = batch_norm;
        self
    }

    pub fn with_block_order(mut self, block_order: BlockOrder) -> Self {
        self.block_order = block_order;
        self
    }
}

/// Builder for [`ResNet2d`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResNet2dClassifier {
    input_shape: (usize, usize, usize),
    n_classes: usize,
    seed: Option<u64>,
}

impl ResNet2dClassifier {
    /// Create a builder for `(height, width, channels)` inputs and `n_classes` outputs
    pub fn new(input_shape: (usize, usize, usize), n_classes: usize) -> Self {
        Self {
            input_shape,
            n_classes,
            seed: None,
        }
    }

    /// Make weight initialization reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn input_shape(&self) -> (usize, usize, usize) {
        self.input_shape
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Build a freshly initialized model
    pub fn build_model(&self, options: &BuildOptions) -> Result<ResNet2d> {
        let (height, width, channels) = self.input_shape;
        ensure_positive("height", height)?;
        ensure_positive("width", width)?;
        ensure_positive("input channels", channels)?;
        ensure_positive("n_classes", self.n_classes)?;
        ensure_positive("num_feature_maps", options.num_feature_maps)?;
        ensure_positive("kernel_size", options.kernel_size)?;

        let mut rng = make_rng(self.seed);
        let base = options.num_feature_maps;

        // Stem
        let conv1 = Conv2d::new(
            channels,
            base,
            options.kernel_size,
            1,
            Padding::Same,
            Initializer::GlorotUniform,
            options.regularizer,
            &mut rng,
        )?;
        let (mut h, mut w) = conv1.output_hw(height, width);
        let mut in_channels = base;

        // Residual sections
        let mut blocks = Vec::with_capacity(BLOCK_SCHEDULE.len());
        for (i, &(multiplier, downsample)) in BLOCK_SCHEDULE.iter().enumerate() {
            let spec = BlockSpec2d {
                filters: base * multiplier,
                kernel_size: options.kernel_size,
                downsample,
                order: options.block_order,
                batch_norm: options.batch_norm,
                regularizer: options.regularizer,
            };
            let block = ResidualBlock2d::new(in_channels, &spec, &mut rng)?;
            (h, w) = block.output_hw(h, w);
            in_channels = spec.filters;
            debug!(
                block = i + 1,
                filters = spec.filters,
                downsample,
                order = %spec.order,
                height = h,
                width = w,
                "built residual block"
            );
            blocks.push(block);
        }

        // Head
        let fc = Dense::new(in_channels, self.n_classes, &mut rng)?;

        let model = ResNet2d {
            conv1,
            bn1: BatchNorm::new(base),
            relu: ReLU::new(),
            blocks,
            pool: GlobalAvgPool2d::new(),
            fc,
            input_shape: self.input_shape,
            num_classes: self.n_classes,
            options: *options,
        };

        info!(
            input_shape = ?self.input_shape,
            n_classes = self.n_classes,
            block_order = %options.block_order,
            params = model.num_params(),
            "built ResNet2d"
        );

        Ok(model)
    }
}

/// 2D residual network: stem, three two-block sections, global pooled dense softmax head
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResNet2d {
    /// Stem convolution
    pub conv1: Conv2d,
    /// Stem batch norm
    pub bn1: BatchNorm,
    /// ReLU activation
    pub relu: ReLU,
    /// Residual blocks
    pub blocks: Vec<ResidualBlock2d>,
    /// Global average pooling
    pub pool: GlobalAvgPool2d,
    /// Final fully connected layer
    pub fc: Dense,
    input_shape: (usize, usize, usize),
    num_classes: usize,
    options: BuildOptions,
}

impl ResNet2d {
    /// Input shape `(height, width, channels)`
    pub fn input_shape(&self) -> (usize, usize, usize) {
        self.input_shape
    }

    /// Output shape without the batch axis
    pub fn output_shape(&self) -> usize {
        self.num_classes
    }

    /// Options the model was built with
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Residual blocks in order
    pub fn blocks(&self) -> &[ResidualBlock2d] {
        &self.blocks
    }

    /// Kernel penalty summed over every convolution, zero without a regularizer
    pub fn regularization_loss(&self) -> f32 {
        self.conv1.regularization_loss()
            + self
                .blocks
                .iter()
                .map(ResidualBlock2d::regularization_loss)
                .sum::<f32>()
    }

    /// Forward pass returning logits
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape [batch, height, width, channels]
    ///
    /// # Returns
    ///
    /// Output tensor of shape [batch, num_classes]
    pub fn forward(&self, x: &Array4<f32>) -> Result<Array2<f32>> {
        let (_, height, width, channels) = x.dim();
        if (height, width, channels) != self.input_shape {
            return Err(Error::shape_mismatch(
                self.input_shape,
                (height, width, channels),
            ));
        }

        let mut out = self.conv1.forward(x)?;
        out = self.bn1.forward(&out)?;
        self.relu.forward_inplace(&mut out);

        for block in &self.blocks {
            out = block.forward(&out)?;
        }

        let pooled = self.pool.forward(&out);
        let flat = flatten(&pooled)?;

        self.fc.forward(&flat)
    }
}

impl Classifier for ResNet2d {
    type Input = Array4<f32>;

    fn predict_proba(&self, x: &Array4<f32>) -> Result<Array2<f32>> {
        let logits = self.forward(x)?;
        Ok(softmax(&logits))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn summary(&self) -> ModelSummary {
        let (height, width, channels) = self.input_shape;
        let mut summary = ModelSummary::new("resnet2d", vec![height, width, channels]);

        let base = self.conv1.out_channels;
        let (mut h, mut w) = self.conv1.output_hw(height, width);
        summary.push(LayerSummary::new(
            "conv2d",
            format!("Conv2D({}, k={})", base, self.conv1.kernel_size),
            vec![h, w, base],
            self.conv1.num_params(),
        ));
        summary.push(LayerSummary::new(
            "batch_normalization",
            "BatchNormalization",
            vec![h, w, base],
            self.bn1.num_params(),
        ));
        summary.push(LayerSummary::new("activation", "ReLU", vec![h, w, base], 0));

        let mut filters = base;
        for (i, block) in self.blocks.iter().enumerate() {
            (h, w) = block.output_hw(h, w);
            filters = block.filters;
            let kind = format!(
                "ResidualBlock2D({}, k={}, {}{})",
                filters,
                block.kernel_size,
                block.order,
                if block.downsample() { ", downsample" } else { "" }
            );
            summary.push(LayerSummary::new(
                format!("residual_block_{}", i + 1),
                kind,
                vec![h, w, filters],
                block.num_params(),
            ));
        }

        summary.push(LayerSummary::new(
            "global_average_pooling2d",
            "GlobalAveragePooling2D",
            vec![filters],
            0,
        ));
        summary.push(LayerSummary::new("flatten", "Flatten", vec![filters], 0));
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
    use approx::assert_relative_eq;
    use ndarray_rand::rand_distr::StandardNormal;
    use ndarray_rand::RandomExt;

    fn build(input_shape: (usize, usize, usize), options: &BuildOptions) -> ResNet2d {
        ResNet2dClassifier::new(input_shape, 10)
            .with_seed(7)
            .build_model(options)
            .unwrap()
    }

    #[test]
    fn test_resnet2d_output_is_distribution() {
        let model = build((16, 16, 3), &BuildOptions::new(8, 3));
        let input = Array4::random((2, 16, 16, 3), StandardNormal);
        let probs = model.predict_proba(&input).unwrap();

        assert_eq!(probs.dim(), (2, 10));
        for row in probs.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_resnet2d_width_and_resolution_schedule() {
        let model = build((16, 16, 3), &BuildOptions::new(8, 3));
        let summary = model.summary();

        assert_eq!(
            summary.layer("conv2d").unwrap().output_shape,
            vec![16, 16, 8]
        );
        assert_eq!(
            summary.layer("residual_block_2").unwrap().output_shape,
            vec![16, 16, 8]
        );
        assert_eq!(
            summary.layer("residual_block_3").unwrap().output_shape,
            vec![8, 8, 16]
        );
        assert_eq!(
            summary.layer("residual_block_5").unwrap().output_shape,
            vec![4, 4, 32]
        );
        assert_eq!(
            summary.layer("residual_block_6").unwrap().output_shape,
            vec![4, 4, 32]
        );
        assert_eq!(summary.output_shape(), &[10]);
        assert_eq!(summary.total_params(), model.num_params());
    }

    #[test]
    fn test_resnet2d_odd_resolution_rounds_up() {
        let model = build((15, 9, 1), &BuildOptions::new(4, 3));
        let summary = model.summary();
        assert_eq!(
            summary.layer("residual_block_6").unwrap().output_shape,
            vec![4, 3, 16]
        );

        let input = Array4::random((1, 15, 9, 1), StandardNormal);
        assert_eq!(model.predict_proba(&input).unwrap().dim(), (1, 10));
    }

    #[test]
    fn test_resnet2d_every_block_order_keeps_contract() {
        let input = Array4::random((2, 8, 8, 3), StandardNormal);

        for order in BlockOrder::ALL {
            let model = build((8, 8, 3), &BuildOptions::new(4, 3).with_block_order(order));
            let summary = model.summary();

            assert_eq!(summary.output_shape(), &[10]);
            assert_eq!(
                summary.layer("residual_block_6").unwrap().output_shape,
                vec![2, 2, 16]
            );
            assert!(summary.layer("residual_block_1").unwrap().kind.contains(order.tag()));

            let probs = model.predict_proba(&input).unwrap();
            assert_eq!(probs.dim(), (2, 10));
            for row in probs.rows() {
                assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_resnet2d_regularizer_is_applied() {
        let plain = build((8, 8, 1), &BuildOptions::new(4, 3));
        assert_eq!(plain.regularization_loss(), 0.0);

        let options = BuildOptions::new(4, 3).with_regularizer(Regularizer::L2 { l2: 0.01 });
        let regularized = build((8, 8, 1), &options);
        assert!(regularized.regularization_loss() > 0.0);
        assert_eq!(
            regularized.options().regularizer,
            Some(Regularizer::L2 { l2: 0.01 })
        );
    }

    #[test]
    fn test_resnet2d_without_block_batch_norm() {
        let with_bn = build((8, 8, 1), &BuildOptions::new(4, 3));
        let without_bn = build((8, 8, 1), &BuildOptions::new(4, 3).with_batch_norm(false));

        // Block norms: 2 per block at 4, 4, 8, 8, 16, 16 channels, 4 values each
        let block_norm_params = 2 * 4 * (4 + 4 + 8 + 8 + 16 + 16);
        assert_eq!(
            with_bn.num_params() - without_bn.num_params(),
            block_norm_params
        );
    }

    #[test]
    fn test_resnet2d_seed_is_reproducible() {
        let options = BuildOptions::new(4, 3).with_block_order(BlockOrder::BnReluConv);
        let a = build((8, 8, 2), &options);
        let b = build((8, 8, 2), &options);
        let input = Array4::random((1, 8, 8, 2), StandardNormal);

        assert_eq!(
            a.predict_proba(&input).unwrap(),
            b.predict_proba(&input).unwrap()
        );
    }

    #[test]
    fn test_resnet2d_rejects_wrong_input_shape() {
        let model = build((8, 8, 3), &BuildOptions::new(4, 3));
        let input = Array4::zeros((1, 8, 8, 1));
        let err = model.predict(&input).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_resnet2d_rejects_zero_feature_maps() {
        let err = ResNet2dClassifier::new((8, 8, 3), 10)
            .build_model(&BuildOptions::new(0, 3))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { name: "num_feature_maps", .. }));
    }

    #[test]
    fn test_build_options_toml() {
        let options: BuildOptions = toml::from_str(
            r#"
            num_feature_maps = 16
            block_order = "brc"
            regularizer = { kind = "l1", l1 = 0.001 }
            "#,
        )
        .unwrap();

        assert_eq!(options.num_feature_maps, 16);
        assert_eq!(options.kernel_size, 3);
        assert!(options.batch_norm);
        assert_eq!(options.block_order, BlockOrder::BnReluConv);
        assert_eq!(options.regularizer, Some(Regularizer::L1 { l1: 0.001 }));
    }
}
