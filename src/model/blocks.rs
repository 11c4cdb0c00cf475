//! Residual blocks for ResNet
//!
//! Every block computes `relu(main(x) + shortcut(x))`. The shortcut is the
//! identity, or a strided 1x1 projection when the block downsamples.

use super::init::{Initializer, Regularizer};
use super::layers::{BatchNorm, Conv1d, Padding, ReLU};
use super::layers2d::Conv2d;
use crate::error::{Error, Result};
use ndarray::{Array3, Array4};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stride of the main path and projection when downsampling
const DOWNSAMPLE_STRIDE: usize = 2;

fn block_stride(downsample: bool) -> usize {
    if downsample {
        DOWNSAMPLE_STRIDE
    } else {
        1
    }
}

/// Residual block for sequences: conv-bn-relu, conv-bn, add, relu
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidualBlock1d {
    /// First convolution (carries the stride)
    pub conv1: Conv1d,
    /// First batch norm
    pub bn1: BatchNorm,
    /// Second convolution
    pub conv2: Conv1d,
    /// Second batch norm
    pub bn2: BatchNorm,
    /// ReLU activation
    pub relu: ReLU,
    /// 1x1 projection for the skip connection (downsampling blocks only)
    pub shortcut: Option<Conv1d>,
}

impl ResidualBlock1d {
    /// Create a new block
    ///
    /// # Arguments
    ///
    /// * `in_channels` - Channels of the block input
    /// * `filters` - Channels of the block output
    /// * `kernel_size` - Kernel size of both main-path convolutions
    /// * `downsample` - Halve the length and project the shortcut
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        filters: usize,
        kernel_size: usize,
        downsample: bool,
        rng: &mut R,
    ) -> Result<Self> {
        let stride = block_stride(downsample);

        let shortcut = if downsample {
            Some(Conv1d::new(
                in_channels,
                filters,
                1,
                stride,
                Padding::Same,
                Initializer::GlorotUniform,
                rng,
            )?)
        } else if in_channels != filters {
            return Err(Error::ShapeMismatch {
                expected: format!("{} input channels for an identity shortcut", filters),
                got: format!("{} input channels", in_channels),
            });
        } else {
            None
        };

        let conv1 = Conv1d::new(
            in_channels,
            filters,
            kernel_size,
            stride,
            Padding::Same,
            Initializer::HeNormal,
            rng,
        )?;
        let conv2 = Conv1d::new(
            filters,
            filters,
            kernel_size,
            1,
            Padding::Same,
            Initializer::HeNormal,
            rng,
        )?;

        Ok(Self {
            conv1,
            bn1: BatchNorm::new(filters),
            conv2,
            bn2: BatchNorm::new(filters),
            relu: ReLU::new(),
            shortcut,
        })
    }

    /// Output channels
    pub fn filters(&self) -> usize {
        self.conv2.out_channels
    }

    /// Kernel size of the main path
    pub fn kernel_size(&self) -> usize {
        self.conv1.kernel_size
    }

    /// Whether the block halves the length
    pub fn downsample(&self) -> bool {
        self.shortcut.is_some()
    }

    /// Output length for a given input length
    pub fn output_len(&self, len: usize) -> usize {
        self.conv1.output_len(len)
    }

    /// Forward pass
    /// Input shape: [batch, length, in_channels]
    pub fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        // Main path
        let mut out = self.conv1.forward(x)?;
        out = self.bn1.forward(&out)?;
        self.relu.forward_inplace(&mut out);

        out = self.conv2.forward(&out)?;
        out = self.bn2.forward(&out)?;

        // Skip connection, activation only after the add
        match &self.shortcut {
            Some(projection) => out += &projection.forward(x)?,
            None => out += x,
        }
        self.relu.forward_inplace(&mut out);

        Ok(out)
    }

    /// Set training mode on both batch norms
    pub fn train(&mut self, mode: bool) {
        self.bn1.train(mode);
        self.bn2.train(mode);
    }

    /// Get number of parameters
    pub fn num_params(&self) -> usize {
        let mut params = self.conv1.num_params()
            + self.bn1.num_params()
            + self.conv2.num_params()
            + self.bn2.num_params();

        if let Some(projection) = &self.shortcut {
            params += projection.num_params();
        }

        params
    }
}

/// One step of an inner layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Conv,
    Norm,
    Activation,
}

/// Ordering of convolution, batch norm and activation inside a 2D block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlockOrder {
    /// conv -> batch norm -> relu (`"cbr"`)
    #[default]
    ConvBnRelu,
    /// batch norm -> relu -> conv (`"brc"`)
    BnReluConv,
    /// conv -> relu -> batch norm (`"crb"`)
    ConvReluBn,
}

impl BlockOrder {
    /// All variants
    pub const ALL: [BlockOrder; 3] = [
        BlockOrder::ConvBnRelu,
        BlockOrder::BnReluConv,
        BlockOrder::ConvReluBn,
    ];

    /// Parse a tag; anything other than `"cbr"` or `"brc"` selects `ConvReluBn`
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "cbr" => BlockOrder::ConvBnRelu,
            "brc" => BlockOrder::BnReluConv,
            _ => BlockOrder::ConvReluBn,
        }
    }

    /// Short tag
    pub fn tag(&self) -> &'static str {
        match self {
            BlockOrder::ConvBnRelu => "cbr",
            BlockOrder::BnReluConv => "brc",
            BlockOrder::ConvReluBn => "crb",
        }
    }

    /// Full stage sequence
    pub fn stages(&self) -> [Stage; 3] {
        match self {
            BlockOrder::ConvBnRelu => [Stage::Conv, Stage::Norm, Stage::Activation],
            BlockOrder::BnReluConv => [Stage::Norm, Stage::Activation, Stage::Conv],
            BlockOrder::ConvReluBn => [Stage::Conv, Stage::Activation, Stage::Norm],
        }
    }

    /// Stage sequence with activation and normalization optionally removed
    pub fn inner_stages(&self, activate: bool, normalize: bool) -> Vec<Stage> {
        self.stages()
            .into_iter()
            .filter(|stage| match stage {
                Stage::Conv => true,
                Stage::Norm => normalize,
                Stage::Activation => activate,
            })
            .collect()
    }
}

impl From<&str> for BlockOrder {
    fn from(tag: &str) -> Self {
        BlockOrder::from_tag(tag)
    }
}

impl From<String> for BlockOrder {
    fn from(tag: String) -> Self {
        BlockOrder::from_tag(&tag)
    }
}

impl From<BlockOrder> for String {
    fn from(order: BlockOrder) -> Self {
        order.tag().to_string()
    }
}

impl fmt::Display for BlockOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Hyperparameters shared by both inner layers of a 2D block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockSpec2d {
    pub filters: usize,
    pub kernel_size: usize,
    pub downsample: bool,
    pub order: BlockOrder,
    /// Keep the batch-norm stage of each inner layer
    pub batch_norm: bool,
    pub regularizer: Option<Regularizer>,
}

/// A single sub-layer of an inner layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Sublayer {
    Conv(Conv2d),
    Norm(BatchNorm),
    Relu(ReLU),
}

/// One inner layer of a 2D block, built from a [`BlockOrder`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InnerLayer2d {
    pub sublayers: Vec<Sublayer>,
}

impl InnerLayer2d {
    /// Build the sub-layers in the order's sequence
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        spec: &BlockSpec2d,
        stride: usize,
        activate: bool,
        rng: &mut R,
    ) -> Result<Self> {
        let mut channels = in_channels;
        let mut sublayers = Vec::with_capacity(3);

        for stage in spec.order.inner_stages(activate, spec.batch_norm) {
            let sublayer = match stage {
                Stage::Conv => {
                    let conv = Conv2d::new(
                        channels,
                        spec.filters,
                        spec.kernel_size,
                        stride,
                        Padding::Same,
                        Initializer::GlorotUniform,
                        spec.regularizer,
                        rng,
                    )?;
                    channels = spec.filters;
                    Sublayer::Conv(conv)
                }
                Stage::Norm => Sublayer::Norm(BatchNorm::new(channels)),
                Stage::Activation => Sublayer::Relu(ReLU::new()),
            };
            sublayers.push(sublayer);
        }

        Ok(Self { sublayers })
    }

    /// Stage sequence actually built
    pub fn stages(&self) -> Vec<Stage> {
        self.sublayers
            .iter()
            .map(|s| match s {
                Sublayer::Conv(_) => Stage::Conv,
                Sublayer::Norm(_) => Stage::Norm,
                Sublayer::Relu(_) => Stage::Activation,
            })
            .collect()
    }

    /// Forward pass
    pub fn forward(&self, x: &Array4<f32>) -> Result<Array4<f32>> {
        let mut out = x.clone();
        for sublayer in &self.sublayers {
            match sublayer {
                Sublayer::Conv(conv) => out = conv.forward(&out)?,
                Sublayer::Norm(bn) => out = bn.forward(&out)?,
                Sublayer::Relu(relu) => relu.forward_inplace(&mut out),
            }
        }
        Ok(out)
    }

    fn convs(&self) -> impl Iterator<Item = &Conv2d> {
        self.sublayers.iter().filter_map(|s| match s {
            Sublayer::Conv(conv) => Some(conv),
            _ => None,
        })
    }

    fn train(&mut self, mode: bool) {
        for sublayer in &mut self.sublayers {
            if let Sublayer::Norm(bn) = sublayer {
                bn.train(mode);
            }
        }
    }

    fn num_params(&self) -> usize {
        self.sublayers
            .iter()
            .map(|s| match s {
                Sublayer::Conv(conv) => conv.num_params(),
                Sublayer::Norm(bn) => bn.num_params(),
                Sublayer::Relu(_) => 0,
            })
            .sum()
    }
}

/// Residual block for images
///
/// The second inner layer never activates, so the ReLU after the add is the
/// only activation at the block output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidualBlock2d {
    /// First inner layer (carries the stride)
    pub layer1: InnerLayer2d,
    /// Second inner layer, activation removed
    pub layer2: InnerLayer2d,
    /// 1x1 projection for the skip connection (downsampling blocks only)
    pub shortcut: Option<Conv2d>,
    /// ReLU after the add
    pub relu: ReLU,
    /// Output channels
    pub filters: usize,
    /// Kernel size of the inner convolutions
    pub kernel_size: usize,
    /// Sub-layer ordering
    pub order: BlockOrder,
}

impl ResidualBlock2d {
    /// Create a new block
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        spec: &BlockSpec2d,
        rng: &mut R,
    ) -> Result<Self> {
        let stride = block_stride(spec.downsample);

        let shortcut = if spec.downsample {
            Some(Conv2d::new(
                in_channels,
                spec.filters,
                1,
                stride,
                Padding::Same,
                Initializer::GlorotUniform,
                spec.regularizer,
                rng,
            )?)
        } else if in_channels != spec.filters {
            return Err(Error::ShapeMismatch {
                expected: format!("{} input channels for an identity shortcut", spec.filters),
                got: format!("{} input channels", in_channels),
            });
        } else {
            None
        };

        let layer1 = InnerLayer2d::new(in_channels, spec, stride, true, rng)?;
        let layer2 = InnerLayer2d::new(spec.filters, spec, 1, false, rng)?;

        Ok(Self {
            layer1,
            layer2,
            shortcut,
            relu: ReLU::new(),
            filters: spec.filters,
            kernel_size: spec.kernel_size,
            order: spec.order,
        })
    }

    /// Whether the block halves the resolution
    pub fn downsample(&self) -> bool {
        self.shortcut.is_some()
    }

    /// Output (height, width) for a given input (height, width)
    pub fn output_hw(&self, height: usize, width: usize) -> (usize, usize) {
        let stride = block_stride(self.downsample());
        (
            Padding::Same.output_size(height, self.kernel_size, stride),
            Padding::Same.output_size(width, self.kernel_size, stride),
        )
    }

    /// Forward pass
    /// Input shape: [batch, height, width, in_channels]
    pub fn forward(&self, x: &Array4<f32>) -> Result<Array4<f32>> {
        let mut out = self.layer2.forward(&self.layer1.forward(x)?)?;

        match &self.shortcut {
            Some(projection) => out += &projection.forward(x)?,
            None => out += x,
        }
        self.relu.forward_inplace(&mut out);

        Ok(out)
    }

    /// Kernel penalty summed over every convolution in the block
    pub fn regularization_loss(&self) -> f32 {
        self.layer1
            .convs()
            .chain(self.layer2.convs())
            .chain(self.shortcut.iter())
            .map(Conv2d::regularization_loss)
            .sum()
    }

    /// Set training mode on every batch norm
    pub fn train(&mut self, mode: bool) {
        self.layer1.train(mode);
        self.layer2.train(mode);
    }

    /// Get number of parameters
    pub fn num_params(&self) -> usize {
        self.layer1.num_params()
            + self.layer2.num_params()
            + self.shortcut.as_ref().map_or(0, Conv2d::num_params)
    }
}
