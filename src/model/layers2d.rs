//! Two-dimensional layers for image inputs

use super::init::{Initializer, Regularizer};
use super::layers::{ensure_channels, Padding};
use crate::error::{ensure_positive, Result};
use ndarray::{s, Array1, Array2, Array4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 2D Convolutional layer with a square kernel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv2d {
    /// Kernel, rows ordered by (row tap, column tap, input channel):
    /// [kernel_size * kernel_size * in_channels, out_channels]
    pub weight: Array2<f32>,
    /// Bias vector [out_channels]
    pub bias: Array1<f32>,
    /// Stride along both spatial axes
    pub stride: usize,
    /// Padding
    pub padding: Padding,
    /// Input channels
    pub in_channels: usize,
    /// Output channels
    pub out_channels: usize,
    /// Kernel size
    pub kernel_size: usize,
    /// Optional penalty on the kernel
    pub regularizer: Option<Regularizer>,
}

impl Conv2d {
    /// Create a new Conv2d layer with a zero bias
    #[allow(clippy::too_many_arguments)]
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: Padding,
        init: Initializer,
        regularizer: Option<Regularizer>,
        rng: &mut R,
    ) -> Result<Self> {
        ensure_positive("in_channels", in_channels)?;
        ensure_positive("filters", out_channels)?;
        ensure_positive("kernel_size", kernel_size)?;
        ensure_positive("stride", stride)?;

        let area = kernel_size * kernel_size;
        let weight = init.matrix(
            area * in_channels,
            out_channels,
            area * in_channels,
            area * out_channels,
            rng,
        );

        Ok(Self {
            weight,
            bias: Array1::zeros(out_channels),
            stride,
            padding,
            in_channels,
            out_channels,
            kernel_size,
            regularizer,
        })
    }

    /// Output (height, width) for a given input (height, width)
    pub fn output_hw(&self, height: usize, width: usize) -> (usize, usize) {
        (
            self.padding.output_size(height, self.kernel_size, self.stride),
            self.padding.output_size(width, self.kernel_size, self.stride),
        )
    }

    /// Forward pass
    /// Input shape: [batch, height, width, in_channels]
    /// Output shape: [batch, new_height, new_width, out_channels]
    pub fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let (batch_size, height, width, in_channels) = input.dim();
        ensure_channels("conv2d", self.in_channels, in_channels)?;

        let k = self.kernel_size;
        let (out_h, out_w) = self.output_hw(height, width);
        let pad_top = self.padding.pad_before(height, k, self.stride) as isize;
        let pad_left = self.padding.pad_before(width, k, self.stride) as isize;

        let mut output = Array4::zeros((batch_size, out_h, out_w, self.out_channels));
        let mut patches = Array2::<f32>::zeros((out_h * out_w, k * k * in_channels));

        for (b, image) in input.outer_iter().enumerate() {
            patches.fill(0.0);
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let row = oy * out_w + ox;
                    for ky in 0..k {
                        let y = (oy * self.stride + ky) as isize - pad_top;
                        if y < 0 || y as usize >= height {
                            continue;
                        }
                        for kx in 0..k {
                            let x = (ox * self.stride + kx) as isize - pad_left;
                            if x < 0 || x as usize >= width {
                                continue;
                            }
                            let col = (ky * k + kx) * in_channels;
                            patches
                                .slice_mut(s![row, col..col + in_channels])
                                .assign(&image.slice(s![y as usize, x as usize, ..]));
                        }
                    }
                }
            }

            let mut out = patches.dot(&self.weight);
            out += &self.bias;
            for (row, values) in out.outer_iter().enumerate() {
                output
                    .slice_mut(s![b, row / out_w, row % out_w, ..])
                    .assign(&values);
            }
        }

        Ok(output)
    }

    /// Penalty from the attached regularizer, zero without one
    pub fn regularization_loss(&self) -> f32 {
        self.regularizer
            .map(|reg| reg.penalty(&self.weight))
            .unwrap_or(0.0)
    }

    /// Get number of parameters
    pub fn num_params(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// Global average pooling over both spatial axes
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GlobalAvgPool2d;

impl GlobalAvgPool2d {
    /// Create a new pooling layer
    pub fn new() -> Self {
        Self
    }

    /// Forward pass
    /// Input shape: [batch, height, width, channels]
    /// Output shape: [batch, channels]
    pub fn forward(&self, input: &Array4<f32>) -> Array2<f32> {
        let (_, height, width, _) = input.dim();
        let area = (height * width).max(1) as f32;
        input.sum_axis(Axis(1)).sum_axis(Axis(1)) / area
    }
}
