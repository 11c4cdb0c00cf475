//! Residual network models
//!
//! Layers, residual blocks and the two classifier topologies built from them.

mod blocks;
mod init;
mod layers;
mod layers2d;
mod resnet1d;
mod resnet2d;
mod summary;

pub use blocks::{
    BlockOrder, BlockSpec2d, InnerLayer2d, ResidualBlock1d, ResidualBlock2d, Stage, Sublayer,
};
pub use init::{make_rng, Initializer, Regularizer};
pub use layers::{flatten, softmax, AvgPool1d, BatchNorm, Conv1d, Dense, Padding, ReLU};
pub use layers2d::{Conv2d, GlobalAvgPool2d};
pub use resnet1d::{
    ResNet1d, ResNet1dClassifier, BASE_FEATURE_MAPS, BLOCK_SCHEDULE, DEFAULT_KERNEL_SIZE,
    POOL_SIZE,
};
pub use resnet2d::{BuildOptions, ResNet2d, ResNet2dClassifier};
pub use summary::{LayerSummary, ModelSummary};

use crate::error::Result;
use ndarray::Array2;

/// Common interface of the built classifiers
pub trait Classifier {
    /// Batched input tensor
    type Input;

    /// Class probabilities, shape [batch, num_classes]
    fn predict_proba(&self, x: &Self::Input) -> Result<Array2<f32>>;

    /// Most probable class per sample
    fn predict(&self, x: &Self::Input) -> Result<Vec<usize>> {
        let probs = self.predict_proba(x)?;
        Ok(argmax_rows(&probs))
    }

    /// Width of the output distribution
    fn num_classes(&self) -> usize;

    /// Layer-by-layer description
    fn summary(&self) -> ModelSummary;

    /// Get total number of parameters
    fn num_params(&self) -> usize {
        self.summary().total_params()
    }

    /// Switch every batch norm between batch and running statistics
    fn set_training(&mut self, training: bool);
}

/// Index of the largest value in each row
pub fn argmax_rows(values: &Array2<f32>) -> Vec<usize> {
    values
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(idx, _)| idx)
                .unwrap_or(0)
        })
        .collect()
}
