//! # Residual Network Classifiers
//!
//! Builders for two residual network topologies on top of a small
//! channels-last layer toolkit written with `ndarray`.
//!
//! ## Features
//!
//! - 1D ResNet for sequence and time-series classification
//! - 2D ResNet for images with three block layer orders (`cbr`, `brc`, `crb`)
//! - Forward pass in inference or batch-statistics mode
//! - Layer-by-layer model summaries
//! - TOML configuration and `tracing` based logging
//!
//! ## Example
//!
//! ```rust,no_run
//! use ndarray::Array3;
//! use resnet_classifiers::{Classifier, ResNet1dClassifier};
//!
//! fn main() -> resnet_classifiers::Result<()> {
//!     let model = ResNet1dClassifier::new((100, 1), 5)
//!         .with_kernel_size(10)
//!         .model()?;
//!
//!     let batch = Array3::<f32>::zeros((8, 100, 1));
//!     let probs = model.predict_proba(&batch)?;
//!     assert_eq!(probs.dim(), (8, 5));
//!
//!     println!("{}", model.summary());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod model;
pub mod utils;

pub use error::{Error, Result};
pub use model::{
    BlockOrder, BuildOptions, Classifier, ModelSummary, Regularizer, ResNet1d, ResNet1dClassifier,
    ResNet2d, ResNet2dClassifier,
};
pub use utils::{setup_logging, Config};
