//! Configuration management
//!
//! This module handles loading and managing configuration.

use crate::error::Result;
use crate::model::{
    BlockOrder, BuildOptions, Regularizer, ResNet1dClassifier, ResNet2dClassifier,
    DEFAULT_KERNEL_SIZE,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 1D classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResNet1dConfig {
    /// `[length, channels]`
    pub input_shape: [usize; 2],
    pub n_classes: usize,
    /// Stem kernel size
    pub kernel_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ResNet1dConfig {
    fn default() -> Self {
        Self {
            input_shape: [100, 1],
            n_classes: 5,
            kernel_size: DEFAULT_KERNEL_SIZE,
            seed: None,
        }
    }
}

impl ResNet1dConfig {
    /// Builder described by this section
    pub fn classifier(&self) -> ResNet1dClassifier {
        let [length, channels] = self.input_shape;
        let builder = ResNet1dClassifier::new((length, channels), self.n_classes)
            .with_kernel_size(self.kernel_size);
        match self.seed {
            Some(seed) => builder.with_seed(seed),
            None => builder,
        }
    }
}

/// 2D classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResNet2dConfig {
    /// `[height, width, channels]`
    pub input_shape: [usize; 3],
    pub n_classes: usize,
    pub num_feature_maps: usize,
    pub kernel_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regularizer: Option<Regularizer>,
    pub batch_norm: bool,
    pub block_order: BlockOrder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ResNet2dConfig {
    fn default() -> Self {
        let options = BuildOptions::default();
        Self {
            input_shape: [64, 64, 3],
            n_classes: 10,
            num_feature_maps: options.num_feature_maps,
            kernel_size: options.kernel_size,
            regularizer: options.regularizer,
            batch_norm: options.batch_norm,
            block_order: options.block_order,
            seed: None,
        }
    }
}

impl ResNet2dConfig {
    /// Builder described by this section
    pub fn classifier(&self) -> ResNet2dClassifier {
        let [height, width, channels] = self.input_shape;
        let builder = ResNet2dClassifier::new((height, width, channels), self.n_classes);
        match self.seed {
            Some(seed) => builder.with_seed(seed),
            None => builder,
        }
    }

    /// Options for [`ResNet2dClassifier::build_model`]
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            num_feature_maps: self.num_feature_maps,
            kernel_size: self.kernel_size,
            regularizer: self.regularizer,
            batch_norm: self.batch_norm,
            block_order: self.block_order,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub resnet1d: ResNet1dConfig,
    pub resnet2d: ResNet2dConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from file or use default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create default configuration file
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        config.save(path)
    }
}
