//! Configuration types for the matting pipeline

use crate::error::{BgoneError, Result};
use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Side length of the square network input used by U2-Net style models
pub const DEFAULT_TARGET_SIZE: u32 = 320;

/// Default feather value, matching the midpoint of the 0..3 slider range
pub const DEFAULT_FEATHER: f32 = 1.5;

/// Upper bound of the feather range
pub const MAX_FEATHER: f32 = 3.0;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// How multiple model output heads are merged into one mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputAggregation {
    /// Use the first output that produced data
    Single,
    /// Average every output that produced data
    #[default]
    Average,
}

/// Order in which RGB samples are written into the three tensor planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Per-channel normalization applied after scaling samples to [0,1]
///
/// The default is the identity (`mean = 0`, `std = 1`), i.e. plain `/255`.
/// Models trained with ImageNet statistics need
/// [`Normalization::imagenet`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub channel_order: ChannelOrder,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            channel_order: ChannelOrder::Rgb,
            mean: [0.0, 0.0, 0.0],
            std: [1.0, 1.0, 1.0],
        }
    }
}

impl Normalization {
    /// ImageNet mean/std used by the reference U2-Net training pipeline
    #[must_use]
    pub fn imagenet() -> Self {
        Self {
            channel_order: ChannelOrder::Rgb,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }

    /// Whether this normalization leaves `sample/255` untouched
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.mean == [0.0; 3] && self.std == [1.0; 3]
    }
}

/// Configuration for the matting pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model to load
    pub model_spec: ModelSpec,

    /// Side of the square network input
    pub target_size: u32,

    /// Merge policy for multiple output heads
    pub output_aggregation: OutputAggregation,

    /// Flip mask polarity (`1 - value`) for models that predict background
    pub invert_alpha: bool,

    /// Edge softening strength in [0, 3]
    pub feather: f32,

    /// Input tensor preprocessing
    pub normalization: Normalization,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::default(),
            target_size: DEFAULT_TARGET_SIZE,
            output_aggregation: OutputAggregation::default(),
            invert_alpha: false,
            feather: DEFAULT_FEATHER,
            normalization: Normalization::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bgone::{OutputAggregation, PipelineConfig};
    ///
    /// let config = PipelineConfig::builder()
    ///     .output_aggregation(OutputAggregation::Single)
    ///     .feather(0.0)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.target_size, 320);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    /// - File cannot be read
    /// - JSON is malformed
    /// - Resulting configuration fails validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            BgoneError::invalid_config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Target size of zero
    /// - Feather outside [0, 3] or not finite
    /// - Zero or non-finite normalization std
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bgone::PipelineConfig;
    ///
    /// let mut config = PipelineConfig::default();
    /// assert!(config.validate().is_ok());
    ///
    /// config.feather = 5.0;
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(BgoneError::config_value_error(
                "target size",
                self.target_size,
                ">= 1",
            ));
        }

        if !self.feather.is_finite() || !(0.0..=MAX_FEATHER).contains(&self.feather) {
            return Err(BgoneError::config_value_error("feather", self.feather, "0-3"));
        }

        if self
            .normalization
            .std
            .iter()
            .any(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(BgoneError::invalid_config(
                "Normalization std values must be finite and non-zero",
            ));
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Start from an existing configuration (e.g. one loaded from disk)
    #[must_use]
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn target_size(mut self, target_size: u32) -> Self {
        self.config.target_size = target_size;
        self
    }

    #[must_use]
    pub fn output_aggregation(mut self, aggregation: OutputAggregation) -> Self {
        self.config.output_aggregation = aggregation;
        self
    }

    #[must_use]
    pub fn invert_alpha(mut self, invert: bool) -> Self {
        self.config.invert_alpha = invert;
        self
    }

    /// Set feather strength (validated at build time)
    #[must_use]
    pub fn feather(mut self, feather: f32) -> Self {
        self.config.feather = feather;
        self
    }

    #[must_use]
    pub fn normalization(mut self, normalization: Normalization) -> Self {
        self.config.normalization = normalization;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
