#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # bgone
//!
//! Photo background replacement driven by a U²-Net style salient object
//! segmentation model, run through ONNX Runtime or Tract.
//!
//! The core is a two-stage transform around the model:
//!
//! - **Letterbox encoding**: the input is scaled uniformly into a fixed square
//!   (320×320 by default), padded with black and written as a channel-planar
//!   `[1, 3, T, T]` tensor, together with the placement needed to undo it.
//! - **Mask decoding**: raw logits from one or more output heads go through
//!   the logistic function, are optionally averaged, cropped back to the
//!   placed rectangle and resampled to the source resolution.
//!
//! On top of that sit edge softening, a compositor for solid-color or image
//! backgrounds, an editor session that drops stale masks, and a CLI.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgone::{BackendType, Background, Compositor, MattingProcessor, ModelSpec, PipelineConfig};
//!
//! # fn example() -> bgone::Result<()> {
//! let config = PipelineConfig::builder()
//!     .model_spec(ModelSpec::from_path("models/u2netp.onnx"))
//!     .feather(1.5)
//!     .build()?;
//! let compositor = Compositor::from_config(&config)?;
//! let mut processor = MattingProcessor::with_backend_type(config, BackendType::Onnx)?;
//!
//! let image = image::open("portrait.jpg")?;
//! let matting = processor.matte(&image)?;
//! let background: Background = "#1e90ff".parse()?;
//! compositor
//!     .render(&image, Some(&matting.mask), &background)?
//!     .save_png("portrait_blue.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA/CoreML execution providers
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): `bgone` command-line tool and tracing subscriber setup
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod editor;
pub mod error;
pub mod inference;
pub mod model_handle;
pub mod models;
pub mod processor;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use image::DynamicImage;
use tokio::io::AsyncRead;

// Public API exports
pub use backends::*;
pub use compositor::{parse_hex_color, Background, CompositeResult, Compositor};
pub use config::{
    ChannelOrder, ExecutionProvider, Normalization, OutputAggregation, PipelineConfig,
    PipelineConfigBuilder,
};
pub use editor::{EditorSession, MattingTicket};
pub use error::{BgoneError, Result};
pub use inference::{InferenceBackend, MaskLayout, ModelContract};
pub use model_handle::ModelHandle;
pub use models::{ModelSource, ModelSpec};
pub use processor::{BackendFactory, BackendType, DefaultBackendFactory, MattingProcessor};
pub use services::{
    ConsoleProgressReporter, ImageIOService, ProcessingStage, ProgressReporter, ProgressTracker,
    ProgressUpdate,
};
pub use types::{
    EncodedTensor, MattingMetadata, MattingResult, OpacityMask, PlacementMeta,
    ProcessingTimings, RawMaskOutput,
};
pub use utils::{feather_gamma, sigmoid, EdgeSoftening, LetterboxEncoder, MaskDecoder};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat};

/// Compute the opacity mask of one image with a freshly loaded model
///
/// Loads the model, runs it once and releases it. Keep a [`MattingProcessor`]
/// around instead when processing more than one image.
///
/// # Examples
/// ```rust,no_run
/// use bgone::{matte_image, BackendType, PipelineConfig};
///
/// # fn example() -> bgone::Result<()> {
/// let image = image::open("input.jpg")?;
/// let result = matte_image(&image, PipelineConfig::default(), BackendType::Tract)?;
/// result.mask.save_png("mask.png")?;
/// # Ok(())
/// # }
/// ```
pub fn matte_image(
    image: &DynamicImage,
    config: PipelineConfig,
    backend_type: BackendType,
) -> Result<MattingResult> {
    let mut processor = MattingProcessor::with_backend_type(config, backend_type)?;
    let result = processor.matte(image);
    processor.dispose();
    result
}

/// Matte an image and composite it over `background`
///
/// The configured feather softens the mask edges.
pub fn replace_background(
    image: &DynamicImage,
    background: &Background,
    config: PipelineConfig,
    backend_type: BackendType,
) -> Result<CompositeResult> {
    let compositor = Compositor::from_config(&config)?;
    let matting = matte_image(image, config, backend_type)?;
    compositor.render(image, Some(&matting.mask), background)
}

/// Read an image from an async stream, matte it and composite it over `background`
///
/// # Examples
/// ```rust,no_run
/// use bgone::{replace_background_from_reader, BackendType, Background, PipelineConfig};
/// use tokio::fs::File;
///
/// # async fn example() -> bgone::Result<()> {
/// let file = File::open("input.jpg").await?;
/// let result = replace_background_from_reader(
///     file,
///     &Background::default(),
///     PipelineConfig::default(),
///     BackendType::Onnx,
/// )
/// .await?;
/// result.save_png("output.png")?;
/// # Ok(())
/// # }
/// ```
pub async fn replace_background_from_reader<R: AsyncRead + Unpin>(
    reader: R,
    background: &Background,
    config: PipelineConfig,
    backend_type: BackendType,
) -> Result<CompositeResult> {
    let image = ImageIOService::load_from_reader(reader).await?;
    replace_background(&image, background, config, backend_type)
}
