//! Inference backend abstraction

use crate::{
    config::PipelineConfig,
    error::{BgoneError, Result},
    types::RawMaskOutput,
};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// Axis convention of a single-channel mask output
///
/// Resolved once when the model is loaded, from the declared output shape.
/// `Auto` defers the decision to each run and inspects the reported shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskLayout {
    /// Decide per run: axes 2,3 when both are non-zero, else axes 1,2
    #[default]
    Auto,
    /// `[1, 1, H, W]`
    ChannelFirst,
    /// `[1, H, W, 1]`
    ChannelLast,
}

impl MaskLayout {
    /// Detect the layout from a declared shape where unknown axes are `None`
    #[must_use]
    pub fn detect(declared: &[Option<usize>]) -> Self {
        match declared {
            [_, Some(1), _, _] => Self::ChannelFirst,
            [_, _, _, Some(1)] => Self::ChannelLast,
            _ => Self::Auto,
        }
    }

    /// Candidate `(height, width)` pairs for a reported shape, in preference order
    ///
    /// Without a usable rank-4 shape the mask is assumed to be `fallback` square.
    #[must_use]
    pub fn candidate_dims(self, shape: Option<&[usize]>, fallback: u32) -> Vec<(usize, usize)> {
        let square = (fallback as usize, fallback as usize);
        let Some(shape) = shape.filter(|s| s.len() == 4) else {
            return vec![square];
        };

        let axes = |a: usize, b: usize| match (shape.get(a), shape.get(b)) {
            (Some(&h), Some(&w)) if h > 0 && w > 0 => Some((h, w)),
            _ => None,
        };

        let ordered = match self {
            Self::ChannelFirst => [axes(2, 3), axes(1, 2)],
            Self::ChannelLast => [axes(1, 2), axes(2, 3)],
            Self::Auto => [axes(2, 3), axes(1, 2)],
        };

        let mut candidates: Vec<(usize, usize)> = ordered.into_iter().flatten().collect();
        candidates.dedup();
        if candidates.is_empty() {
            candidates.push(square);
        }
        candidates
    }
}

/// Input and output names discovered from a loaded model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelContract {
    /// Name of the first declared input; the encoded tensor is bound to it
    pub input_name: String,
    /// Every declared output, in declaration order
    pub output_names: Vec<String>,
    /// Mask axis convention
    pub layout: MaskLayout,
}

impl ModelContract {
    /// Build a contract from the names and declared output shapes a runtime reports
    ///
    /// The layout is taken from the first output whose declared shape is specific enough.
    ///
    /// # Errors
    /// - `ModelUnavailable` when the model declares no inputs or no outputs
    pub fn resolve(
        input_names: Vec<String>,
        outputs: Vec<(String, Vec<Option<usize>>)>,
    ) -> Result<Self> {
        let input_name = input_names
            .into_iter()
            .next()
            .ok_or_else(|| BgoneError::model_unavailable("Model declares no inputs"))?;

        if outputs.is_empty() {
            return Err(BgoneError::model_unavailable("Model declares no outputs"));
        }

        let layout = outputs
            .iter()
            .map(|(_, shape)| MaskLayout::detect(shape))
            .find(|layout| *layout != MaskLayout::Auto)
            .unwrap_or_default();

        Ok(Self {
            input_name,
            output_names: outputs.into_iter().map(|(name, _)| name).collect(),
            layout,
        })
    }
}

/// Trait for inference backends
pub trait InferenceBackend {
    /// Load the model and discover its contract
    ///
    /// # Errors
    /// - `ModelUnavailable` when the runtime or model cannot be loaded
    fn initialize(&mut self, config: &PipelineConfig) -> Result<ModelContract>;

    /// Run the model once on an encoded `[1, 3, T, T]` tensor
    ///
    /// Returns one entry per declared output, in declaration order. Outputs the
    /// runtime did not produce are reported as missing rather than dropped.
    ///
    /// # Errors
    /// - Backend not initialized
    /// - `Inference` for runtime failures
    fn infer(&mut self, input: &Array4<f32>) -> Result<Vec<RawMaskOutput>>;

    /// Release the loaded model; the next `initialize` loads it again
    fn release(&mut self);

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;

    /// Short backend identifier used in logs
    fn name(&self) -> &'static str;
}
