//! Core types flowing through the matting pipeline

use crate::error::{BgoneError, Result};
use chrono::{DateTime, Utc};
use image::{GrayImage, Luma};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where the real image content sits inside the padded square network input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementMeta {
    pub offset_x: u32,
    pub offset_y: u32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub target: u32,
}

impl PlacementMeta {
    /// Uniform scale factor that was applied to the source image
    #[must_use]
    pub fn scale(&self, source_width: u32, source_height: u32) -> f64 {
        let target = f64::from(self.target);
        (target / f64::from(source_width)).min(target / f64::from(source_height))
    }

    /// Whether the placed rectangle lies inside the square
    #[must_use]
    pub fn fits(&self) -> bool {
        self.offset_x + self.scaled_width <= self.target
            && self.offset_y + self.scaled_height <= self.target
    }
}

/// Channel-planar `[1, 3, target, target]` input tensor
#[derive(Debug, Clone)]
pub struct EncodedTensor {
    pub data: Array4<f32>,
}

impl EncodedTensor {
    /// Tensor shape as `[batch, channels, height, width]`
    #[must_use]
    pub fn shape(&self) -> [usize; 4] {
        let (n, c, h, w) = self.data.dim();
        [n, c, h, w]
    }

    /// Flat view in channel-planar order
    #[must_use]
    pub fn as_slice(&self) -> Option<&[f32]> {
        self.data.as_slice()
    }
}

/// One named output of a model run
#[derive(Debug, Clone, PartialEq)]
pub struct RawMaskOutput {
    /// Output name as declared by the model
    pub name: String,
    /// Reported tensor shape, when the runtime supplied one
    pub shape: Option<Vec<usize>>,
    /// Raw logits; `None` when the runtime produced nothing for this name
    pub data: Option<Vec<f32>>,
}

impl RawMaskOutput {
    pub fn new<S: Into<String>>(name: S, shape: Option<Vec<usize>>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            data: Some(data),
        }
    }

    /// An output that was declared but not produced
    pub fn missing<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            shape: None,
            data: None,
        }
    }

    /// Constant-valued output of the given shape, mostly useful for tests
    pub fn filled<S: Into<String>>(name: S, shape: &[usize], value: f32) -> Self {
        let len = shape.iter().product();
        Self::new(name, Some(shape.to_vec()), vec![value; len])
    }
}

/// Per-pixel foreground probability at the source image resolution
#[derive(Debug, Clone, PartialEq)]
pub struct OpacityMask {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl OpacityMask {
    /// Build a mask from row-major values
    ///
    /// # Errors
    /// - `PreconditionViolation` when `values.len() != width * height`
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(BgoneError::precondition(format!(
                "Mask has {} values, expected {}x{} = {}",
                values.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Opacity at `(x, y)`, `None` outside the mask
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Smallest and largest opacity value
    #[must_use]
    pub fn value_range(&self) -> (f32, f32) {
        self.values
            .iter()
            .fold((1.0_f32, 0.0_f32), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Grayscale rendering of the mask (0 = background, 255 = foreground)
    #[must_use]
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let value = self.get(x, y).unwrap_or(0.0);
            Luma([(value.clamp(0.0, 1.0) * 255.0).round() as u8])
        })
    }

    /// Save the mask as a grayscale PNG
    ///
    /// # Errors
    /// - File creation or PNG encoding failures
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_gray_image()
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

/// Stage timings for one matting run, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Only set on the run that triggered the model load
    pub model_load_ms: u64,
    pub encode_ms: u64,
    pub inference_ms: u64,
    pub decode_ms: u64,
    pub total_ms: u64,
}

/// Metadata describing how a mask was produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MattingMetadata {
    pub model_name: String,
    pub output_count: usize,
    pub placement: PlacementMeta,
    pub timings: ProcessingTimings,
    pub created_at: DateTime<Utc>,
}

/// Mask plus the metadata of the run that produced it
#[derive(Debug, Clone)]
pub struct MattingResult {
    pub mask: OpacityMask,
    pub metadata: MattingMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_length_checked() {
        assert!(OpacityMask::new(2, 2, vec![0.0; 4]).is_ok());
        let err = OpacityMask::new(2, 2, vec![0.0; 3]).unwrap_err();
        assert!(matches!(err, BgoneError::PreconditionViolation(_)));
    }

    #[test]
    fn test_mask_accessors() {
        let mask = OpacityMask::new(2, 1, vec![0.25, 1.0]).unwrap();
        assert_eq!(mask.get(1, 0), Some(1.0));
        assert_eq!(mask.get(2, 0), None);
        assert_eq!(mask.value_range(), (0.25, 1.0));

        let gray = mask.to_gray_image();
        assert_eq!(gray.get_pixel(0, 0).0[0], 64);
        assert_eq!(gray.get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn test_placement_fits() {
        let placement = PlacementMeta {
            offset_x: 0,
            offset_y: 40,
            scaled_width: 320,
            scaled_height: 240,
            target: 320,
        };
        assert!(placement.fits());
        assert!((placement.scale(640, 480) - 0.5).abs() < 1e-9);

        let overflowing = PlacementMeta {
            offset_y: 100,
            ..placement
        };
        assert!(!overflowing.fits());
    }

    #[test]
    fn test_filled_output() {
        let output = RawMaskOutput::filled("d0", &[1, 1, 4, 4], 0.0);
        assert_eq!(output.data.as_ref().map(Vec::len), Some(16));
        assert!(RawMaskOutput::missing("d1").data.is_none());
    }
}
