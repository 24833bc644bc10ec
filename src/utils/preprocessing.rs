//! Letterbox encoding of source images into the fixed-size network input
//!
//! The source is scaled uniformly so that it fits a `target x target` square,
//! centered, and the remaining area is padded with black. The padding colour is
//! fixed: mask decoding crops the padded border back out using the returned
//! [`PlacementMeta`], so any other fill would leak into the mask edges.

use crate::{
    config::{ChannelOrder, Normalization, PipelineConfig},
    error::{BgoneError, Result},
    types::{EncodedTensor, PlacementMeta},
};
use image::{imageops, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;

/// Letterbox encoder producing channel-planar `[1, 3, target, target]` tensors
#[derive(Debug, Clone)]
pub struct LetterboxEncoder {
    target: u32,
    normalization: Normalization,
}

impl LetterboxEncoder {
    /// Create an encoder for the given square side and normalization
    #[must_use]
    pub fn new(target: u32, normalization: Normalization) -> Self {
        Self {
            target,
            normalization,
        }
    }

    /// Create an encoder from pipeline configuration
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.target_size, config.normalization)
    }

    #[must_use]
    pub fn target(&self) -> u32 {
        self.target
    }

    /// Compute where an image of the given size lands inside the square
    ///
    /// `scale = min(target / width, target / height)`, scaled sides are rounded
    /// and kept within `1..=target`, offsets are floored.
    ///
    /// # Errors
    /// - `PreconditionViolation` for zero-sized images or a zero target
    pub fn placement(&self, width: u32, height: u32) -> Result<PlacementMeta> {
        if width == 0 || height == 0 {
            return Err(BgoneError::precondition(format!(
                "Cannot encode a {}x{} image",
                width, height
            )));
        }
        if self.target == 0 {
            return Err(BgoneError::precondition("Target size must be positive"));
        }

        let target = f64::from(self.target);
        let scale = (target / f64::from(width)).min(target / f64::from(height));

        let scaled_width = ((f64::from(width) * scale).round() as u32).clamp(1, self.target);
        let scaled_height = ((f64::from(height) * scale).round() as u32).clamp(1, self.target);

        Ok(PlacementMeta {
            offset_x: (self.target - scaled_width) / 2,
            offset_y: (self.target - scaled_height) / 2,
            scaled_width,
            scaled_height,
            target: self.target,
        })
    }

    /// Draw the image into a black `target x target` canvas
    ///
    /// Source alpha is composited over the black fill and then dropped.
    ///
    /// # Errors
    /// - `PreconditionViolation` for zero-sized images
    pub fn letterbox(&self, image: &DynamicImage) -> Result<(RgbImage, PlacementMeta)> {
        let (width, height) = image.dimensions();
        let placement = self.placement(width, height)?;

        let resized = imageops::resize(
            &image.to_rgba8(),
            placement.scaled_width,
            placement.scaled_height,
            imageops::FilterType::Triangle,
        );

        let mut canvas = RgbImage::from_pixel(self.target, self.target, Rgb([0, 0, 0]));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let canvas_x = x + placement.offset_x;
            let canvas_y = y + placement.offset_y;
            if canvas_x < self.target && canvas_y < self.target {
                let [r, g, b, a] = pixel.0;
                canvas.put_pixel(
                    canvas_x,
                    canvas_y,
                    Rgb([over_black(r, a), over_black(g, a), over_black(b, a)]),
                );
            }
        }

        Ok((canvas, placement))
    }

    /// Encode an image into the network input tensor plus its placement
    ///
    /// # Errors
    /// - `PreconditionViolation` for zero-sized images
    pub fn encode(&self, image: &DynamicImage) -> Result<(EncodedTensor, PlacementMeta)> {
        let (canvas, placement) = self.letterbox(image)?;
        let data = self.canvas_to_tensor(&canvas);

        log::debug!(
            "Letterboxed {}x{} -> {}x{} at ({}, {}) in {}x{}",
            image.width(),
            image.height(),
            placement.scaled_width,
            placement.scaled_height,
            placement.offset_x,
            placement.offset_y,
            self.target,
            self.target
        );

        Ok((EncodedTensor { data }, placement))
    }

    /// Write canvas samples plane by plane
    fn canvas_to_tensor(&self, canvas: &RgbImage) -> Array4<f32> {
        let size = self.target as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        let planes: [usize; 3] = match self.normalization.channel_order {
            ChannelOrder::Rgb => [0, 1, 2],
            ChannelOrder::Bgr => [2, 1, 0],
        };
        let Normalization { mean, std, .. } = self.normalization;

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size, planes/mean/std are length 3
        for (y, row) in canvas.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for (plane, &channel) in planes.iter().enumerate() {
                    let sample = f32::from(pixel.0[channel]) / 255.0;
                    tensor[[0, plane, y, x]] = (sample - mean[plane]) / std[plane];
                }
            }
        }

        tensor
    }
}

/// Composite one 8-bit channel over black
fn over_black(channel: u8, alpha: u8) -> u8 {
    ((u16::from(channel) * u16::from(alpha) + 127) / 255) as u8
}
