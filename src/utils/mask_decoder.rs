//! Reconstruction of a full-resolution opacity mask from raw model logits
//!
//! Steps: logistic activation per output, shape resolution, aggregation across
//! usable outputs, 8-bit materialization, removal of the letterbox padding and
//! a resample back to the source resolution.

use crate::{
    config::{OutputAggregation, PipelineConfig},
    error::{BgoneError, Result},
    inference::MaskLayout,
    types::{OpacityMask, PlacementMeta, RawMaskOutput},
};
use image::{imageops, GrayImage};

/// Logistic function
#[inline]
#[must_use]
pub fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// One output after activation, with its resolved dimensions
#[derive(Debug, Clone)]
struct ProbabilityMap {
    height: usize,
    width: usize,
    values: Vec<f32>,
}

/// Decoder configured once per pipeline
#[derive(Debug, Clone)]
pub struct MaskDecoder {
    target: u32,
    aggregation: OutputAggregation,
    invert_alpha: bool,
    layout: MaskLayout,
}

impl MaskDecoder {
    #[must_use]
    pub fn new(target: u32, aggregation: OutputAggregation, invert_alpha: bool) -> Self {
        Self {
            target,
            aggregation,
            invert_alpha,
            layout: MaskLayout::Auto,
        }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.target_size,
            config.output_aggregation,
            config.invert_alpha,
        )
    }

    /// Use the layout resolved from the model contract
    #[must_use]
    pub fn with_layout(mut self, layout: MaskLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn layout(&self) -> MaskLayout {
        self.layout
    }

    /// Decode raw outputs into an opacity mask of `target_width x target_height`
    ///
    /// # Errors
    /// - `ModelOutputEmpty` when no output produced usable data
    /// - `PreconditionViolation` for a zero-sized output or network side
    pub fn decode(
        &self,
        outputs: &[RawMaskOutput],
        placement: &PlacementMeta,
        target_width: u32,
        target_height: u32,
    ) -> Result<OpacityMask> {
        if target_width == 0 || target_height == 0 {
            return Err(BgoneError::precondition(format!(
                "Cannot decode a mask to {}x{}",
                target_width, target_height
            )));
        }
        if self.target == 0 {
            return Err(BgoneError::precondition("Target size must be positive"));
        }

        let merged = self.aggregate(outputs)?;
        let square = materialize(&merged)?;
        let cropped = crop_padding(&square, placement)?;

        let resized = if cropped.dimensions() == (target_width, target_height) {
            cropped
        } else {
            imageops::resize(
                &cropped,
                target_width,
                target_height,
                imageops::FilterType::Lanczos3,
            )
        };

        let values = resized
            .pixels()
            .map(|pixel| {
                let value = f32::from(pixel.0[0]) / 255.0;
                if self.invert_alpha {
                    1.0 - value
                } else {
                    value
                }
            })
            .collect();

        OpacityMask::new(target_width, target_height, values)
    }

    /// Activate one output, or `None` when it cannot be used
    fn activate(&self, output: &RawMaskOutput) -> Option<ProbabilityMap> {
        let Some(data) = output.data.as_ref() else {
            log::debug!("Output '{}' produced no data, skipping", output.name);
            return None;
        };

        let candidates = self
            .layout
            .candidate_dims(output.shape.as_deref(), self.target);
        let Some(&(height, width)) = candidates.iter().find(|(h, w)| h * w == data.len()) else {
            log::warn!(
                "Output '{}' has {} values, which matches none of {:?}; skipping",
                output.name,
                data.len(),
                candidates
            );
            return None;
        };

        Some(ProbabilityMap {
            height,
            width,
            values: data.iter().map(|&v| sigmoid(v)).collect(),
        })
    }

    fn aggregate(&self, outputs: &[RawMaskOutput]) -> Result<ProbabilityMap> {
        let mut usable = outputs.iter().filter_map(|output| self.activate(output));

        let mut merged = usable.next().ok_or(BgoneError::ModelOutputEmpty)?;
        if self.aggregation == OutputAggregation::Single {
            return Ok(merged);
        }

        let mut count = 1_u32;
        for next in usable {
            if (next.height, next.width) != (merged.height, merged.width) {
                log::warn!(
                    "Skipping {}x{} output while averaging {}x{} outputs",
                    next.height,
                    next.width,
                    merged.height,
                    merged.width
                );
                continue;
            }
            for (acc, value) in merged.values.iter_mut().zip(next.values) {
                *acc += value;
            }
            count += 1;
        }

        if count > 1 {
            let divisor = count as f32;
            for value in &mut merged.values {
                *value /= divisor;
            }
        }
        if (count as usize) < outputs.len() {
            log::debug!("Averaged {} of {} outputs", count, outputs.len());
        }

        Ok(merged)
    }
}

/// 8-bit square mask image, `round(clamp(p * 255))`
fn materialize(map: &ProbabilityMap) -> Result<GrayImage> {
    let width = u32::try_from(map.width)
        .map_err(|_| BgoneError::internal("Mask width exceeds u32"))?;
    let height = u32::try_from(map.height)
        .map_err(|_| BgoneError::internal("Mask height exceeds u32"))?;

    let pixels = map
        .values
        .iter()
        .map(|&p| (p.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();

    GrayImage::from_raw(width, height, pixels)
        .ok_or_else(|| BgoneError::internal("Mask buffer does not match its dimensions"))
}

/// Cut the placed rectangle out of the square mask
///
/// The rectangle is expressed in `placement.target` coordinates; masks of a
/// different side have it scaled and clamped to their bounds.
fn crop_padding(mask: &GrayImage, placement: &PlacementMeta) -> Result<GrayImage> {
    let (mask_width, mask_height) = mask.dimensions();
    if mask_width == 0 || mask_height == 0 {
        return Err(BgoneError::precondition("Model produced an empty mask"));
    }

    if mask_width == placement.target && mask_height == placement.target {
        return Ok(imageops::crop_imm(
            mask,
            placement.offset_x,
            placement.offset_y,
            placement.scaled_width,
            placement.scaled_height,
        )
        .to_image());
    }

    let scale_x = f64::from(mask_width) / f64::from(placement.target.max(1));
    let scale_y = f64::from(mask_height) / f64::from(placement.target.max(1));

    let x = ((f64::from(placement.offset_x) * scale_x).round() as u32).min(mask_width - 1);
    let y = ((f64::from(placement.offset_y) * scale_y).round() as u32).min(mask_height - 1);
    let width = ((f64::from(placement.scaled_width) * scale_x).round() as u32)
        .clamp(1, mask_width - x);
    let height = ((f64::from(placement.scaled_height) * scale_y).round() as u32)
        .clamp(1, mask_height - y);

    log::debug!(
        "Mask is {}x{} for a {} target, cropping ({}, {}) {}x{}",
        mask_width,
        mask_height,
        placement.target,
        x,
        y,
        width,
        height
    );

    Ok(imageops::crop_imm(mask, x, y, width, height).to_image())
}
