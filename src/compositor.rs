//! Compositing of the matted foreground over a replacement background
//!
//! Without a mask the source image is drawn over the background with its own
//! alpha. With a mask, the softened mask replaces the source alpha before the
//! foreground is blended source-over onto the background.

use crate::{
    config::PipelineConfig,
    error::{BgoneError, Result},
    services::ImageIOService,
    types::OpacityMask,
    utils::EdgeSoftening,
};
use image::{imageops, DynamicImage, GenericImageView, Rgba, RgbaImage};
use std::path::Path;
use std::str::FromStr;

/// Default background fill
pub const DEFAULT_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Parse `#rrggbb` or `#rgb` (the leading `#` is optional) into an opaque color
///
/// # Errors
/// - `InvalidConfig` for anything else
pub fn parse_hex_color(value: &str) -> Result<Rgba<u8>> {
    let hex = value.trim().trim_start_matches('#');
    let invalid = || BgoneError::invalid_config(format!("Invalid color '{value}', expected #rrggbb"));

    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let channel = |digits: &str| u8::from_str_radix(digits, 16).map_err(|_| invalid());
    match hex.len() {
        6 => Ok(Rgba([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            255,
        ])),
        3 => {
            let short = |i: usize| channel(&hex[i..=i]).map(|v| v * 17);
            Ok(Rgba([short(0)?, short(1)?, short(2)?, 255]))
        },
        _ => Err(invalid()),
    }
}

/// What the foreground is placed on
#[derive(Debug, Clone)]
pub enum Background {
    /// Solid fill
    Color(Rgba<u8>),
    /// Image stretched to the output size
    Image(DynamicImage),
}

impl Default for Background {
    fn default() -> Self {
        Self::Color(DEFAULT_BACKGROUND)
    }
}

impl FromStr for Background {
    type Err = BgoneError;

    fn from_str(value: &str) -> Result<Self> {
        parse_hex_color(value).map(Self::Color)
    }
}

impl Background {
    /// Background canvas of the given size
    fn canvas(&self, width: u32, height: u32) -> RgbaImage {
        match self {
            Self::Color(color) => RgbaImage::from_pixel(width, height, *color),
            Self::Image(image) if image.dimensions() == (width, height) => image.to_rgba8(),
            Self::Image(image) => imageops::resize(
                &image.to_rgba8(),
                width,
                height,
                imageops::FilterType::Triangle,
            ),
        }
    }
}

/// A rendered frame ready for export
#[derive(Debug, Clone)]
pub struct CompositeResult {
    image: RgbaImage,
    masked: bool,
}

impl CompositeResult {
    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Whether an opacity mask was applied
    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.masked
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Save as PNG
    ///
    /// # Errors
    /// - File write or PNG encoding failures
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ImageIOService::save_png(&DynamicImage::ImageRgba8(self.image.clone()), path)
    }

    /// Encode as PNG bytes
    ///
    /// # Errors
    /// - PNG encoding failures
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        ImageIOService::png_bytes(&DynamicImage::ImageRgba8(self.image.clone()))
    }
}

/// Blends foreground and background with edge softening
#[derive(Debug, Clone, Copy, Default)]
pub struct Compositor {
    softening: EdgeSoftening,
}

impl Compositor {
    /// # Errors
    /// - `InvalidConfig` when `feather` is outside `[0, 3]`
    pub fn new(feather: f32) -> Result<Self> {
        Ok(Self {
            softening: EdgeSoftening::new(feather)?,
        })
    }

    /// # Errors
    /// - `InvalidConfig` when the configured feather is out of range
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(config.feather)
    }

    #[must_use]
    pub fn softening(&self) -> EdgeSoftening {
        self.softening
    }

    /// Render the image over a background, optionally through a mask
    ///
    /// # Errors
    /// - `PreconditionViolation` when mask and image dimensions differ
    pub fn render(
        &self,
        image: &DynamicImage,
        mask: Option<&OpacityMask>,
        background: &Background,
    ) -> Result<CompositeResult> {
        let (width, height) = image.dimensions();
        let mut canvas = background.canvas(width, height);

        let foreground = match mask {
            Some(mask) => self.cutout(image, mask)?.into_image(),
            None => image.to_rgba8(),
        };

        for (dst, src) in canvas.pixels_mut().zip(foreground.pixels()) {
            *dst = blend_over(*src, *dst);
        }

        Ok(CompositeResult {
            image: canvas,
            masked: mask.is_some(),
        })
    }

    /// Transparent foreground: source colors with the softened mask as alpha
    ///
    /// # Errors
    /// - `PreconditionViolation` when mask and image dimensions differ
    pub fn cutout(&self, image: &DynamicImage, mask: &OpacityMask) -> Result<CompositeResult> {
        if image.dimensions() != mask.dimensions() {
            return Err(BgoneError::precondition(format!(
                "Mask is {}x{} but image is {}x{}",
                mask.width(),
                mask.height(),
                image.width(),
                image.height()
            )));
        }

        let mut foreground = image.to_rgba8();
        for (pixel, &alpha) in foreground.pixels_mut().zip(mask.values()) {
            pixel.0[3] = self.softening.alpha_byte(alpha);
        }

        Ok(CompositeResult {
            image: foreground,
            masked: true,
        })
    }
}

/// Source-over blend of one pixel
fn blend_over(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let src_alpha = f32::from(src.0[3]) / 255.0;
    if src_alpha >= 1.0 {
        return src;
    }
    let dst_alpha = f32::from(dst.0[3]) / 255.0;
    let out_alpha = src_alpha + dst_alpha * (1.0 - src_alpha);
    if out_alpha <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mix = |s: u8, d: u8| {
        let value = (f32::from(s) * src_alpha + f32::from(d) * dst_alpha * (1.0 - src_alpha))
            / out_alpha;
        value.round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        mix(src.0[0], dst.0[0]),
        mix(src.0[1], dst.0[1]),
        mix(src.0[2], dst.0[2]),
        (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}
