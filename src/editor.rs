//! In-memory editing session
//!
//! Holds the current image, the chosen background and the most recent mask.
//! Loading a new image invalidates the mask, and a mask computed for an image
//! that has since been replaced is dropped instead of being applied.

use crate::{
    compositor::{parse_hex_color, Background, CompositeResult, Compositor},
    error::{BgoneError, Result},
    processor::MattingProcessor,
    services::ImageIOService,
    types::OpacityMask,
};
use image::DynamicImage;
use std::path::Path;

/// Claim on the image that was current when matting started
#[derive(Debug, Clone)]
pub struct MattingTicket {
    generation: u64,
    image: DynamicImage,
}

impl MattingTicket {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Snapshot of the image to matte
    #[must_use]
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

/// Current image, background and last mask
#[derive(Debug, Clone, Default)]
pub struct EditorSession {
    image: Option<DynamicImage>,
    background: Background,
    last_mask: Option<OpacityMask>,
    generation: u64,
}

impl EditorSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current image and drop the previous mask
    ///
    /// Returns the generation number of the new image.
    pub fn load_image(&mut self, image: DynamicImage) -> u64 {
        self.generation += 1;
        self.last_mask = None;
        tracing::debug!(
            generation = self.generation,
            width = image.width(),
            height = image.height(),
            "Image loaded"
        );
        self.image = Some(image);
        self.generation
    }

    /// Load the current image from a file
    ///
    /// # Errors
    /// - File read or decoding failures; the session is left unchanged
    pub fn load_image_file<P: AsRef<Path>>(&mut self, path: P) -> Result<u64> {
        let image = ImageIOService::load_image(path)?;
        Ok(self.load_image(image))
    }

    /// Change the background; the last mask stays valid
    pub fn set_background(&mut self, background: Background) {
        self.background = background;
    }

    /// Change the background to a `#rrggbb` color
    ///
    /// # Errors
    /// - `InvalidConfig` for a malformed color
    pub fn set_background_color(&mut self, hex: &str) -> Result<()> {
        self.background = Background::Color(parse_hex_color(hex)?);
        Ok(())
    }

    /// Use an image file as the background
    ///
    /// # Errors
    /// - File read or decoding failures
    pub fn set_background_image<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.background = Background::Image(ImageIOService::load_image(path)?);
        Ok(())
    }

    #[must_use]
    pub fn image(&self) -> Option<&DynamicImage> {
        self.image.as_ref()
    }

    #[must_use]
    pub fn background(&self) -> &Background {
        &self.background
    }

    #[must_use]
    pub fn last_mask(&self) -> Option<&OpacityMask> {
        self.last_mask.as_ref()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start matting the current image
    ///
    /// # Errors
    /// - `PreconditionViolation` when no image is loaded
    pub fn begin_matting(&self) -> Result<MattingTicket> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| BgoneError::precondition("No image loaded"))?;
        Ok(MattingTicket {
            generation: self.generation,
            image: image.clone(),
        })
    }

    /// Store the mask computed for `ticket`
    ///
    /// Returns `false` and discards the mask when the image was replaced
    /// after the ticket was issued.
    pub fn complete_matting(&mut self, ticket: MattingTicket, mask: OpacityMask) -> bool {
        if ticket.generation != self.generation {
            tracing::debug!(
                ticket = ticket.generation,
                current = self.generation,
                "Discarding mask for a replaced image"
            );
            return false;
        }
        self.last_mask = Some(mask);
        true
    }

    /// Matte the current image with `processor` and keep the mask
    ///
    /// # Errors
    /// - `PreconditionViolation` when no image is loaded
    /// - Any error from [`MattingProcessor::matte`]
    pub fn remove_background(&mut self, processor: &mut MattingProcessor) -> Result<()> {
        let ticket = self.begin_matting()?;
        let result = processor.matte(ticket.image())?;
        self.complete_matting(ticket, result.mask);
        Ok(())
    }

    /// Render the current state: masked when a mask is held, plain otherwise
    ///
    /// # Errors
    /// - `PreconditionViolation` when no image is loaded
    pub fn render(&self, compositor: &Compositor) -> Result<CompositeResult> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| BgoneError::precondition("No image loaded"))?;
        compositor.render(image, self.last_mask.as_ref(), &self.background)
    }
}
