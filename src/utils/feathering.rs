//! Tonal edge softening of opacity masks
//!
//! `a' = a^gamma` with `gamma = 1 / (1 + feather / 2)`. Values strictly
//! between 0 and 1 are raised, 0 and 1 are fixed points. There is no spatial
//! blur.

use crate::{
    config::MAX_FEATHER,
    error::{BgoneError, Result},
    types::OpacityMask,
};

/// Exponent applied to opacity values for a given feather strength
#[inline]
#[must_use]
pub fn feather_gamma(feather: f32) -> f32 {
    1.0 / (1.0 + feather / 2.0)
}

/// Validated edge-softening curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeSoftening {
    feather: f32,
    gamma: f32,
}

impl EdgeSoftening {
    /// # Errors
    /// - `InvalidConfig` when `feather` is not within `[0, 3]`
    pub fn new(feather: f32) -> Result<Self> {
        if !feather.is_finite() || !(0.0..=MAX_FEATHER).contains(&feather) {
            return Err(BgoneError::config_value_error("feather", feather, "0-3"));
        }
        Ok(Self {
            feather,
            gamma: feather_gamma(feather),
        })
    }

    /// No softening
    #[must_use]
    pub fn identity() -> Self {
        Self {
            feather: 0.0,
            gamma: 1.0,
        }
    }

    #[must_use]
    pub fn feather(&self) -> f32 {
        self.feather
    }

    #[must_use]
    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.feather == 0.0
    }

    /// Soften a single opacity value
    #[inline]
    #[must_use]
    pub fn apply(&self, alpha: f32) -> f32 {
        if self.is_identity() {
            alpha
        } else {
            alpha.clamp(0.0, 1.0).powf(self.gamma)
        }
    }

    /// Softened opacity as an 8-bit alpha, `round(clamp(a' * 255))`
    #[inline]
    #[must_use]
    pub fn alpha_byte(&self, alpha: f32) -> u8 {
        (self.apply(alpha).clamp(0.0, 1.0) * 255.0).round() as u8
    }

    /// Soften every value of a mask
    ///
    /// # Errors
    /// - Never in practice; the output has the input's dimensions
    pub fn soften(&self, mask: &OpacityMask) -> Result<OpacityMask> {
        let values = mask.values().iter().map(|&a| self.apply(a)).collect();
        OpacityMask::new(mask.width(), mask.height(), values)
    }
}

impl Default for EdgeSoftening {
    fn default() -> Self {
        Self::identity()
    }
}
