//! Pure image and tensor transforms of the matting pipeline
//!
//! - [`LetterboxEncoder`]: source image to square network input
//! - [`MaskDecoder`]: raw model outputs to a full-resolution opacity mask
//! - [`EdgeSoftening`]: tonal feathering of mask edges

pub mod feathering;
pub mod mask_decoder;
pub mod preprocessing;

pub use feathering::{feather_gamma, EdgeSoftening};
pub use mask_decoder::{sigmoid, MaskDecoder};
pub use preprocessing::LetterboxEncoder;
