//! Image I/O operations service
//!
//! Keeps decoding and PNG writing out of the processor and the compositor.

use crate::error::{BgoneError, Result};
use image::{DynamicImage, ImageFormat};
use std::path::Path;

/// Extensions the decoder is built for
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "png",
    "jpg",
    "jpeg",
    "tif",
    "tiff",
    #[cfg(feature = "webp-support")]
    "webp",
];

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// Falls back to content sniffing when the extension does not match the data.
    ///
    /// # Errors
    /// - File missing or unreadable
    /// - Undecodable image data
    ///
    /// # Examples
    /// ```rust,no_run
    /// use bgone::services::ImageIOService;
    ///
    /// let image = ImageIOService::load_image("portrait.jpg")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path = path.as_ref();

        match image::open(path) {
            Ok(image) => Ok(image),
            Err(image::ImageError::IoError(e)) => Err(BgoneError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read '{}': {}", path.display(), e),
            ))),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path.display(),
                    e
                );
                let data = std::fs::read(path)?;
                Self::load_from_bytes(&data)
            },
        }
    }

    /// Decode an image held in memory
    ///
    /// # Errors
    /// - Undecodable image data
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        Ok(image::load_from_memory(bytes)?)
    }

    /// Read an async stream to the end and decode it
    ///
    /// # Errors
    /// - Stream read failures
    /// - Undecodable image data
    pub async fn load_from_reader<R: tokio::io::AsyncRead + Unpin>(
        mut reader: R,
    ) -> Result<DynamicImage> {
        use tokio::io::AsyncReadExt;

        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await?;
        Self::load_from_bytes(&buffer)
    }

    /// Save an image as PNG, creating parent directories as needed
    ///
    /// # Errors
    /// - Directory creation or file write failures
    /// - PNG encoding failures
    pub fn save_png<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        image.save_with_format(path, ImageFormat::Png)?;
        log::debug!("Saved {}x{} PNG to {}", image.width(), image.height(), path.display());
        Ok(())
    }

    /// Encode an image as PNG bytes
    ///
    /// # Errors
    /// - PNG encoding failures
    pub fn png_bytes(image: &DynamicImage) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        image.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    /// Whether the file extension names a format this build can decode
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_supported_formats() {
        assert!(ImageIOService::is_supported_format("a.PNG"));
        assert!(ImageIOService::is_supported_format("dir/b.jpeg"));
        assert!(!ImageIOService::is_supported_format("c.gif"));
        assert!(!ImageIOService::is_supported_format("no_extension"));
    }

    #[test]
    fn test_png_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.png");
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4])));

        ImageIOService::save_png(&image, &path).unwrap();
        let loaded = ImageIOService::load_image(&path).unwrap();
        assert_eq!(loaded.to_rgba8(), image.to_rgba8());
    }

    #[test]
    fn test_content_detection_with_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actually_png.jpg");
        let image = DynamicImage::new_rgb8(4, 4);
        std::fs::write(&path, ImageIOService::png_bytes(&image).unwrap()).unwrap();

        let loaded = ImageIOService::load_image(&path).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (4, 4));
    }

    #[test]
    fn test_missing_file() {
        let err = ImageIOService::load_image("/does/not/exist.png").unwrap_err();
        assert!(matches!(err, BgoneError::Io(_)));
    }

    #[test]
    fn test_garbage_bytes() {
        assert!(matches!(
            ImageIOService::load_from_bytes(b"not an image"),
            Err(BgoneError::Image(_))
        ));
    }

    #[tokio::test]
    async fn test_load_from_reader() {
        let bytes = ImageIOService::png_bytes(&DynamicImage::new_rgb8(5, 7)).unwrap();
        let image = ImageIOService::load_from_reader(std::io::Cursor::new(bytes))
            .await
            .unwrap();
        assert_eq!((image.width(), image.height()), (5, 7));
    }
}
