//! Matting processor
//!
//! `MattingProcessor` owns the pipeline configuration and the model handle, and
//! runs encode, inference and decode for each image. It is shared by the
//! library API, the editor session and the CLI so all of them behave the same.

use crate::{
    config::PipelineConfig,
    error::{BgoneError, Result},
    inference::{InferenceBackend, ModelContract},
    model_handle::ModelHandle,
    services::{ImageIOService, ProcessingStage, ProgressTracker},
    types::{MattingMetadata, MattingResult, ProcessingTimings, RawMaskOutput},
    utils::{LetterboxEncoder, MaskDecoder},
};
use image::{DynamicImage, GenericImageView};
use instant::Instant;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{instrument, span, Level};

/// Backend type enumeration for runtime selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create a backend instance of the specified type
    ///
    /// # Errors
    /// - `InvalidConfig` when the backend is not compiled into this build
    fn create_backend(&self, backend_type: BackendType) -> Result<Box<dyn InferenceBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends enabled through cargo features
#[derive(Debug, Default)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new())),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(BgoneError::invalid_config(format!(
                "The {other} backend is not enabled in this build"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        #[allow(unused_mut)]
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

/// Runs the letterbox, inference and decode pipeline against one model
pub struct MattingProcessor {
    config: PipelineConfig,
    encoder: LetterboxEncoder,
    model: ModelHandle,
    progress_tracker: Option<ProgressTracker>,
}

impl std::fmt::Debug for MattingProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MattingProcessor")
            .field("config", &self.config)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl MattingProcessor {
    /// Create a processor around an explicit backend
    ///
    /// The model is not loaded until the first call to [`Self::matte`] or
    /// [`Self::initialize`].
    ///
    /// # Errors
    /// - `InvalidConfig` when the configuration fails validation
    pub fn new(config: PipelineConfig, backend: Box<dyn InferenceBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            encoder: LetterboxEncoder::from_config(&config),
            model: ModelHandle::new(backend),
            config,
            progress_tracker: None,
        })
    }

    /// Create a processor with a backend from the default factory
    ///
    /// # Errors
    /// - `InvalidConfig` for invalid configuration or a backend missing from this build
    ///
    /// # Examples
    /// ```rust,no_run
    /// use bgone::{BackendType, MattingProcessor, ModelSpec, PipelineConfig};
    ///
    /// let config = PipelineConfig::builder()
    ///     .model_spec(ModelSpec::from_path("models/u2netp.onnx"))
    ///     .build()?;
    /// let mut processor = MattingProcessor::with_backend_type(config, BackendType::Onnx)?;
    /// let result = processor.matte_file("portrait.jpg")?;
    /// result.mask.save_png("portrait_mask.png")?;
    /// # Ok::<(), bgone::BgoneError>(())
    /// ```
    pub fn with_backend_type(config: PipelineConfig, backend_type: BackendType) -> Result<Self> {
        Self::with_factory(config, backend_type, &DefaultBackendFactory)
    }

    /// Create a processor with a backend from a custom factory
    ///
    /// # Errors
    /// - `InvalidConfig` for invalid configuration
    /// - Whatever the factory reports for `backend_type`
    pub fn with_factory(
        config: PipelineConfig,
        backend_type: BackendType,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        let backend = factory.create_backend(backend_type)?;
        Self::new(config, backend)
    }

    /// Attach a progress tracker that receives stage updates
    pub fn set_progress_tracker(&mut self, tracker: ProgressTracker) {
        self.progress_tracker = Some(tracker);
    }

    /// Load the model now instead of on first use
    ///
    /// # Errors
    /// - `ModelUnavailable` when the model cannot be loaded
    pub fn initialize(&mut self) -> Result<()> {
        self.load_model().map(|_| ())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.model.is_loaded()
    }

    /// Release the model; the next run loads it again
    pub fn dispose(&mut self) {
        self.model.dispose();
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Contract of the loaded model, if loaded
    #[must_use]
    pub fn model_contract(&self) -> Option<&ModelContract> {
        self.model.contract()
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.model.backend_name()
    }

    /// Compute the opacity mask for an image
    ///
    /// # Errors
    /// - `PreconditionViolation` for a zero-sized image
    /// - `ModelUnavailable` when the model cannot be loaded
    /// - `Inference` when the runtime fails
    /// - `ModelOutputEmpty` when no output produced usable data
    #[instrument(
        skip(self, image),
        fields(
            backend = self.model.backend_name(),
            model = %self.config.model_spec.display_name(),
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn matte(&mut self, image: &DynamicImage) -> Result<MattingResult> {
        let result = self.run_pipeline(image);
        if let (Err(e), Some(tracker)) = (&result, &self.progress_tracker) {
            tracker.report_error(&e.to_string());
        }
        result
    }

    /// Decode image bytes and compute the mask
    ///
    /// # Errors
    /// - Undecodable image data
    /// - Any error from [`Self::matte`]
    pub fn matte_bytes(&mut self, bytes: &[u8]) -> Result<MattingResult> {
        self.report_stage(ProcessingStage::ImageLoading);
        let image = ImageIOService::load_from_bytes(bytes)?;
        self.matte(&image)
    }

    /// Load an image file and compute the mask
    ///
    /// # Errors
    /// - File read or decoding failures
    /// - Any error from [`Self::matte`]
    pub fn matte_file<P: AsRef<Path>>(&mut self, path: P) -> Result<MattingResult> {
        self.report_stage(ProcessingStage::ImageLoading);
        let image = ImageIOService::load_image(path)?;
        self.matte(&image)
    }

    /// Read an image from an async stream and compute the mask
    ///
    /// # Errors
    /// - Stream read or decoding failures
    /// - Any error from [`Self::matte`]
    pub async fn matte_reader<R: tokio::io::AsyncRead + Unpin>(
        &mut self,
        reader: R,
    ) -> Result<MattingResult> {
        self.report_stage(ProcessingStage::ImageLoading);
        let image = ImageIOService::load_from_reader(reader).await?;
        self.matte(&image)
    }

    fn run_pipeline(&mut self, image: &DynamicImage) -> Result<MattingResult> {
        let total_start = Instant::now();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(BgoneError::precondition(format!(
                "Cannot matte a {width}x{height} image"
            )));
        }

        let mut timings = ProcessingTimings::default();
        if let Some(load_time) = self.load_model()? {
            timings.model_load_ms = load_time.as_millis() as u64;
        }

        let (tensor, placement) = {
            let _span = span!(Level::DEBUG, "encode", width, height).entered();
            self.report_stage(ProcessingStage::Encoding);
            let start = Instant::now();
            let encoded = self.encoder.encode(image)?;
            timings.encode_ms = start.elapsed().as_millis() as u64;
            encoded
        };
        debug!(
            "Letterboxed {}x{} into {}x{} at offset ({}, {})",
            width,
            height,
            placement.scaled_width,
            placement.scaled_height,
            placement.offset_x,
            placement.offset_y
        );

        let outputs = {
            let _span = span!(Level::INFO, "inference", backend = self.model.backend_name()).entered();
            self.report_stage(ProcessingStage::Inference);
            let start = Instant::now();
            let outputs = self.model.run(&tensor.data)?;
            timings.inference_ms = start.elapsed().as_millis() as u64;
            outputs
        };

        let mask = {
            let _span = span!(Level::DEBUG, "decode", outputs = outputs.len()).entered();
            self.report_stage(ProcessingStage::Decoding);
            let start = Instant::now();
            let mask = self.decoder().decode(&outputs, &placement, width, height)?;
            timings.decode_ms = start.elapsed().as_millis() as u64;
            mask
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;
        tracing::info!(
            total_ms = timings.total_ms,
            inference_ms = timings.inference_ms,
            "Matting finished"
        );

        if let Some(tracker) = self.progress_tracker.as_mut() {
            tracker.report_stage(ProcessingStage::Completed);
            tracker.report_completion(&timings);
        }

        Ok(MattingResult {
            mask,
            metadata: MattingMetadata {
                model_name: self.config.model_spec.display_name(),
                output_count: produced_outputs(&outputs),
                placement,
                timings,
                created_at: chrono::Utc::now(),
            },
        })
    }

    fn load_model(&mut self) -> Result<Option<instant::Duration>> {
        if !self.model.is_loaded() {
            info!(
                "Loading model {} with {} backend",
                self.config.model_spec.display_name(),
                self.model.backend_name()
            );
            self.report_stage(ProcessingStage::ModelLoading);
        }
        self.model.ensure_loaded(&self.config)
    }

    fn decoder(&self) -> MaskDecoder {
        let decoder = MaskDecoder::from_config(&self.config);
        match self.model.contract() {
            Some(contract) => decoder.with_layout(contract.layout),
            None => decoder,
        }
    }

    fn report_stage(&mut self, stage: ProcessingStage) {
        if let Some(tracker) = self.progress_tracker.as_mut() {
            tracker.report_stage(stage);
        }
    }
}

/// Number of outputs that carried data
fn produced_outputs(outputs: &[RawMaskOutput]) -> usize {
    outputs.iter().filter(|o| o.data.is_some()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{count_calls, MockBackend};
    use crate::config::OutputAggregation;
    use crate::services::{ProgressReporter, ProgressUpdate};
    use image::{Rgb, RgbImage};
    use std::sync::{Arc, Mutex};

    fn test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 120, 200])))
    }

    fn processor(backend: MockBackend) -> MattingProcessor {
        MattingProcessor::new(PipelineConfig::default(), Box::new(backend)).unwrap()
    }

    #[test]
    fn test_matte_produces_mask_at_source_resolution() {
        let mut processor = processor(MockBackend::new());
        let result = processor.matte(&test_image(640, 480)).unwrap();

        assert_eq!(result.mask.dimensions(), (640, 480));
        assert!(result.mask.get(320, 240).unwrap() > 0.95);
        assert!(result.mask.get(5, 5).unwrap() < 0.05);
        assert_eq!(result.metadata.output_count, 1);
        assert_eq!(result.metadata.placement.offset_y, 40);
    }

    #[test]
    fn test_model_loaded_lazily_once() {
        let backend = MockBackend::new();
        let history = backend.history();
        let mut processor = processor(backend);

        assert!(!processor.is_initialized());
        processor.matte(&test_image(32, 32)).unwrap();
        processor.matte(&test_image(16, 48)).unwrap();

        assert!(processor.is_initialized());
        assert_eq!(count_calls(&history, "initialize"), 1);
        assert_eq!(count_calls(&history, "infer"), 2);
    }

    #[test]
    fn test_failed_load_retried_on_next_call() {
        let mut processor = processor(MockBackend::new().failing_init(1));

        let err = processor.matte(&test_image(32, 32)).unwrap_err();
        assert!(matches!(err, BgoneError::ModelUnavailable(_)));
        assert!(!processor.is_initialized());

        assert!(processor.matte(&test_image(32, 32)).is_ok());
    }

    #[test]
    fn test_zero_sized_image_does_not_load_model() {
        let backend = MockBackend::new();
        let history = backend.history();
        let mut processor = processor(backend);

        let err = processor.matte(&DynamicImage::new_rgb8(0, 10)).unwrap_err();
        assert!(matches!(err, BgoneError::PreconditionViolation(_)));
        assert_eq!(count_calls(&history, "initialize"), 0);
    }

    #[test]
    fn test_all_outputs_missing() {
        let backend = MockBackend::with_outputs(vec![
            RawMaskOutput::missing("d0"),
            RawMaskOutput::missing("d1"),
        ]);
        let err = processor(backend).matte(&test_image(8, 8)).unwrap_err();
        assert!(matches!(err, BgoneError::ModelOutputEmpty));
    }

    #[test]
    fn test_inference_failure_propagates() {
        let err = processor(MockBackend::new().failing_inference())
            .matte(&test_image(8, 8))
            .unwrap_err();
        assert!(matches!(err, BgoneError::Inference(_)));
    }

    #[test]
    fn test_invert_alpha_and_single_aggregation() {
        let backend = MockBackend::with_outputs(vec![
            RawMaskOutput::filled("d0", &[1, 1, 320, 320], 20.0),
            RawMaskOutput::filled("d1", &[1, 1, 320, 320], -20.0),
        ]);
        let config = PipelineConfig::builder()
            .output_aggregation(OutputAggregation::Single)
            .invert_alpha(true)
            .build()
            .unwrap();
        let mut processor = MattingProcessor::new(config, Box::new(backend)).unwrap();

        let result = processor.matte(&test_image(50, 30)).unwrap();
        let (lo, hi) = result.mask.value_range();
        assert!(hi < 0.01, "{lo}..{hi}");
        assert_eq!(result.metadata.output_count, 2);
    }

    #[test]
    fn test_dispose_forces_reload() {
        let backend = MockBackend::new();
        let history = backend.history();
        let mut processor = processor(backend);

        processor.initialize().unwrap();
        processor.dispose();
        assert!(!processor.is_initialized());
        processor.matte(&test_image(8, 8)).unwrap();
        assert_eq!(count_calls(&history, "initialize"), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            feather: 7.0,
            ..PipelineConfig::default()
        };
        assert!(MattingProcessor::new(config, Box::new(MockBackend::new())).is_err());
    }

    #[test]
    fn test_matte_bytes() {
        let bytes = ImageIOService::png_bytes(&test_image(20, 10)).unwrap();
        let result = processor(MockBackend::new()).matte_bytes(&bytes).unwrap();
        assert_eq!(result.mask.dimensions(), (20, 10));

        assert!(processor(MockBackend::new()).matte_bytes(b"garbage").is_err());
    }

    #[tokio::test]
    async fn test_matte_reader() {
        let bytes = ImageIOService::png_bytes(&test_image(24, 12)).unwrap();
        let result = processor(MockBackend::new())
            .matte_reader(std::io::Cursor::new(bytes))
            .await
            .unwrap();
        assert_eq!(result.mask.dimensions(), (24, 12));
    }

    struct StageRecorder(Arc<Mutex<Vec<ProcessingStage>>>);

    impl ProgressReporter for StageRecorder {
        fn report_progress(&self, update: ProgressUpdate) {
            self.0.lock().unwrap().push(update.stage);
        }

        fn report_completion(&self, _timings: &ProcessingTimings) {}

        fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
    }

    #[test]
    fn test_progress_stages_reported_in_order() {
        let stages = Arc::new(Mutex::new(Vec::new()));
        let mut processor = processor(MockBackend::new());
        processor.set_progress_tracker(ProgressTracker::new(Box::new(StageRecorder(
            Arc::clone(&stages),
        ))));

        processor.matte(&test_image(8, 8)).unwrap();
        assert_eq!(
            *stages.lock().unwrap(),
            vec![
                ProcessingStage::ModelLoading,
                ProcessingStage::Encoding,
                ProcessingStage::Inference,
                ProcessingStage::Decoding,
                ProcessingStage::Completed,
            ]
        );
    }

    #[test]
    fn test_matte_bytes_reports_every_stage_with_rising_progress() {
        let stages = Arc::new(Mutex::new(Vec::new()));
        let mut processor = processor(MockBackend::new());
        processor.set_progress_tracker(ProgressTracker::new(Box::new(StageRecorder(
            Arc::clone(&stages),
        ))));

        let bytes = ImageIOService::png_bytes(&test_image(8, 8)).unwrap();
        processor.matte_bytes(&bytes).unwrap();

        let stages = stages.lock().unwrap();
        assert_eq!(
            *stages,
            vec![
                ProcessingStage::ImageLoading,
                ProcessingStage::ModelLoading,
                ProcessingStage::Encoding,
                ProcessingStage::Inference,
                ProcessingStage::Decoding,
                ProcessingStage::Completed,
            ]
        );
        for pair in stages.windows(2) {
            assert!(pair[0].progress_percentage() < pair[1].progress_percentage());
        }
    }

    #[test]
    fn test_default_factory_reports_compiled_backends() {
        let factory = DefaultBackendFactory;
        let available = factory.available_backends();
        assert_eq!(available.contains(&BackendType::Onnx), cfg!(feature = "onnx"));
        assert_eq!(available.contains(&BackendType::Tract), cfg!(feature = "tract"));
    }
}
