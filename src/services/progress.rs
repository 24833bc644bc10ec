//! Progress reporting service
//!
//! Separates progress reporting from the pipeline so the CLI can drive a
//! progress bar while library users stay silent by default.

use crate::types::ProcessingTimings;
use instant::Instant;

/// Stages of one matting run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Loading and decoding the input image
    ImageLoading,
    /// Loading the model on first use
    ModelLoading,
    /// Letterboxing into the network input
    Encoding,
    /// Running model inference
    Inference,
    /// Turning logits into the opacity mask
    Decoding,
    Completed,
}

impl ProcessingStage {
    /// Human-readable description of the stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::ImageLoading => "Loading input image",
            Self::ModelLoading => "Loading segmentation model",
            Self::Encoding => "Letterboxing image",
            Self::Inference => "Running AI inference",
            Self::Decoding => "Decoding opacity mask",
            Self::Completed => "Processing completed",
        }
    }

    /// Typical progress percentage reached when the stage starts
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            Self::ImageLoading => 5,
            Self::ModelLoading => 10,
            Self::Encoding => 20,
            Self::Inference => 30,
            Self::Decoding => 80,
            Self::Completed => 100,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stage: ProcessingStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    pub description: String,
    /// Elapsed time since tracking started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: ProcessingStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }
}

/// Trait for reporting progress during matting
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, update: ProgressUpdate);

    /// Report processing completion with final timings
    fn report_completion(&self, timings: &ProcessingTimings);

    /// Report an error during processing
    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// Reporter that logs progress through `log`
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        log::info!("✅ Matting completed in {}ms", timings.total_ms);

        if self.verbose {
            log::info!("  📊 Detailed timings:");
            log::info!("    • Model load: {}ms", timings.model_load_ms);
            log::info!("    • Encode: {}ms", timings.encode_ms);
            log::info!("    • Inference: {}ms", timings.inference_ms);
            log::info!("    • Decode: {}ms", timings.decode_ms);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }
}

/// Progress tracker that manages timing and progress reporting
pub struct ProgressTracker {
    reporter: Box<dyn ProgressReporter>,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(reporter: Box<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    /// Tracker with a console reporter
    #[must_use]
    pub fn console(verbose: bool) -> Self {
        Self::new(Box::new(ConsoleProgressReporter::new(verbose)))
    }

    pub fn report_stage(&mut self, stage: ProcessingStage) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    pub fn report_completion(&self, timings: &ProcessingTimings) {
        self.reporter.report_completion(timings);
    }

    /// Report an error against the most recent stage
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(ProcessingStage::ModelLoading);
        self.reporter.report_error(stage, error);
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingReporter {
        stages: Arc<Mutex<Vec<ProcessingStage>>>,
        errors: Arc<Mutex<Vec<String>>>,
    }

    impl ProgressReporter for RecordingReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.stages.lock().unwrap().push(update.stage);
        }

        fn report_completion(&self, _timings: &ProcessingTimings) {
            self.stages.lock().unwrap().push(ProcessingStage::Completed);
        }

        fn report_error(&self, stage: ProcessingStage, error: &str) {
            self.errors
                .lock()
                .unwrap()
                .push(format!("{}: {}", stage.description(), error));
        }
    }

    #[test]
    fn test_stage_percentages_increase() {
        let stages = [
            ProcessingStage::ImageLoading,
            ProcessingStage::ModelLoading,
            ProcessingStage::Encoding,
            ProcessingStage::Inference,
            ProcessingStage::Decoding,
            ProcessingStage::Completed,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].progress_percentage() < pair[1].progress_percentage());
        }
    }

    #[test]
    fn test_tracker_records_stages_and_errors() {
        let stages = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let mut tracker = ProgressTracker::new(Box::new(RecordingReporter {
            stages: Arc::clone(&stages),
            errors: Arc::clone(&errors),
        }));

        tracker.report_stage(ProcessingStage::Encoding);
        tracker.report_stage(ProcessingStage::Inference);
        tracker.report_error("boom");
        tracker.report_completion(&ProcessingTimings::default());

        assert_eq!(tracker.current_stage(), Some(ProcessingStage::Inference));
        assert_eq!(
            *stages.lock().unwrap(),
            vec![
                ProcessingStage::Encoding,
                ProcessingStage::Inference,
                ProcessingStage::Completed
            ]
        );
        assert_eq!(errors.lock().unwrap()[0], "Running AI inference: boom");
    }
}
