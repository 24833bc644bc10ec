//! Test utilities and mock backends for testing inference functionality
//!
//! The mock implements the `InferenceBackend` trait without a model file so
//! the processor, model handle and editor session can be exercised in unit
//! tests.

use crate::{
    config::PipelineConfig,
    error::{BgoneError, Result},
    inference::{InferenceBackend, MaskLayout, ModelContract},
    types::RawMaskOutput,
};
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Logit written inside the generated foreground disc
pub const MOCK_FOREGROUND_LOGIT: f32 = 12.0;

/// Mock backend for testing
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    /// Fixed outputs returned by every run; `None` generates a disc mask
    fixed_outputs: Option<Vec<RawMaskOutput>>,
    output_names: Vec<String>,
    /// Number of upcoming `initialize` calls that should fail
    failing_inits: usize,
    should_fail_inference: bool,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    /// Backend with one `d0` output holding a centred disc of foreground
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            fixed_outputs: None,
            output_names: vec!["d0".to_string()],
            failing_inits: 0,
            should_fail_inference: false,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Backend that returns the given outputs from every run
    #[must_use]
    pub fn with_outputs(outputs: Vec<RawMaskOutput>) -> Self {
        let output_names = outputs.iter().map(|o| o.name.clone()).collect();
        Self {
            fixed_outputs: Some(outputs),
            output_names,
            ..Self::new()
        }
    }

    /// Fail the next `count` initialization attempts
    #[must_use]
    pub fn failing_init(mut self, count: usize) -> Self {
        self.failing_inits = count;
        self
    }

    #[must_use]
    pub fn failing_inference(mut self) -> Self {
        self.should_fail_inference = true;
        self
    }

    /// Shared handle on the call history, usable after the backend is boxed
    #[must_use]
    pub fn history(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    /// Disc of strong foreground logits over strong background logits
    fn generate_disc(input: &Array4<f32>) -> RawMaskOutput {
        let (_, _, height, width) = input.dim();
        let center_x = width as f32 / 2.0;
        let center_y = height as f32 / 2.0;
        let radius = width.min(height) as f32 / 4.0;

        let mut data = Vec::with_capacity(height * width);
        for y in 0..height {
            for x in 0..width {
                let dx = x as f32 + 0.5 - center_x;
                let dy = y as f32 + 0.5 - center_y;
                let inside = (dx * dx + dy * dy).sqrt() < radius;
                data.push(if inside {
                    MOCK_FOREGROUND_LOGIT
                } else {
                    -MOCK_FOREGROUND_LOGIT
                });
            }
        }

        RawMaskOutput::new("d0", Some(vec![1, 1, height, width]), data)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Count the recorded calls to one method
pub fn count_calls(history: &Arc<Mutex<Vec<String>>>, method: &str) -> usize {
    history
        .lock()
        .map(|calls| calls.iter().filter(|c| c.as_str() == method).count())
        .unwrap_or(0)
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &PipelineConfig) -> Result<ModelContract> {
        self.record_call("initialize");

        if self.failing_inits > 0 {
            self.failing_inits -= 1;
            return Err(BgoneError::model_unavailable(
                "Mock backend initialization failed",
            ));
        }

        self.initialized = true;
        Ok(ModelContract {
            input_name: "input.1".to_string(),
            output_names: self.output_names.clone(),
            layout: MaskLayout::Auto,
        })
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Vec<RawMaskOutput>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(BgoneError::inference("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(BgoneError::inference("Mock backend inference failed"));
        }

        Ok(match &self.fixed_outputs {
            Some(outputs) => outputs.clone(),
            None => vec![Self::generate_disc(input)],
        })
    }

    fn release(&mut self) {
        self.record_call("release");
        self.initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_lifecycle() {
        let mut backend = MockBackend::new();
        let history = backend.history();
        let input = Array4::<f32>::zeros((1, 3, 8, 8));

        assert!(backend.infer(&input).is_err());
        backend.initialize(&PipelineConfig::default()).unwrap();
        let outputs = backend.infer(&input).unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].shape, Some(vec![1, 1, 8, 8]));
        assert_eq!(count_calls(&history, "infer"), 2);
    }

    #[test]
    fn test_mock_init_failures_are_consumed() {
        let mut backend = MockBackend::new().failing_init(1);
        let config = PipelineConfig::default();
        assert!(backend.initialize(&config).is_err());
        assert!(backend.initialize(&config).is_ok());
    }
}
