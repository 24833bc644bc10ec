//! Owned, lazily loaded inference model
//!
//! A [`ModelHandle`] wraps one backend. The model is loaded on first use,
//! reused for every later run and released by [`ModelHandle::dispose`]. A
//! failed load leaves the handle unloaded, and the next use tries again.

use crate::{
    config::PipelineConfig,
    error::{BgoneError, Result},
    inference::{InferenceBackend, ModelContract},
    types::RawMaskOutput,
};
use instant::{Duration, Instant};
use ndarray::Array4;

/// Lifecycle wrapper around an inference backend
pub struct ModelHandle {
    backend: Box<dyn InferenceBackend>,
    contract: Option<ModelContract>,
    load_attempts: u32,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("backend", &self.backend.name())
            .field("contract", &self.contract)
            .field("load_attempts", &self.load_attempts)
            .finish()
    }
}

impl ModelHandle {
    #[must_use]
    pub fn new(backend: Box<dyn InferenceBackend>) -> Self {
        Self {
            backend,
            contract: None,
            load_attempts: 0,
        }
    }

    /// Load the model unless it is already loaded
    ///
    /// Returns the load time when this call performed the load.
    ///
    /// # Errors
    /// - `ModelUnavailable` when the backend cannot load the model
    pub fn ensure_loaded(&mut self, config: &PipelineConfig) -> Result<Option<Duration>> {
        if self.contract.is_some() {
            return Ok(None);
        }

        self.load_attempts += 1;
        let start = Instant::now();

        match self.backend.initialize(config) {
            Ok(contract) => {
                let elapsed = start.elapsed();
                tracing::info!(
                    backend = self.backend.name(),
                    model = %config.model_spec.display_name(),
                    outputs = contract.output_names.len(),
                    load_ms = elapsed.as_millis() as u64,
                    "Model loaded"
                );
                self.contract = Some(contract);
                Ok(Some(elapsed))
            },
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    attempt = self.load_attempts,
                    error = %e,
                    "Model load failed; will retry on next use"
                );
                self.backend.release();
                Err(e)
            },
        }
    }

    /// Run the loaded model once
    ///
    /// # Errors
    /// - `Internal` when called before a successful load
    /// - Backend inference failures
    pub fn run(&mut self, input: &Array4<f32>) -> Result<Vec<RawMaskOutput>> {
        if self.contract.is_none() {
            return Err(BgoneError::internal("Model handle used before loading"));
        }
        self.backend.infer(input)
    }

    /// Release the model; a later use loads it again
    pub fn dispose(&mut self) {
        if self.contract.take().is_some() {
            tracing::debug!(backend = self.backend.name(), "Model disposed");
        }
        self.backend.release();
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.contract.is_some()
    }

    #[must_use]
    pub fn contract(&self) -> Option<&ModelContract> {
        self.contract.as_ref()
    }

    /// Number of load attempts made so far, successful or not
    #[must_use]
    pub fn load_attempts(&self) -> u32 {
        self.load_attempts
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{count_calls, MockBackend};

    #[test]
    fn test_lazy_load_and_reuse() {
        let backend = MockBackend::new();
        let history = backend.history();
        let mut handle = ModelHandle::new(Box::new(backend));
        let config = PipelineConfig::default();

        assert!(!handle.is_loaded());
        assert!(handle.ensure_loaded(&config).unwrap().is_some());
        assert!(handle.ensure_loaded(&config).unwrap().is_none());
        assert!(handle.is_loaded());
        assert_eq!(count_calls(&history, "initialize"), 1);
        assert_eq!(handle.contract().unwrap().output_names, vec!["d0"]);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let mut handle = ModelHandle::new(Box::new(MockBackend::new().failing_init(1)));
        let config = PipelineConfig::default();

        assert!(matches!(
            handle.ensure_loaded(&config),
            Err(BgoneError::ModelUnavailable(_))
        ));
        assert!(!handle.is_loaded());

        assert!(handle.ensure_loaded(&config).is_ok());
        assert!(handle.is_loaded());
        assert_eq!(handle.load_attempts(), 2);
    }

    #[test]
    fn test_run_requires_load() {
        let mut handle = ModelHandle::new(Box::new(MockBackend::new()));
        let input = Array4::<f32>::zeros((1, 3, 8, 8));
        assert!(handle.run(&input).is_err());

        handle.ensure_loaded(&PipelineConfig::default()).unwrap();
        assert_eq!(handle.run(&input).unwrap().len(), 1);
    }

    #[test]
    fn test_dispose_then_reload() {
        let backend = MockBackend::new();
        let history = backend.history();
        let mut handle = ModelHandle::new(Box::new(backend));
        let config = PipelineConfig::default();

        handle.ensure_loaded(&config).unwrap();
        handle.dispose();
        assert!(!handle.is_loaded());

        handle.ensure_loaded(&config).unwrap();
        assert_eq!(count_calls(&history, "initialize"), 2);
    }
}
