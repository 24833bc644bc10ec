//! ONNX Runtime backend for salient-object segmentation models
//!
//! Input and output names are read from the loaded session, the encoded tensor
//! is bound to the first declared input by name, and every declared output is
//! looked up in the result map. Supports CPU, CUDA and `CoreML` execution
//! providers.

use crate::config::{ExecutionProvider, PipelineConfig};
use crate::error::{BgoneError, Result};
use crate::inference::{InferenceBackend, ModelContract};
use crate::types::RawMaskOutput;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;
use std::time::Instant;

/// ONNX Runtime backend
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
    contract: Option<ModelContract>,
}

impl OnnxBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// List ONNX Runtime execution providers with availability status and descriptions
    ///
    /// # Examples
    /// ```rust,no_run
    /// use bgone::backends::OnnxBackend;
    ///
    /// for (name, available, description) in OnnxBackend::list_providers() {
    ///     println!("{}: {} - {}", name, if available { "yes" } else { "no" }, description);
    /// }
    /// ```
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Platform: {} {}, {} cores",
            std::env::consts::OS,
            std::env::consts::ARCH,
            available_cores()
        );

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available(),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available(),
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Execution providers to register for the requested provider
    ///
    /// Unavailable accelerators fall back to CPU with a warning.
    fn execution_providers(requested: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();
        match requested {
            ExecutionProvider::Auto => {
                if cuda_available() {
                    log::info!("🚀 CUDA execution provider is available and will be used");
                    providers.push(CUDAExecutionProvider::default().build());
                }
                if coreml_available() {
                    log::info!("🍎 CoreML execution provider is available and will be used");
                    providers.push(
                        CoreMLExecutionProvider::default()
                            .with_subgraphs(true)
                            .build(),
                    );
                }
                if providers.is_empty() {
                    log::debug!("No hardware acceleration available, using CPU");
                }
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
            },
            ExecutionProvider::Cuda => {
                if cuda_available() {
                    log::info!("Using CUDA execution provider");
                    providers.push(CUDAExecutionProvider::default().build());
                } else {
                    log::warn!(
                        "CUDA execution provider requested but not available, falling back to CPU"
                    );
                }
            },
            ExecutionProvider::CoreMl => {
                if coreml_available() {
                    log::info!("🍎 Using CoreML execution provider (explicitly requested)");
                    providers.push(
                        CoreMLExecutionProvider::default()
                            .with_subgraphs(true)
                            .build(),
                    );
                } else {
                    log::warn!(
                        "CoreML execution provider requested but not available, falling back to CPU"
                    );
                }
            },
        }
        providers
    }

    fn session_builder(config: &PipelineConfig) -> Result<SessionBuilder> {
        let builder_error =
            |stage: &str, e: ort::Error| BgoneError::model_unavailable(format!("{stage}: {e}"));

        let mut builder = Session::builder()
            .map_err(|e| builder_error("Failed to create session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| builder_error("Failed to set optimization level", e))?;

        let providers = Self::execution_providers(config.execution_provider);
        if !providers.is_empty() {
            builder = builder
                .with_execution_providers(providers)
                .map_err(|e| builder_error("Failed to set execution providers", e))?;
        }

        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            available_cores()
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (available_cores() / 4).max(1)
        };
        log::debug!(
            "Threading: {intra_threads} intra-op threads, {inter_threads} inter-op threads"
        );

        builder
            .with_intra_threads(intra_threads)
            .map_err(|e| builder_error("Failed to set intra threads", e))?
            .with_inter_threads(inter_threads)
            .map_err(|e| builder_error("Failed to set inter threads", e))
    }

    /// Declared inputs and outputs of a session, as a contract
    fn discover_contract(session: &Session) -> Result<ModelContract> {
        let input_names = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect();

        let outputs = session
            .outputs
            .iter()
            .map(|output| {
                let declared = output
                    .output_type
                    .tensor_shape()
                    .map(|shape| {
                        shape
                            .iter()
                            .map(|&dim| usize::try_from(dim).ok().filter(|d| *d > 0))
                            .collect()
                    })
                    .unwrap_or_default();
                (output.name.clone(), declared)
            })
            .collect();

        ModelContract::resolve(input_names, outputs)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &PipelineConfig) -> Result<ModelContract> {
        if let Some(contract) = &self.contract {
            return Ok(contract.clone());
        }

        let load_start = Instant::now();
        let model_data = config.model_spec.load_bytes()?;

        let session = Self::session_builder(config)?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                BgoneError::model_unavailable(format!(
                    "Failed to create session for '{}': {e}",
                    config.model_spec.display_name()
                ))
            })?;

        let contract = Self::discover_contract(&session)?;
        log::debug!(
            "ONNX model contract: input '{}', outputs {:?}, layout {:?}",
            contract.input_name,
            contract.output_names,
            contract.layout
        );
        log::info!(
            "📊 Model loading complete: {:.0}ms",
            load_start.elapsed().as_secs_f64() * 1000.0
        );

        self.session = Some(session);
        self.contract = Some(contract.clone());
        Ok(contract)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Vec<RawMaskOutput>> {
        let (Some(session), Some(contract)) = (self.session.as_mut(), self.contract.as_ref())
        else {
            return Err(BgoneError::internal("ONNX backend not initialized"));
        };

        let inference_start = Instant::now();
        log::debug!("Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone())
            .map_err(|e| BgoneError::inference(format!("Failed to convert input tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![contract.input_name.as_str() => input_value])
            .map_err(|e| BgoneError::inference(format!("ONNX inference failed: {e}")))?;

        let mut results = Vec::with_capacity(contract.output_names.len());
        for name in &contract.output_names {
            let Some(value) = outputs.get(name.as_str()) else {
                log::debug!("Output '{name}' missing from inference results");
                results.push(RawMaskOutput::missing(name.as_str()));
                continue;
            };

            match value.try_extract_array::<f32>() {
                Ok(view) => results.push(RawMaskOutput::new(
                    name.as_str(),
                    Some(view.shape().to_vec()),
                    view.iter().copied().collect(),
                )),
                Err(e) => {
                    log::debug!("Output '{name}' is not an f32 tensor: {e}");
                    results.push(RawMaskOutput::missing(name.as_str()));
                },
            }
        }

        log::debug!(
            "Inference complete: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(results)
    }

    fn release(&mut self) {
        self.session = None;
        self.contract = None;
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(8)
}

fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

fn coreml_available() -> bool {
    OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
}
