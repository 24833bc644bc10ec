//! Tract backend for salient-object segmentation models
//!
//! Pure Rust inference with no external runtime. The input fact is pinned to
//! `[1, 3, target, target]` before optimization so models with symbolic
//! batch or spatial axes still get a concrete plan.

use crate::config::PipelineConfig;
use crate::error::{BgoneError, Result};
use crate::inference::{InferenceBackend, ModelContract};
use crate::types::RawMaskOutput;
use instant::Instant;
use ndarray::Array4;
use tract_onnx::prelude::*;
use tract_onnx::tract_hir::internal::DimLike;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running segmentation models using pure Rust inference
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
    contract: Option<ModelContract>,
}

impl TractBackend {
    /// List Tract execution providers with availability status and descriptions
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Tract backend on {} {}, pure Rust",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    /// Create a new uninitialized Tract backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn load_model(config: &PipelineConfig) -> Result<TractModel> {
        let model_data = config.model_spec.load_bytes()?;
        let target = config.target_size as usize;

        log::info!("🚀 Initializing Tract backend");
        log::info!("🧠 Model: {}", config.model_spec.display_name());

        onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgoneError::model_unavailable(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, target, target]).into())
            .map_err(|e| BgoneError::model_unavailable(format!("Failed to set input fact: {e}")))?
            .into_optimized()
            .map_err(|e| BgoneError::model_unavailable(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                BgoneError::model_unavailable(format!("Failed to create runnable model: {e}"))
            })
    }

    /// Declared inputs and outputs of the optimized graph, as a contract
    fn discover_contract(model: &TractModel) -> Result<ModelContract> {
        let graph = model.model();
        let graph_error =
            |e: TractError| BgoneError::model_unavailable(format!("Invalid model graph: {e}"));

        let input_names = graph
            .input_outlets()
            .map_err(graph_error)?
            .iter()
            .map(|outlet| graph.node(outlet.node).name.clone())
            .collect();

        let mut outputs = Vec::new();
        for outlet in graph.output_outlets().map_err(graph_error)? {
            let name = graph
                .outlet_label(*outlet)
                .map_or_else(|| graph.node(outlet.node).name.clone(), str::to_string);
            let declared = graph
                .outlet_fact(*outlet)
                .map_err(graph_error)?
                .shape
                .iter()
                .map(|dim| dim.to_usize().ok().filter(|d| *d > 0))
                .collect();
            outputs.push((name, declared));
        }

        ModelContract::resolve(input_names, outputs)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &PipelineConfig) -> Result<ModelContract> {
        if let Some(contract) = &self.contract {
            return Ok(contract.clone());
        }

        let load_start = Instant::now();
        let model = Self::load_model(config)?;
        let contract = Self::discover_contract(&model)?;

        log::debug!(
            "Tract model contract: input '{}', outputs {:?}, layout {:?}",
            contract.input_name,
            contract.output_names,
            contract.layout
        );
        log::info!(
            "✅ Tract backend initialized in {}ms",
            load_start.elapsed().as_millis()
        );

        self.model = Some(model);
        self.contract = Some(contract.clone());
        Ok(contract)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Vec<RawMaskOutput>> {
        let (Some(model), Some(contract)) = (self.model.as_ref(), self.contract.as_ref()) else {
            return Err(BgoneError::inference("Tract model not initialized"));
        };

        log::debug!("🔮 Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let outputs = model
            .run(tvec![Tensor::from(input.clone()).into()])
            .map_err(|e| BgoneError::inference(format!("Tract inference failed: {e}")))?;

        // Tract returns outputs positionally, in output outlet order
        let results = contract
            .output_names
            .iter()
            .enumerate()
            .map(|(index, name)| match outputs.get(index) {
                Some(value) => match value.to_array_view::<f32>() {
                    Ok(view) => RawMaskOutput::new(
                        name.as_str(),
                        Some(view.shape().to_vec()),
                        view.iter().copied().collect(),
                    ),
                    Err(e) => {
                        log::debug!("Output '{name}' is not an f32 tensor: {e}");
                        RawMaskOutput::missing(name.as_str())
                    },
                },
                None => RawMaskOutput::missing(name.as_str()),
            })
            .collect();

        log::debug!(
            "Tract inference complete: {}ms",
            inference_start.elapsed().as_millis()
        );
        Ok(results)
    }

    fn release(&mut self) {
        self.model = None;
        self.contract = None;
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}
