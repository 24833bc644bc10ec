//! Shared helpers for integration tests
//!
//! `ScriptedBackend` stands in for a real runtime: it reports a fixed model
//! contract and builds its outputs from the input tensor size, so the whole
//! pipeline runs without a model file.

#![allow(dead_code)]

use bgone::{
    error::Result, BgoneError, InferenceBackend, MaskLayout, ModelContract, PipelineConfig,
    RawMaskOutput,
};
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type OutputScript = Box<dyn Fn(usize) -> Vec<RawMaskOutput> + Send>;

/// Backend whose outputs are produced by a closure of the tensor side
pub struct ScriptedBackend {
    script: OutputScript,
    output_names: Vec<String>,
    loaded: bool,
    loads: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new<F>(output_names: &[&str], script: F) -> Self
    where
        F: Fn(usize) -> Vec<RawMaskOutput> + Send + 'static,
    {
        Self {
            script: Box::new(script),
            output_names: output_names.iter().map(ToString::to_string).collect(),
            loaded: false,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// One `[1,1,T,T]` output with the same logit everywhere
    pub fn constant(logit: f32) -> Self {
        Self::new(&["d0"], move |side| {
            vec![RawMaskOutput::filled("d0", &[1, 1, side, side], logit)]
        })
    }

    /// One output with a centred disc of foreground
    pub fn disc() -> Self {
        Self::new(&["d0"], |side| vec![disc_logits("d0", side, 12.0)])
    }

    /// Counter of successful loads, readable after the backend is boxed
    pub fn load_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.loads)
    }
}

impl InferenceBackend for ScriptedBackend {
    fn initialize(&mut self, _config: &PipelineConfig) -> Result<ModelContract> {
        self.loaded = true;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(ModelContract {
            input_name: "input".to_string(),
            output_names: self.output_names.clone(),
            layout: MaskLayout::ChannelFirst,
        })
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Vec<RawMaskOutput>> {
        if !self.loaded {
            return Err(BgoneError::inference("scripted backend not loaded"));
        }
        let (_, _, side, _) = input.dim();
        Ok((self.script)(side))
    }

    fn release(&mut self) {
        self.loaded = false;
    }

    fn is_initialized(&self) -> bool {
        self.loaded
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// `[1,1,side,side]` logits: `logit` inside a centred disc of radius side/4, `-logit` outside
pub fn disc_logits(name: &str, side: usize, logit: f32) -> RawMaskOutput {
    let center = side as f32 / 2.0;
    let radius = side as f32 / 4.0;
    let data = (0..side * side)
        .map(|i| {
            let dx = (i % side) as f32 + 0.5 - center;
            let dy = (i / side) as f32 + 0.5 - center;
            if (dx * dx + dy * dy).sqrt() < radius {
                logit
            } else {
                -logit
            }
        })
        .collect();
    RawMaskOutput::new(name, Some(vec![1, 1, side, side]), data)
}

/// Diagonal color gradient
pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }))
}

pub fn solid_image(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
}
