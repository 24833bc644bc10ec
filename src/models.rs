//! Model artifact sources

use crate::error::{BgoneError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Default location of the segmentation model, relative to the working directory
pub const DEFAULT_MODEL_PATH: &str = "models/u2netp.onnx";

/// Where the ONNX model bytes come from
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    /// ONNX file on disk
    File(PathBuf),
    /// ONNX model already held in memory
    Memory(Vec<u8>),
}

impl std::fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
        }
    }
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::File(path) => format!(
                "file:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            Self::Memory(bytes) => format!("memory:{}b", bytes.len()),
        }
    }
}

/// Model specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    /// Optional human-readable name; falls back to the source display name
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::File(PathBuf::from(DEFAULT_MODEL_PATH)),
            name: None,
        }
    }
}

impl ModelSpec {
    /// Model spec for an ONNX file on disk
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            source: ModelSource::File(path.into()),
            name: None,
        }
    }

    /// Model spec for in-memory ONNX bytes
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            source: ModelSource::Memory(bytes),
            name: None,
        }
    }

    /// Name used in logs and result metadata
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.source.display_name())
    }

    /// Read the model bytes
    ///
    /// # Errors
    /// - `ModelUnavailable` when the file is missing, unreadable or empty
    pub fn load_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match &self.source {
            ModelSource::File(path) => {
                fs::read(path).map_err(|e| BgoneError::model_load_error(path, &e.to_string()))?
            },
            ModelSource::Memory(bytes) => bytes.clone(),
        };

        if bytes.is_empty() {
            return Err(BgoneError::model_unavailable(format!(
                "Model '{}' is empty",
                self.display_name()
            )));
        }

        log::debug!(
            "Loaded model '{}' ({:.2} MB)",
            self.display_name(),
            bytes.len() as f64 / (1024.0 * 1024.0)
        );
        Ok(bytes)
    }
}
