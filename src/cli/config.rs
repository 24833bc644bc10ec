//! Conversion of command-line arguments into pipeline settings

use crate::cli::main_impl::{Cli, CliAggregation, CliBackend, CliProvider};
use crate::{
    compositor::{Background, Compositor},
    config::{ExecutionProvider, Normalization, OutputAggregation, PipelineConfig, PipelineConfigBuilder},
    models::ModelSpec,
    processor::BackendType,
    services::ImageIOService,
};
use anyhow::{Context, Result};

/// What each input turns into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputMode {
    /// Masked foreground over the chosen background
    Composite,
    /// Masked foreground with a transparent background
    Transparent,
    /// Grayscale mask only
    MaskOnly,
    /// Image over the background without running the model
    Plain,
}

impl OutputMode {
    /// File name suffix for generated output paths
    pub(crate) fn suffix(self) -> &'static str {
        match self {
            Self::MaskOnly => "mask",
            Self::Composite | Self::Transparent | Self::Plain => "bgone",
        }
    }

    pub(crate) fn needs_model(self) -> bool {
        self != Self::Plain
    }
}

impl From<CliBackend> for BackendType {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Onnx => Self::Onnx,
            CliBackend::Tract => Self::Tract,
        }
    }
}

impl From<CliProvider> for ExecutionProvider {
    fn from(provider: CliProvider) -> Self {
        match provider {
            CliProvider::Auto => Self::Auto,
            CliProvider::Cpu => Self::Cpu,
            CliProvider::Cuda => Self::Cuda,
            CliProvider::Coreml => Self::CoreMl,
        }
    }
}

impl From<CliAggregation> for OutputAggregation {
    fn from(aggregation: CliAggregation) -> Self {
        match aggregation {
            CliAggregation::Single => Self::Single,
            CliAggregation::Average => Self::Average,
        }
    }
}

/// Convert CLI arguments to pipeline configuration
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the pipeline configuration; flags override the `--config` file
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let base = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        let mut builder = PipelineConfigBuilder::from_config(base);

        if let Some(provider) = cli.provider {
            builder = builder.execution_provider(provider.into());
        }
        if let Some(threads) = cli.threads {
            builder = builder.intra_threads(threads).inter_threads(threads);
        }
        if let Some(model) = &cli.model {
            builder = builder.model_spec(ModelSpec::from_path(model));
        }
        if let Some(target_size) = cli.target_size {
            builder = builder.target_size(target_size);
        }
        if let Some(aggregation) = cli.aggregation {
            builder = builder.output_aggregation(aggregation.into());
        }
        if cli.invert_alpha {
            builder = builder.invert_alpha(true);
        }
        if let Some(feather) = cli.feather {
            builder = builder.feather(feather);
        }
        if cli.imagenet {
            builder = builder.normalization(Normalization::imagenet());
        }

        builder.build().context("Invalid configuration")
    }

    pub(crate) fn backend_type(cli: &Cli) -> BackendType {
        cli.backend.into()
    }

    pub(crate) fn output_mode(cli: &Cli) -> OutputMode {
        if cli.no_ai {
            OutputMode::Plain
        } else if cli.mask_only {
            OutputMode::MaskOnly
        } else if cli.transparent {
            OutputMode::Transparent
        } else {
            OutputMode::Composite
        }
    }

    /// Background from `--color` or `--background`, white otherwise
    pub(crate) fn background(cli: &Cli) -> Result<Background> {
        if let Some(path) = &cli.background {
            let image = ImageIOService::load_image(path)
                .with_context(|| format!("Failed to load background {}", path.display()))?;
            return Ok(Background::Image(image));
        }
        match &cli.color {
            Some(color) => color.parse().context("Invalid --color"),
            None => Ok(Background::default()),
        }
    }

    pub(crate) fn compositor(config: &PipelineConfig) -> Result<Compositor> {
        Compositor::from_config(config).context("Invalid feather")
    }

    /// Reject flag combinations clap cannot express
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.no_ai && (cli.mask_only || cli.transparent) {
            anyhow::bail!("--no-ai cannot be combined with --mask-only or --transparent");
        }
        let uses_stdin = cli.input.iter().any(|p| p.as_os_str() == "-");
        if uses_stdin && cli.input.len() > 1 {
            anyhow::bail!("Standard input (-) must be the only input");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use image::Rgba;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["bgone"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["photo.jpg"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config, PipelineConfig::default());
        assert_eq!(CliConfigBuilder::backend_type(&cli), BackendType::Onnx);
        assert_eq!(CliConfigBuilder::output_mode(&cli), OutputMode::Composite);
        assert!(matches!(
            CliConfigBuilder::background(&cli).unwrap(),
            Background::Color(Rgba([255, 255, 255, 255]))
        ));
    }

    #[test]
    fn test_flags_override_config() {
        let cli = parse(&[
            "photo.jpg",
            "--model",
            "custom.onnx",
            "--backend",
            "tract",
            "--provider",
            "cpu",
            "--aggregation",
            "single",
            "--invert-alpha",
            "--feather",
            "0",
            "--threads",
            "2",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config.model_spec, ModelSpec::from_path("custom.onnx"));
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.output_aggregation, OutputAggregation::Single);
        assert!(config.invert_alpha);
        assert_eq!(config.feather, 0.0);
        assert_eq!(config.intra_threads, 2);
        assert_eq!(CliConfigBuilder::backend_type(&cli), BackendType::Tract);
    }

    #[test]
    fn test_config_file_is_base() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "feather": 0.5, "invert_alpha": true }}"#).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = CliConfigBuilder::from_cli(&parse(&["a.png", "--config", &path])).unwrap();
        assert_eq!(config.feather, 0.5);
        assert!(config.invert_alpha);

        let config =
            CliConfigBuilder::from_cli(&parse(&["a.png", "--config", &path, "--feather", "2"]))
                .unwrap();
        assert_eq!(config.feather, 2.0);
    }

    #[test]
    fn test_config_file_runtime_settings_survive_absent_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "execution_provider": "cpu", "intra_threads": 3, "inter_threads": 2 }}"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = CliConfigBuilder::from_cli(&parse(&["a.png", "--config", &path])).unwrap();
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.intra_threads, 3);
        assert_eq!(config.inter_threads, 2);

        let config = CliConfigBuilder::from_cli(&parse(&[
            "a.png", "--config", &path, "--provider", "cuda", "--threads", "4",
        ]))
        .unwrap();
        assert_eq!(config.execution_provider, ExecutionProvider::Cuda);
        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.inter_threads, 4);
    }

    #[test]
    fn test_out_of_range_feather() {
        let cli = parse(&["a.png", "--feather", "5"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }

    #[test]
    fn test_color_background() {
        let cli = parse(&["a.png", "--color", "#102030"]);
        assert!(matches!(
            CliConfigBuilder::background(&cli).unwrap(),
            Background::Color(Rgba([16, 32, 48, 255]))
        ));

        let cli = parse(&["a.png", "--color", "nope"]);
        assert!(CliConfigBuilder::background(&cli).is_err());
    }

    #[test]
    fn test_color_conflicts_with_background_image() {
        let result = Cli::try_parse_from(["bgone", "a.png", "--color", "#fff", "--background", "b.png"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_output_modes() {
        assert_eq!(
            CliConfigBuilder::output_mode(&parse(&["a.png", "--mask-only"])),
            OutputMode::MaskOnly
        );
        assert_eq!(
            CliConfigBuilder::output_mode(&parse(&["a.png", "--transparent"])),
            OutputMode::Transparent
        );
        let plain = CliConfigBuilder::output_mode(&parse(&["a.png", "--no-ai"]));
        assert_eq!(plain, OutputMode::Plain);
        assert!(!plain.needs_model());
        assert_eq!(OutputMode::MaskOnly.suffix(), "mask");
    }

    #[test]
    fn test_validate_cli() {
        assert!(CliConfigBuilder::validate_cli(&parse(&["a.png", "b.png"])).is_ok());
        assert!(CliConfigBuilder::validate_cli(&parse(&["a.png", "--no-ai", "--mask-only"])).is_err());
        assert!(CliConfigBuilder::validate_cli(&parse(&["-", "b.png"])).is_err());
        assert!(CliConfigBuilder::validate_cli(&parse(&["-"])).is_ok());
    }
}
