//! Background replacement CLI tool
//!
//! Mattes each input with the configured model and writes a PNG composite,
//! a transparent cutout or the bare mask.

use super::config::{CliConfigBuilder, OutputMode};
use crate::{
    compositor::{Background, Compositor},
    processor::MattingProcessor,
    services::{ImageIOService, ProgressTracker},
    tracing_config::{spans, TracingConfig, TracingFormat},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

/// Replace photo backgrounds using a salient object segmentation model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgone")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input images or directories (use "-" for stdin)
    #[arg(value_name = "INPUT", required_unless_present = "list_providers")]
    pub input: Vec<PathBuf>,

    /// Descend into subdirectories of directory inputs
    #[arg(short, long)]
    pub recursive: bool,

    /// File name pattern for directory inputs (e.g. "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Output file, or directory when several inputs are given ("-" for stdout)
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Path to the ONNX segmentation model
    #[arg(short, long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Inference backend
    #[arg(long, value_enum, default_value_t = CliBackend::Onnx)]
    pub backend: CliBackend,

    /// Execution provider for the ONNX backend [default: auto]
    #[arg(long, value_enum)]
    pub provider: Option<CliProvider>,

    /// Background color as #rrggbb
    #[arg(long, value_name = "HEX", conflicts_with = "background")]
    pub color: Option<String>,

    /// Background image, stretched to the input size
    #[arg(long, value_name = "IMAGE")]
    pub background: Option<PathBuf>,

    /// Edge softening strength (0-3)
    #[arg(long)]
    pub feather: Option<f32>,

    /// How multiple model outputs are merged
    #[arg(long, value_enum)]
    pub aggregation: Option<CliAggregation>,

    /// Treat model output as background probability
    #[arg(long)]
    pub invert_alpha: bool,

    /// Side of the square network input
    #[arg(long, value_name = "PIXELS")]
    pub target_size: Option<u32>,

    /// Normalize input with ImageNet mean and std
    #[arg(long)]
    pub imagenet: bool,

    /// Write only the grayscale mask
    #[arg(long, conflicts_with = "transparent")]
    pub mask_only: bool,

    /// Write the foreground with a transparent background
    #[arg(long, conflicts_with_all = ["color", "background"])]
    pub transparent: bool,

    /// Composite without running the model
    #[arg(long)]
    pub no_ai: bool,

    /// JSON pipeline configuration; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of inference threads (0 = auto) [default: 0]
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Enable verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Plain log output without colors
    #[arg(long)]
    pub compact_logs: bool,

    /// JSON log output
    #[cfg(feature = "tracing-json")]
    #[arg(long, conflicts_with = "compact_logs")]
    pub json_logs: bool,

    /// Show available backends and execution providers
    #[arg(long)]
    pub list_providers: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliBackend {
    Onnx,
    Tract,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliProvider {
    Auto,
    Cpu,
    Cuda,
    Coreml,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliAggregation {
    Single,
    Average,
}

/// Everything one input needs besides its own pixels
struct RenderPlan {
    mode: OutputMode,
    compositor: Compositor,
    background: Background,
}

impl RenderPlan {
    /// Produce the output image for one input
    fn render(
        &self,
        image: &DynamicImage,
        processor: Option<&mut MattingProcessor>,
    ) -> Result<DynamicImage> {
        let Some(processor) = processor.filter(|_| self.mode.needs_model()) else {
            let plain = self.compositor.render(image, None, &self.background)?;
            return Ok(DynamicImage::ImageRgba8(plain.into_image()));
        };

        let result = processor.matte(image)?;
        let output = match self.mode {
            OutputMode::MaskOnly => DynamicImage::ImageLuma8(result.mask.to_gray_image()),
            OutputMode::Transparent => {
                DynamicImage::ImageRgba8(self.compositor.cutout(image, &result.mask)?.into_image())
            },
            OutputMode::Composite | OutputMode::Plain => DynamicImage::ImageRgba8(
                self.compositor
                    .render(image, Some(&result.mask), &self.background)?
                    .into_image(),
            ),
        };
        Ok(output)
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli).context("Failed to initialize tracing")?;

    if cli.list_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let plan = RenderPlan {
        mode: CliConfigBuilder::output_mode(&cli),
        compositor: CliConfigBuilder::compositor(&config)?,
        background: CliConfigBuilder::background(&cli)?,
    };

    info!(
        "Model: {}, backend: {}, provider: {}",
        config.model_spec.display_name(),
        CliConfigBuilder::backend_type(&cli),
        config.execution_provider
    );

    let mut processor = if plan.mode.needs_model() {
        let mut processor =
            MattingProcessor::with_backend_type(config, CliConfigBuilder::backend_type(&cli))
                .context("Failed to create matting processor")?;
        if cli.input.len() == 1 {
            processor.set_progress_tracker(ProgressTracker::console(cli.verbose > 0));
        }
        Some(processor)
    } else {
        None
    };

    let start_time = Instant::now();
    let processed_count = process_inputs(&cli, &plan, processor.as_mut()).await?;
    info!(
        "Processed {} image(s) in {:.2}s",
        processed_count,
        start_time.elapsed().as_secs_f64()
    );

    if let Some(processor) = processor.as_mut() {
        processor.dispose();
    }
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let mut config = TracingConfig::new().with_verbosity(cli.verbose);
    if cli.compact_logs {
        config = config.with_format(TracingFormat::Compact);
    }
    #[cfg(feature = "tracing-json")]
    if cli.json_logs {
        config = config.with_format(TracingFormat::Json);
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        config = config.with_env_filter(filter);
    }
    config.init()
}

fn show_provider_diagnostics() {
    println!("Backends and execution providers");

    #[cfg(feature = "onnx")]
    {
        println!("\nonnx:");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  {name:<8} {status:<14} {description}");
        }
    }

    #[cfg(feature = "tract")]
    {
        println!("\ntract:");
        for (name, available, description) in crate::backends::TractBackend::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  {name:<8} {status:<14} {description}");
        }
    }
}

async fn process_inputs(
    cli: &Cli,
    plan: &RenderPlan,
    mut processor: Option<&mut MattingProcessor>,
) -> Result<usize> {
    if cli.input.len() == 1 && cli.input[0].as_os_str() == "-" {
        process_stdin(cli.output.as_deref(), plan, processor).await?;
        return Ok(1);
    }

    let files = collect_input_files(&cli.input, cli.recursive, cli.pattern.as_deref())?;
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(0);
    }

    let output_dir = if files.len() > 1 {
        prepare_output_dir(cli.output.as_deref())?
    } else {
        None
    };

    let _batch = spans::batch_processing(files.len()).entered();
    let progress = if files.len() > 1 {
        let bar = ProgressBar::new(files.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .context("Invalid progress bar template")?
                .progress_chars("#>-"),
        );
        Some(bar)
    } else {
        None
    };

    let mut processed = 0;
    let mut failed = 0;
    for input in &files {
        if let Some(bar) = &progress {
            bar.set_message(format!("{}", input.display()));
        }

        let output = match (&output_dir, files.len()) {
            (Some(dir), _) => output_path_in_dir(input, dir, plan.mode),
            (None, 1) => cli
                .output
                .clone()
                .unwrap_or_else(|| default_output_path(input, plan.mode)),
            (None, _) => default_output_path(input, plan.mode),
        };

        let _file = spans::file_processing(input).entered();
        match process_file(input, &output, plan, processor.as_deref_mut()) {
            Ok(()) => {
                processed += 1;
                info!("{} -> {}", input.display(), output.display());
            },
            Err(e) => {
                failed += 1;
                error!("Failed to process {}: {:#}", input.display(), e);
            },
        }

        if let Some(bar) = &progress {
            bar.inc(1);
        }
    }

    if let Some(bar) = progress {
        bar.finish_with_message("done");
    }

    if failed > 0 {
        if processed == 0 {
            anyhow::bail!("All {failed} input(s) failed");
        }
        warn!("{failed} of {} input(s) failed", files.len());
    }
    Ok(processed)
}

fn process_file(
    input: &Path,
    output: &Path,
    plan: &RenderPlan,
    processor: Option<&mut MattingProcessor>,
) -> Result<()> {
    let image = ImageIOService::load_image(input)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    let rendered = plan.render(&image, processor)?;

    if output.as_os_str() == "-" {
        return write_stdout(&ImageIOService::png_bytes(&rendered)?);
    }
    ImageIOService::save_png(&rendered, output)
        .with_context(|| format!("Failed to save {}", output.display()))
}

async fn process_stdin(
    output: Option<&Path>,
    plan: &RenderPlan,
    processor: Option<&mut MattingProcessor>,
) -> Result<()> {
    let image = ImageIOService::load_from_reader(tokio::io::stdin())
        .await
        .context("Failed to read image from stdin")?;
    let rendered = plan.render(&image, processor)?;

    match output.filter(|p| p.as_os_str() != "-") {
        Some(path) => ImageIOService::save_png(&rendered, path)
            .with_context(|| format!("Failed to save {}", path.display())),
        None => write_stdout(&ImageIOService::png_bytes(&rendered)?),
    }
}

fn write_stdout(data: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(data).context("Failed to write to stdout")?;
    stdout.flush().context("Failed to flush stdout")
}

/// Expand directories and keep supported image files, sorted
///
/// Directory entries are filtered by `pattern`; files named explicitly are not.
fn collect_input_files(
    inputs: &[PathBuf],
    recursive: bool,
    pattern: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let pattern = pattern
        .map(glob::Pattern::new)
        .transpose()
        .context("Invalid --pattern")?;
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).max_depth(max_depth) {
                let entry = entry
                    .with_context(|| format!("Failed to read directory {}", input.display()))?;
                let path = entry.path();
                if entry.file_type().is_file()
                    && ImageIOService::is_supported_format(path)
                    && matches_pattern(path, pattern.as_ref())
                {
                    files.push(entry.into_path());
                }
            }
        } else if input.is_file() {
            if ImageIOService::is_supported_format(input) {
                files.push(input.clone());
            } else {
                warn!("Skipping unsupported file: {}", input.display());
            }
        } else {
            anyhow::bail!("Input path does not exist: {}", input.display());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn matches_pattern(path: &Path, pattern: Option<&glob::Pattern>) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| pattern.matches(name))
}

fn prepare_output_dir(output: Option<&Path>) -> Result<Option<PathBuf>> {
    let Some(dir) = output else {
        return Ok(None);
    };
    if dir.as_os_str() == "-" {
        anyhow::bail!("Cannot use stdout (-) as output when processing multiple files");
    }
    if dir.is_file() {
        anyhow::bail!("Output path is a file, not a directory: {}", dir.display());
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    Ok(Some(dir.to_path_buf()))
}

fn output_file_name(input: &Path, mode: OutputMode) -> String {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    format!("{stem}_{}.png", mode.suffix())
}

/// `<stem>_bgone.png` (or `<stem>_mask.png`) next to the input
fn default_output_path(input: &Path, mode: OutputMode) -> PathBuf {
    let dir = input.parent().unwrap_or(Path::new("."));
    dir.join(output_file_name(input, mode))
}

fn output_path_in_dir(input: &Path, dir: &Path, mode: OutputMode) -> PathBuf {
    dir.join(output_file_name(input, mode))
}
