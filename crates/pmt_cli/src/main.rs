//! pmt CLI for transformer condition assessment.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burn::prelude::*;
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use pmt_core::SeverityDimension;
use pmt_infer::{
    best_checkpoint, InferenceOrchestrator, InferenceRequest, ModelSpec, PipelineConfig,
    OUTPUT_ROOT_ENV,
};
use pmt_models::{
    metadata_path, save_network, save_training_checkpoint, BackboneKind, CheckpointMetadata,
    NetworkConfig,
};

/// Backend type for inference. Saliency needs gradients.
type InferBackend = Autodiff<NdArray>;

#[derive(Parser)]
#[command(name = "pmt")]
#[command(author, version)]
#[command(about = "Power transformer condition assessment - severity scores and Grad-CAM overlays")]
#[command(long_about = "pmt: score transformer photographs on 13 defect dimensions.

EXAMPLES:
  # Score two photographs with the default regressor
  pmt analyze photos/tx_001.jpg photos/tx_002.jpg

  # Use a specific regressor and a PMT gate
  pmt analyze --regressor ckpt/resnet34_best.mpk --arch resnet34 \\
              --gate ckpt/gate_best.mpk photos/*.jpg

  # Attach request metadata
  pmt analyze --meta transformer_id=TX-104 --meta location=North photos/tx.jpg

  # Write a freshly initialised checkpoint for smoke testing
  pmt init --arch custom_cnn --outputs 13 --output ckpt/custom_cnn_best

AVAILABLE BACKBONES:
  custom_cnn      - Compact CNN [default]
  resnet18        - ResNet-18
  resnet34        - ResNet-34
  efficientnet_b0 - EfficientNet-B0")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score images and write saliency overlays
    Analyze {
        /// Pipeline configuration (JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Severity regressor checkpoint
        #[arg(long, value_name = "CKPT")]
        regressor: Option<PathBuf>,

        /// Regressor backbone; read from the checkpoint sidecar when omitted
        #[arg(long, value_name = "NAME")]
        arch: Option<String>,

        /// PMT gate checkpoint; every image is accepted without one
        #[arg(long, value_name = "CKPT")]
        gate: Option<PathBuf>,

        /// Gate backbone; read from the checkpoint sidecar when omitted
        #[arg(long, value_name = "NAME")]
        gate_arch: Option<String>,

        /// Root directory for checkpoints and overlays
        #[arg(long, env = OUTPUT_ROOT_ENV, value_name = "DIR")]
        output_root: Option<PathBuf>,

        /// Model input side length
        #[arg(long, value_name = "N")]
        image_size: Option<u32>,

        /// Request metadata echoed in the result
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,

        /// Image files
        #[arg(required = true, value_name = "IMAGES")]
        images: Vec<PathBuf>,
    },
    /// Write a randomly initialised checkpoint and its sidecar
    Init {
        /// Backbone name
        #[arg(long, default_value = "custom_cnn", value_name = "NAME")]
        arch: String,

        /// Number of outputs (13 for the regressor, 2 for the gate)
        #[arg(long, default_value = "13", value_name = "N")]
        outputs: usize,

        /// Output path; the .mpk extension is added
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42", value_name = "SEED")]
        seed: u64,

        /// Wrap the weights in a training checkpoint with this epoch
        #[arg(long, value_name = "E")]
        epoch: Option<usize>,

        /// Best validation metric recorded with the training checkpoint
        #[arg(long, value_name = "M", requires = "epoch")]
        best_metric: Option<f64>,
    },
    /// List supported backbones
    Archs,
    /// List the severity dimensions in output order
    Dims,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout carries the JSON result
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Analyze {
            config,
            regressor,
            arch,
            gate,
            gate_arch,
            output_root,
            image_size,
            metadata,
            images,
        } => {
            let config = build_config(
                config,
                regressor,
                arch,
                gate,
                gate_arch,
                output_root,
                image_size,
            )?;
            handle_analyze(&config, metadata, images)
        }
        Commands::Init {
            arch,
            outputs,
            output,
            seed,
            epoch,
            best_metric,
        } => handle_init(&arch, outputs, output, seed, epoch, best_metric),
        Commands::Archs => {
            handle_archs();
            Ok(())
        }
        Commands::Dims => {
            handle_dims();
            Ok(())
        }
    }
}

/// Parse a `KEY=VALUE` pair.
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Merge the configuration file, if any, with command line overrides.
fn build_config(
    file: Option<PathBuf>,
    regressor: Option<PathBuf>,
    arch: Option<String>,
    gate: Option<PathBuf>,
    gate_arch: Option<String>,
    output_root: Option<PathBuf>,
    image_size: Option<u32>,
) -> Result<PipelineConfig> {
    let mut config = match file {
        Some(path) => PipelineConfig::from_file(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(root) = output_root {
        config.set_output_root(root);
    }
    if let Some(size) = image_size {
        config.image_size = size;
    }

    match (regressor, arch) {
        (Some(checkpoint), arch) => config.regressor = ModelSpec { arch, checkpoint },
        (None, Some(arch)) => {
            let checkpoint = best_checkpoint(&config.output_root, &arch);
            config.regressor = ModelSpec::new(arch, checkpoint);
        }
        (None, None) => {}
    }

    match (gate, gate_arch) {
        (Some(checkpoint), arch) => config.gate = Some(ModelSpec { arch, checkpoint }),
        (None, Some(_)) => bail!("--gate-arch needs --gate"),
        (None, None) => {}
    }

    config
        .validate()
        .context("Invalid pipeline configuration")?;
    Ok(config)
}

fn handle_analyze(
    config: &PipelineConfig,
    metadata: Vec<(String, String)>,
    images: Vec<PathBuf>,
) -> Result<()> {
    let device = <InferBackend as Backend>::Device::default();
    let pipeline = InferenceOrchestrator::from_config::<InferBackend>(config, &device)
        .context("Failed to initialise the pipeline")?;

    let mut request = InferenceRequest::new(images);
    request.metadata.extend(metadata);

    let result = pipeline.run(&request);
    println!("{}", result.to_json()?);
    Ok(())
}

fn handle_init(
    arch: &str,
    outputs: usize,
    output: PathBuf,
    seed: u64,
    epoch: Option<usize>,
    best_metric: Option<f64>,
) -> Result<()> {
    let kind: BackboneKind = arch.parse()?;
    let device = <NdArray as Backend>::Device::default();
    <NdArray as Backend>::seed(seed);

    let net = NetworkConfig::from_kind(kind, outputs)
        .init::<NdArray>(&device)
        .context("Failed to build network")?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let path = match epoch {
        Some(_) => save_training_checkpoint(&net, epoch, best_metric, &output)?,
        None => save_network(&net, &output)?,
    };

    let mut metadata = CheckpointMetadata::new(kind.name(), outputs);
    if let Some(epoch) = epoch {
        metadata = metadata.with_epoch(epoch);
    }
    if let Some(metric) = best_metric {
        metadata = metadata.with_best_metric(metric);
    }
    let sidecar = metadata_path(&path);
    metadata.save(&sidecar)?;

    println!("Saved {} checkpoint to {}", kind.name(), path.display());
    println!("Saved metadata to {}", sidecar.display());
    Ok(())
}

fn handle_archs() {
    println!("Available backbones:\n");
    for kind in BackboneKind::ALL {
        let config = kind.config();
        let channels = config
            .tap_channels()
            .map(|c| c.to_string())
            .unwrap_or_else(|_| "?".to_string());
        println!(
            "  {:<16} {:<14} tap: {} ({} channels)",
            kind.name(),
            kind.family().to_string(),
            config.tap_layer(),
            channels
        );
    }
}

fn handle_dims() {
    println!("Severity dimensions (0 = none, 6 = critical):\n");
    for (i, dimension) in SeverityDimension::ALL.iter().enumerate() {
        println!("  {:>2}  {:<32} {}", i, dimension.key(), dimension.label());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("transformer_id=TX-1").unwrap(),
            ("transformer_id".to_string(), "TX-1".to_string())
        );
        assert_eq!(
            parse_key_val("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("missing").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_build_config_defaults_follow_output_root() {
        let config = build_config(
            None,
            None,
            Some("resnet18".to_string()),
            None,
            None,
            Some(PathBuf::from("/srv/pmt")),
            Some(64),
        )
        .unwrap();
        assert_eq!(config.image_size, 64);
        assert_eq!(
            config.regressor.checkpoint,
            PathBuf::from("/srv/pmt/checkpoints/resnet18_best.mpk")
        );
        assert_eq!(config.overlay_dir(), PathBuf::from("/srv/pmt/gradcam"));
        assert!(config.gate.is_none());
    }

    #[test]
    fn test_build_config_default_regressor_follows_output_root() {
        let config =
            build_config(None, None, None, None, None, Some(PathBuf::from("/srv/pmt")), None)
                .unwrap();
        assert_eq!(
            config.regressor.checkpoint,
            PathBuf::from("/srv/pmt/checkpoints/custom_cnn_best.mpk")
        );
    }

    #[test]
    fn test_build_config_rejects_unknown_arch() {
        assert!(build_config(
            None,
            Some(PathBuf::from("r.mpk")),
            Some("vgg16".to_string()),
            None,
            None,
            None,
            None,
        )
        .is_err());
    }

    #[test]
    fn test_cli_parses_analyze() {
        let cli = Cli::try_parse_from([
            "pmt",
            "-vv",
            "analyze",
            "--gate",
            "g.mpk",
            "--meta",
            "location=North",
            "a.jpg",
            "b.jpg",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Analyze {
                gate,
                metadata,
                images,
                ..
            } => {
                assert_eq!(gate, Some(PathBuf::from("g.mpk")));
                assert_eq!(metadata, vec![("location".to_string(), "North".to_string())]);
                assert_eq!(images.len(), 2);
            }
            _ => panic!("expected analyze"),
        }
    }
}
