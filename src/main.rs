//! Herb Classifier CLI
//!
//! Trains the baseline and transfer-learning herb classifiers, renders sample
//! grids and classifies single images with a saved model.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::info;

use herb_classifier::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use herb_classifier::dataset::HerbDataset;
use herb_classifier::utils::format_duration;
use herb_classifier::utils::logging::{init_logging, LogConfig, LogLevel};
use herb_classifier::{HerbClassifier, HerbConfig, ModelKind, ModelSelection, Predictor};

/// Herb image classification with Burn
#[derive(Parser, Debug)]
#[command(name = "herb_classifier")]
#[command(version)]
#[command(about = "Herb image classification with a baseline CNN and transfer learning", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); overrides --verbose
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// TOML configuration file; command line flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ModelArg {
    Baseline,
    Enhanced,
    Both,
}

impl From<ModelArg> for ModelSelection {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Baseline => ModelSelection::Baseline,
            ModelArg::Enhanced => ModelSelection::Enhanced,
            ModelArg::Both => ModelSelection::Both,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Baseline,
    Enhanced,
}

impl From<KindArg> for ModelKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Baseline => ModelKind::Baseline,
            KindArg::Enhanced => ModelKind::Enhanced,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train one or both models
    Train {
        /// Directory with one sub-directory per herb
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Which model(s) to train
        #[arg(short, long, value_enum, default_value = "both")]
        model: ModelArg,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Square image size
        #[arg(long)]
        image_size: Option<usize>,

        /// Pretrained backbone record (without `.mpk`)
        #[arg(long)]
        backbone_weights: Option<PathBuf>,

        /// Directory for charts and saved models
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Render a sample grid before training
        #[arg(long, default_value = "false")]
        show_samples: bool,

        /// Save weights, metadata and history after training
        #[arg(long, default_value = "false")]
        save_model: bool,

        /// Decode every image once before training
        #[arg(long, default_value = "false")]
        cache_images: bool,
    },

    /// Render a grid of sample images per category
    Samples {
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Output PNG file
        #[arg(short, long, default_value = "output/sample_images.png")]
        output: PathBuf,

        /// Images shown per category
        #[arg(long)]
        per_category: Option<usize>,
    },

    /// Classify images with a saved model
    Predict {
        /// Directory with the saved model files
        #[arg(short, long, default_value = "output")]
        model_dir: PathBuf,

        /// Which saved model to use
        #[arg(short, long, value_enum, default_value = "enhanced")]
        kind: KindArg,

        /// Image file to classify; repeat for several images
        #[arg(short, long = "image", required = true)]
        images: Vec<PathBuf>,
    },

    /// Show dataset statistics
    Stats {
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config.level = LogLevel::parse(level);
    }
    if let Err(e) = init_logging(&log_config) {
        eprintln!("{} {}", "Warning:".yellow(), e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => HerbConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => HerbConfig::default(),
    };

    match cli.command {
        Commands::Train {
            data_dir,
            model,
            epochs,
            batch_size,
            image_size,
            backbone_weights,
            output_dir,
            show_samples,
            save_model,
            cache_images,
        } => {
            if let Some(dir) = data_dir {
                config.data.data_dir = dir;
            }
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.data.batch_size = batch_size;
            }
            if let Some(size) = image_size {
                config.data.image_size = size;
            }
            if let Some(weights) = backbone_weights {
                config.model.backbone_weights = weights;
            }
            if let Some(dir) = output_dir {
                config.output.output_dir = dir;
            }
            config.output.show_samples |= show_samples;
            config.output.save_model |= save_model;
            config.data.cache_images |= cache_images;

            cmd_train(config, model.into())
        }

        Commands::Samples {
            data_dir,
            output,
            per_category,
        } => {
            if let Some(dir) = data_dir {
                config.data.data_dir = dir;
            }
            if let Some(n) = per_category {
                config.data.samples_per_category = n;
            }
            cmd_samples(config, &output)
        }

        Commands::Predict {
            model_dir,
            kind,
            images,
        } => cmd_predict(&model_dir, kind.into(), &images),

        Commands::Stats { data_dir } => {
            let dir = data_dir.unwrap_or(config.data.data_dir);
            cmd_stats(&dir)
        }
    }
}

fn cmd_train(config: HerbConfig, selection: ModelSelection) -> Result<()> {
    println!("{}", "Herb Classifier Training".green().bold());
    println!("  Data:    {}", config.data.data_dir.display());
    println!("  Output:  {}", config.output.output_dir.display());
    println!("  Epochs:  {}", config.training.epochs);
    println!("  Backend: {}", backend_name());
    println!();

    let started = std::time::Instant::now();
    let mut classifier = HerbClassifier::<TrainingBackend>::new(config, default_device())
        .context("Failed to prepare the dataset")?;
    println!(
        "  Found {} categories: {}",
        classifier.num_classes(),
        classifier.categories().join(", ")
    );

    let outcomes = classifier.run(selection)?;

    println!();
    println!("{}", "Summary".cyan().bold());
    for outcome in &outcomes {
        let best = outcome
            .history
            .best_val_accuracy()
            .map(|acc| format!("{:.2}%", acc * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "  {:9} epochs: {:3}  best val accuracy: {}{}",
            outcome.kind.as_str(),
            outcome.history.epochs(),
            best,
            if outcome.history.stopped_early {
                " (stopped early)"
            } else {
                ""
            }
        );
        for plot in &outcome.plots {
            println!("    chart: {}", plot.display());
        }
        if let Some(path) = &outcome.saved_to {
            println!("    model: {}", path.display());
        }
    }
    info!("Total time: {}", format_duration(started.elapsed().as_secs_f64()));

    Ok(())
}

fn cmd_samples(config: HerbConfig, output: &Path) -> Result<()> {
    let classifier = HerbClassifier::<TrainingBackend>::new(config, default_device())
        .context("Failed to prepare the dataset")?;
    let path = classifier.show_sample_images(Some(output))?;
    println!("{} Wrote {}", "Done:".green(), path.display());
    Ok(())
}

fn cmd_predict(model_dir: &Path, kind: ModelKind, images: &[PathBuf]) -> Result<()> {
    let device = default_device();
    let predictor = Predictor::<DefaultBackend>::load(model_dir, kind, &device)
        .with_context(|| format!("Failed to load {} model from {}", kind, model_dir.display()))?;

    let results = predictor
        .predict_many(images)
        .context("Failed to classify images")?;
    for result in results {
        println!("{}", result.display());
    }
    Ok(())
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    let dataset = HerbDataset::new(data_dir)
        .with_context(|| format!("Failed to load dataset from {}", data_dir.display()))?;
    dataset.stats().print();
    Ok(())
}
