//! Build the residual classifiers and print their summaries
//!
//! Usage:
//!   cargo run --bin resnet_summary -- --config config/default.toml --model both --demo-batch 4

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ndarray::{Array3, Array4};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use resnet_classifiers::{setup_logging, BlockOrder, Classifier, Config};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModelKind {
    #[value(name = "1d")]
    OneD,
    #[value(name = "2d")]
    TwoD,
    Both,
}

#[derive(Parser)]
#[command(name = "resnet_summary")]
#[command(about = "Build 1D/2D residual classifiers and print their layer summaries")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Which model to build
    #[arg(short, long, value_enum, default_value_t = ModelKind::Both)]
    model: ModelKind,

    /// Block layer order for the 2D model (overrides config): cbr, brc or crb
    #[arg(long)]
    block_order: Option<String>,

    /// Print summaries as JSON
    #[arg(long)]
    json: bool,

    /// Run a forward pass on a random batch of this size
    #[arg(long)]
    demo_batch: Option<usize>,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

fn report<M: Classifier>(model: &M, json: bool) -> Result<()> {
    let summary = model.summary();
    if json {
        println!("{}", summary.to_json()?);
    } else {
        println!("{}\n", summary);
    }
    Ok(())
}

fn demo<M: Classifier>(model: &M, batch: &M::Input) -> Result<()> {
    let probs = model.predict_proba(batch)?;
    let labels = model.predict(batch)?;

    for (i, (row, label)) in probs.rows().into_iter().zip(labels).enumerate() {
        info!(
            sample = i,
            predicted = label,
            confidence = row[label],
            "forward pass"
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.write_default_config {
        Config::create_default(&args.config)
            .with_context(|| format!("writing {}", args.config))?;
        println!("Wrote default configuration to {}", args.config);
        return Ok(());
    }

    let config_found = Path::new(&args.config).exists();
    let mut config = if config_found {
        Config::load(&args.config).with_context(|| format!("loading {}", args.config))?
    } else {
        Config::default()
    };
    if let Some(tag) = &args.block_order {
        config.resnet2d.block_order = BlockOrder::from_tag(tag);
    }

    setup_logging(&config.logging.level)?;
    if !config_found {
        warn!(path = %args.config, "configuration file not found, using defaults");
    }

    if matches!(args.model, ModelKind::OneD | ModelKind::Both) {
        let model = config.resnet1d.classifier().model()?;
        report(&model, args.json)?;

        if let Some(batch_size) = args.demo_batch {
            let [length, channels] = config.resnet1d.input_shape;
            let batch = Array3::random((batch_size, length, channels), StandardNormal);
            demo(&model, &batch)?;
        }
    }

    if matches!(args.model, ModelKind::TwoD | ModelKind::Both) {
        let model = config
            .resnet2d
            .classifier()
            .build_model(&config.resnet2d.build_options())?;
        report(&model, args.json)?;

        if let Some(batch_size) = args.demo_batch {
            let [height, width, channels] = config.resnet2d.input_shape;
            let batch = Array4::random((batch_size, height, width, channels), StandardNormal);
            demo(&model, &batch)?;
        }
    }

    Ok(())
}
