use std::path::PathBuf;

use anyhow::{anyhow, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    config::Config,
};
use clap::Parser;
use env_logger::Env;

use sketch_gender::{
    pipeline::{self, RunPaths},
    ExperimentConfig, SubstringLabeler,
};

#[derive(Parser, Debug)]
#[command(name = "sketch-gender", about = "Train and evaluate a face gender classifier")]
struct Args {
    /// Flat directory of face photographs.
    #[arg(long, default_value = "cuhk-face-sketch-database-cufs/photos")]
    data_dir: PathBuf,

    /// Where per-epoch checkpoints are written.
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: PathBuf,

    /// Where the accuracy and loss charts are written.
    #[arg(long, default_value = "reports")]
    report_dir: PathBuf,

    /// JSON experiment config; the standard experiment when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Continue from the last checkpoint in `--checkpoint-dir`.
    #[arg(long)]
    resume: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ExperimentConfig::load(path)
            .map_err(|e| anyhow!("failed to read config {}: {e}", path.display()))?,
        None => ExperimentConfig::standard(),
    };

    println!("=== Face Gender Classification with Burn ===");
    println!("Loading dataset from {}...", args.data_dir.display());

    let paths = RunPaths {
        data_dir: args.data_dir,
        checkpoint_dir: Some(args.checkpoint_dir),
        report_dir: Some(args.report_dir),
    };

    type Backend = Autodiff<NdArray>;
    let outcome = pipeline::run::<Backend>(
        &config,
        &paths,
        &SubstringLabeler::default(),
        args.resume,
        NdArrayDevice::Cpu,
    )?;

    for chart in &outcome.charts {
        println!("Chart written to {}", chart.display());
    }
    Ok(())
}
