//! Run one BO experiment configuration on the beamline and save its record.
//!
//! ```bash
//! bp-run flatten --mismatch 0.5 --acq ucb --beta 2.0 --n-run 10
//! bp-run offset_calibration --config-file my_run.json --output results
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context};
use bp_optimizer::{AcquisitionConfig, ConfigName, Experiment, ExperimentConfig};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bp-run")]
#[command(about = "Bayesian optimization of a beamline with a calibrated physics prior")]
struct Args {
    /// Configuration preset (constant_prior, no_adjustment, offset_calibration,
    /// scale_calibration, fixed_offset, flatten, alternate, linear_input,
    /// linear_output, linear_calibration).
    config: Option<String>,

    /// JSON experiment configuration; command-line flags override it. Fields
    /// the file omits come from the named preset.
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Miscalibration level of the auxiliary model.
    #[arg(long)]
    mismatch: Option<f64>,

    /// Acquisition function: ei or ucb.
    #[arg(long)]
    acq: Option<String>,

    /// UCB exploration weight.
    #[arg(long, default_value = "2.0")]
    beta: f64,

    #[arg(long)]
    n_init: Option<usize>,

    #[arg(long)]
    n_run: Option<usize>,

    #[arg(long)]
    n_step: Option<usize>,

    #[arg(long)]
    n_eval: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Root directory for run records.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Start every repetition from a fresh prior mean (runs in parallel).
    #[arg(long)]
    reset_per_repetition: bool,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long)]
    verbose: bool,
}

fn build_config(args: &Args) -> anyhow::Result<ExperimentConfig> {
    let name = args
        .config
        .as_deref()
        .map(str::parse::<ConfigName>)
        .transpose()?;
    let mut config = match (&args.config_file, name) {
        (Some(path), name) => {
            let loaded = match name {
                Some(name) => ExperimentConfig::from_json_file_as(path, name),
                None => ExperimentConfig::from_json_file(path),
            };
            loaded.with_context(|| format!("loading {}", path.display()))?
        }
        (None, Some(name)) => ExperimentConfig::preset(name),
        (None, None) => bail!("either a configuration name or --config-file is required"),
    };

    if let Some(acq) = &args.acq {
        config.acquisition = AcquisitionConfig::from_name(acq, args.beta)?;
    }
    if let Some(m) = args.mismatch {
        config.mismatch = m;
    }
    if let Some(n) = args.n_init {
        config.n_init = n;
    }
    if let Some(n) = args.n_run {
        config.n_run = n;
    }
    if let Some(n) = args.n_step {
        config.n_step = n;
    }
    if let Some(n) = args.n_eval {
        config.n_eval = n;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(dir) = &args.output {
        config.output_dir = dir.clone();
    }
    if args.reset_per_repetition {
        config.reset_per_repetition = true;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = build_config(&args)?;
    let output_dir = config.output_dir.clone();
    let outcome = Experiment::new(config)?.run()?;

    let Some(record) = outcome.record else {
        bail!(
            "experiment {} failed: {}",
            outcome.status.config_name,
            outcome.status.error.unwrap_or_default()
        );
    };
    let path = record.save(&output_dir)?;
    info!(
        path = %path.display(),
        repetitions = outcome.status.repetitions_completed(),
        best = outcome.status.best().map(|b| b.objective),
        "run record written"
    );
    Ok(())
}
