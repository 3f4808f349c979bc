use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fever_nli::config::DatasetKind;
use fever_nli::training::EvalMetrics;
use fever_nli::{evaluate_checkpoint, run_experiment, HParams, ModelConfig, ModelType, RunReport};

type CpuBackend = NdArray<f32>;

#[derive(Debug, Parser)]
#[command(author, version, about = "Claim/evidence NLI training CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Train and evaluate a model
    Train(TrainArgs),
    /// Evaluate a saved checkpoint on a data file
    Eval(EvalArgs),
}

#[derive(Debug, Args)]
struct TrainArgs {
    /// Model type: 1 = baseline MLP, 2 = decomposable attention
    #[arg(short = 'm', long, value_parser = clap::value_parser!(u8).range(1..=2))]
    model: u8,

    /// Directory holding the train/dev/test files
    #[arg(short = 'i', long)]
    data_dir: PathBuf,

    /// Directory for run outputs
    #[arg(short = 'o', long)]
    output_dir: PathBuf,

    /// Job id used to name run directories
    #[arg(short = 'j', long)]
    job_id: u64,

    /// Number of repeats of the job
    #[arg(short = 'a', long = "array-job", default_value_t = 1)]
    repeats: usize,

    #[arg(short = 'n', long, default_value_t = 1)]
    num_gpus: usize,

    #[arg(short = 'c', long = "num-cpu-cores", default_value_t = 4)]
    num_cores: usize,

    #[arg(short = 's', long, default_value_t = 100)]
    train_steps: usize,

    #[arg(short = 'b', long, default_value_t = 128)]
    batch_size: usize,

    #[arg(short = 'e', long, default_value_t = 128)]
    eval_batch_size: usize,

    #[arg(short = 'l', long, default_value_t = 5e-4)]
    learning_rate: f64,

    /// Maximum number of words kept per sequence
    #[arg(short = 'u', long = "cutoff", default_value_t = 500)]
    cutoff_len: usize,

    /// Data layout: nli (JSON) or fever (CSV)
    #[arg(long, default_value = "nli")]
    dataset: DatasetKind,

    /// Path to a model configuration JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,
}

impl TrainArgs {
    fn into_hparams(self) -> Result<HParams> {
        let model_type = ModelType::try_from(self.model)?;
        let model = match &self.config {
            Some(path) => {
                info!("Loading model configuration from: {:?}", path);
                ModelConfig::from_file(path)?
            }
            None => ModelConfig::default(),
        };

        let mut hparams = HParams::new(model_type, self.data_dir, self.output_dir, self.job_id);
        hparams.dataset = self.dataset;
        hparams.repeats = self.repeats;
        hparams.num_gpus = self.num_gpus;
        hparams.num_cores = self.num_cores;
        hparams.train_steps = self.train_steps;
        hparams.batch_size = self.batch_size;
        hparams.eval_batch_size = self.eval_batch_size;
        hparams.learning_rate = self.learning_rate;
        hparams.cutoff_len = self.cutoff_len;
        hparams.seed = self.seed;
        hparams.model = model;

        hparams.validate()?;
        Ok(hparams)
    }
}

#[derive(Debug, Args)]
struct EvalArgs {
    /// Checkpoint metadata file, or a run directory to use its latest checkpoint
    #[arg(long)]
    checkpoint: PathBuf,
    /// Path to evaluation data
    #[arg(long)]
    data: PathBuf,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Start execution");
    let result = match cli.command {
        Commands::Train(args) => train_command(args),
        Commands::Eval(args) => eval_command(args),
    };
    info!("Finished execution");
    result
}

fn train_command(args: TrainArgs) -> Result<()> {
    let hparams = args.into_hparams()?;
    info!("Hyperparameters: {:?}", hparams);
    info!("Using {} CPU core(s)", hparams.num_cores);

    let reports = train_on_device(&hparams)?;

    for report in &reports {
        info!(
            "Repeat {} finished after {} steps: {}",
            report.repeat, report.steps, report.test
        );
    }
    info!("Training completed!");
    Ok(())
}

fn eval_command(args: EvalArgs) -> Result<()> {
    info!("Evaluating {:?} on {:?}", args.checkpoint, args.data);
    let metrics = evaluate_on_device(&args)
        .with_context(|| format!("Failed to evaluate checkpoint {:?}", args.checkpoint))?;
    info!("{}", metrics);
    Ok(())
}

#[cfg(feature = "wgpu-backend")]
fn train_on_device(hparams: &HParams) -> Result<Vec<RunReport>> {
    use burn_wgpu::{Wgpu, WgpuDevice};

    if hparams.num_gpus > 0 {
        info!("Training on wgpu device");
        return run_experiment::<Autodiff<Wgpu>>(hparams, &WgpuDevice::default());
    }
    run_experiment::<Autodiff<CpuBackend>>(hparams, &Default::default())
}

#[cfg(all(feature = "tch-backend", not(feature = "wgpu-backend")))]
fn train_on_device(hparams: &HParams) -> Result<Vec<RunReport>> {
    use burn_tch::{LibTorch, LibTorchDevice};

    if hparams.num_gpus > 0 {
        info!("Training on libtorch CUDA device");
        return run_experiment::<Autodiff<LibTorch<f32>>>(hparams, &LibTorchDevice::Cuda(0));
    }
    run_experiment::<Autodiff<CpuBackend>>(hparams, &Default::default())
}

#[cfg(not(any(feature = "wgpu-backend", feature = "tch-backend")))]
fn train_on_device(hparams: &HParams) -> Result<Vec<RunReport>> {
    if hparams.num_gpus > 0 {
        warn!(
            "{} GPU(s) requested but this build has no GPU backend; training on CPU",
            hparams.num_gpus
        );
    }
    run_experiment::<Autodiff<CpuBackend>>(hparams, &Default::default())
}

#[cfg(feature = "wgpu-backend")]
fn evaluate_on_device(args: &EvalArgs) -> Result<EvalMetrics> {
    use burn_wgpu::{Wgpu, WgpuDevice};

    evaluate_checkpoint::<Wgpu>(&args.checkpoint, &args.data, &WgpuDevice::default())
}

#[cfg(all(feature = "tch-backend", not(feature = "wgpu-backend")))]
fn evaluate_on_device(args: &EvalArgs) -> Result<EvalMetrics> {
    use burn_tch::{LibTorch, LibTorchDevice};

    evaluate_checkpoint::<LibTorch<f32>>(&args.checkpoint, &args.data, &LibTorchDevice::Cuda(0))
}

#[cfg(not(any(feature = "wgpu-backend", feature = "tch-backend")))]
fn evaluate_on_device(args: &EvalArgs) -> Result<EvalMetrics> {
    evaluate_checkpoint::<CpuBackend>(&args.checkpoint, &args.data, &Default::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_flags() {
        let cli = Cli::parse_from([
            "nli-train", "train", "-m", "2", "-i", "data", "-o", "out", "-j", "17", "-a", "3", "-s",
            "1000", "-u", "50", "--dataset", "fever",
        ]);
        let Commands::Train(args) = cli.command else {
            panic!("train subcommand expected");
        };
        let hparams = args.into_hparams().unwrap();
        assert_eq!(hparams.model_type, ModelType::DecomposableAttention);
        assert_eq!(hparams.job_id, 17);
        assert_eq!(hparams.repeats, 3);
        assert_eq!(hparams.train_steps, 1000);
        assert_eq!(hparams.cutoff_len, 50);
        assert_eq!(hparams.batch_size, 128);
        assert_eq!(hparams.learning_rate, 5e-4);
        assert_eq!(hparams.dataset, DatasetKind::Fever);
    }

    #[test]
    fn test_model_flag_out_of_range() {
        let result = Cli::try_parse_from([
            "nli-train", "train", "-m", "3", "-i", "data", "-o", "out", "-j", "1",
        ]);
        assert!(result.is_err());
    }
}
