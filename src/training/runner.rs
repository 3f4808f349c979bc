use anyhow::{Context, Result};
use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::metrics::EvalMetrics;
use super::summary::SummaryWriter;
use super::trainer::{evaluate_model, NliTrainer};
use crate::checkpoint::{
    latest_checkpoint, load_checkpoint, prune_checkpoints, read_checkpoint_data, save_checkpoint,
    ModelSpec,
};
use crate::config::{HParams, RunConfig};
use crate::data::{DataLoader, ExampleLoader};
use crate::input::{DataFiles, FeatureArtifacts, InputPipeline, Mode};
use crate::model::{BaselineModel, DecomposableAttentionModel, NliClassifier};

pub const REPORT_FILE: &str = "report.json";

/// Outcome of one repeat of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub repeat: usize,
    pub model_dir: PathBuf,
    pub steps: usize,
    /// Loss of the last training step.
    pub final_loss: f64,
    /// One entry per saved checkpoint.
    pub evaluations: Vec<EvalMetrics>,
    pub test: EvalMetrics,
}

/// Train and evaluate `hparams.repeats` fresh models.
pub fn run_experiment<B: AutodiffBackend>(hparams: &HParams, device: &B::Device) -> Result<Vec<RunReport>> {
    hparams.validate()?;
    info!(
        "Job {}: model {}, {} repeat(s), {} steps, batch size {}, learning rate {}",
        hparams.job_id,
        hparams.model_type,
        hparams.repeats,
        hparams.train_steps,
        hparams.batch_size,
        hparams.learning_rate
    );

    let mut reports = Vec::with_capacity(hparams.repeats);
    for repeat in 1..=hparams.repeats {
        let run = RunConfig::for_repeat(hparams, repeat);
        info!("Starting repeat {}/{} in {:?}", repeat, hparams.repeats, run.model_dir);

        let report = run_once::<B>(hparams, &run, repeat, device)
            .with_context(|| format!("Repeat {} failed", repeat))?;
        reports.push(report);
    }

    Ok(reports)
}

fn run_once<B: AutodiffBackend>(
    hparams: &HParams,
    run: &RunConfig,
    repeat: usize,
    device: &B::Device,
) -> Result<RunReport> {
    let pipeline = InputPipeline::fit(hparams)?;
    pipeline.artifacts().save(&run.model_dir)?;

    let spec = pipeline.artifacts().model_spec(&hparams.model);
    info!("Model spec: {:?}", spec);

    match &spec {
        ModelSpec::Baseline(config) => {
            config.validate()?;
            let model = BaselineModel::<B>::new(config, device)?;
            train_and_evaluate(model, &spec, hparams, run, &pipeline, repeat, device)
        }
        ModelSpec::DecomposableAttention(config) => {
            config.validate()?;
            let model = DecomposableAttentionModel::<B>::new(config, device)?;
            train_and_evaluate(model, &spec, hparams, run, &pipeline, repeat, device)
        }
    }
}

fn train_and_evaluate<B, M>(
    model: M,
    spec: &ModelSpec,
    hparams: &HParams,
    run: &RunConfig,
    pipeline: &InputPipeline,
    repeat: usize,
    device: &B::Device,
) -> Result<RunReport>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + NliClassifier<B>,
    M::InnerModule: NliClassifier<B::InnerBackend>,
{
    let mut train_loader = pipeline.input_fn(Mode::Train, run.seed)?;
    if train_loader.is_empty() {
        anyhow::bail!("Training split has no examples");
    }
    let mut eval_loader = pipeline.input_fn(Mode::Eval, None)?;
    let mut summaries = SummaryWriter::create(&run.model_dir)?;
    let mut trainer = NliTrainer::new(model, hparams.learning_rate, device);

    info!("Training {} for {} steps", trainer.model().name(), hparams.train_steps);

    let mut evaluations = Vec::new();
    let mut final_loss = f64::NAN;
    let mut window_loss = 0.0f64;
    let mut window_steps = 0usize;

    while trainer.step() < hparams.train_steps {
        let batch = match train_loader.next_batch()? {
            Some(batch) => batch,
            None => {
                // epoch boundary
                train_loader.reset();
                continue;
            }
        };

        let output = trainer.train_step(&batch)?;
        let step = output.step;
        final_loss = output.loss_value() as f64;
        window_loss += final_loss;
        window_steps += 1;

        if step % run.log_step_count_steps == 0 {
            info!(
                "Step {}/{}: Loss = {:.6} (avg: {:.6})",
                step,
                hparams.train_steps,
                final_loss,
                window_loss / window_steps as f64
            );
            window_loss = 0.0;
            window_steps = 0;
        }

        if step % run.save_summary_steps == 0 {
            summaries.train(step, final_loss, trainer.learning_rate())?;
        }

        if step % run.save_checkpoints_steps == 0 || step == hparams.train_steps {
            save_checkpoint::<B, M>(trainer.model(), step, hparams, spec, &run.model_dir)?;
            let removed = prune_checkpoints(&run.model_dir, run.keep_checkpoint_max)?;
            if removed > 0 {
                info!("Pruned {} old checkpoint(s)", removed);
            }

            let metrics = trainer.evaluate("eval", &mut eval_loader)?;
            info!("{}", metrics);
            summaries.eval(&metrics)?;
            evaluations.push(metrics);
        }
    }

    let mut test_loader = pipeline.input_fn(Mode::Predict, None)?;
    let test = trainer.evaluate("test", &mut test_loader)?;
    info!("{}", test);
    summaries.eval(&test)?;

    let report = RunReport {
        repeat,
        model_dir: run.model_dir.clone(),
        steps: trainer.step(),
        final_loss,
        evaluations,
        test,
    };
    write_report(&report)?;
    Ok(report)
}

fn write_report(report: &RunReport) -> Result<()> {
    let path = report.model_dir.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(report).with_context(|| "Failed to serialize run report")?;
    fs::write(&path, json).with_context(|| format!("Failed to write run report: {:?}", path))?;
    Ok(())
}

/// Resolve a checkpoint argument: a metadata file, or a run directory whose
/// latest checkpoint is used.
pub fn resolve_checkpoint(path: &Path) -> Result<PathBuf> {
    if path.is_dir() {
        return latest_checkpoint(path)?
            .ok_or_else(|| anyhow::anyhow!("No checkpoint found in {:?}", path));
    }
    Ok(path.to_path_buf())
}

/// Rebuild the model and input artifacts saved with a checkpoint and evaluate
/// `data_file` with them.
pub fn evaluate_checkpoint<B: Backend>(
    checkpoint: &Path,
    data_file: &Path,
    device: &B::Device,
) -> Result<EvalMetrics> {
    let checkpoint = resolve_checkpoint(checkpoint)?;
    let data = read_checkpoint_data(&checkpoint)?;
    let run_dir = checkpoint
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Invalid checkpoint path: {:?}", checkpoint))?;

    let artifacts = FeatureArtifacts::load(run_dir, data.hparams.model_type)?;
    let files = DataFiles::discover(&data.hparams.data_dir, data.hparams.dataset);
    let pipeline = InputPipeline::with_artifacts(&data.hparams, files, artifacts);

    let examples = pipeline.load_examples(data_file)?;
    if examples.is_empty() {
        warn!("No examples in {:?}", data_file);
    }
    let mut loader = ExampleLoader::new(
        examples,
        data.hparams.eval_batch_size,
        pipeline.artifacts().pad_id(),
    )?;

    let metrics = match &data.model {
        ModelSpec::Baseline(config) => {
            let model = BaselineModel::<B>::new(config, device)?;
            let (model, _) = load_checkpoint(&checkpoint, model, device)?;
            evaluate_model::<B, _, _>(&model, device, "eval", data.step, &mut loader)?
        }
        ModelSpec::DecomposableAttention(config) => {
            let model = DecomposableAttentionModel::<B>::new(config, device)?;
            let (model, _) = load_checkpoint(&checkpoint, model, device)?;
            evaluate_model::<B, _, _>(&model, device, "eval", data.step, &mut loader)?
        }
    };

    info!("{}", metrics);
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::list_checkpoints;
    use crate::config::ModelType;
    use crate::training::summary::{read_summaries, SummaryRecord, SUMMARY_FILE};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray<f32>>;

    const TRAIN: &str = r#"[
        {"claim": "Paris is the capital of France", "evidence": ["Paris is the capital city of France"], "label": "SUPPORTS"},
        {"claim": "Berlin is in Spain", "evidence": ["Berlin is the capital of Germany"], "label": "REFUTES"},
        {"claim": "Rome has many cats", "evidence": ["Tokyo hosts summer festivals"], "label": "NOT ENOUGH INFO"},
        {"claim": "Lisbon is in Portugal", "evidence": ["Lisbon is the capital of Portugal"], "label": "SUPPORTS"}
    ]"#;

    const DEV: &str = r#"[
        {"claim": "Madrid is in Spain", "evidence": ["Madrid is the capital of Spain"], "label": "SUPPORTS"},
        {"claim": "Oslo is in Chile", "evidence": ["Oslo is the capital of Norway"], "label": "REFUTES"}
    ]"#;

    fn setup(model_type: ModelType, train_steps: usize) -> (TempDir, HParams) {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();
        fs::write(data_dir.join("train.json"), TRAIN).unwrap();
        fs::write(data_dir.join("dev.json"), DEV).unwrap();

        let mut hp = HParams::new(model_type, data_dir, dir.path().join("out"), 7);
        hp.train_steps = train_steps;
        hp.batch_size = 3;
        hp.eval_batch_size = 2;
        hp.learning_rate = 1e-2;
        hp.seed = Some(3);
        hp.model.baseline.hidden_size = 8;
        hp.model.attention.embedding_dim = 8;
        hp.model.attention.hidden_size = 8;
        (dir, hp)
    }

    #[test]
    fn test_baseline_run_writes_checkpoints_and_summaries() {
        let (_dir, mut hp) = setup(ModelType::Baseline, 1001);
        hp.repeats = 1;
        let device = Default::default();

        let reports = run_experiment::<TestBackend>(&hp, &device).unwrap();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.steps, 1001);
        assert!(report.final_loss.is_finite());

        // checkpoints at 500, 1000 and the final step
        let steps: Vec<usize> = report.evaluations.iter().map(|m| m.step).collect();
        assert_eq!(steps, vec![500, 1000, 1001]);
        assert_eq!(report.test.name, "test");
        assert_eq!(report.test.num_examples, 2);

        let kept: Vec<usize> = list_checkpoints(&report.model_dir)
            .unwrap()
            .into_iter()
            .map(|(_, step, _)| step)
            .collect();
        assert_eq!(kept, vec![500, 1000, 1001]);

        let summaries = read_summaries(&report.model_dir.join(SUMMARY_FILE)).unwrap();
        let train_records = summaries
            .iter()
            .filter(|r| matches!(r, SummaryRecord::Train { .. }))
            .count();
        assert_eq!(train_records, 10);
        assert!(report.model_dir.join(REPORT_FILE).exists());
    }

    #[test]
    fn test_repeats_use_separate_directories() {
        let (dir, mut hp) = setup(ModelType::DecomposableAttention, 4);
        hp.repeats = 2;
        let device = Default::default();

        let reports = run_experiment::<TestBackend>(&hp, &device).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].model_dir, dir.path().join("out").join("7-1"));
        assert_eq!(reports[1].model_dir, dir.path().join("out").join("7-2"));
        for report in &reports {
            assert_eq!(report.evaluations.len(), 1);
            assert_eq!(report.evaluations[0].step, 4);
        }
    }

    #[test]
    fn test_evaluate_checkpoint_from_run_dir() {
        let (dir, hp) = setup(ModelType::Baseline, 5);
        let device = Default::default();
        let reports = run_experiment::<TestBackend>(&hp, &device).unwrap();

        let dev = dir.path().join("data").join("dev.json");
        let metrics =
            evaluate_checkpoint::<NdArray<f32>>(&reports[0].model_dir, &dev, &Default::default()).unwrap();
        assert_eq!(metrics.step, 5);
        assert_eq!(metrics.num_examples, 2);
        assert!((metrics.accuracy - reports[0].test.accuracy).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_hparams_rejected() {
        let (_dir, mut hp) = setup(ModelType::Baseline, 5);
        hp.repeats = 0;
        assert!(run_experiment::<TestBackend>(&hp, &Default::default()).is_err());
    }

    #[test]
    fn test_wrong_class_count_is_an_error() {
        let (_dir, mut hp) = setup(ModelType::Baseline, 2);
        hp.model.baseline.num_classes = 2;
        assert!(run_experiment::<TestBackend>(&hp, &Default::default()).is_err());
    }

    #[test]
    fn test_empty_dev_split_keeps_eval_summaries() {
        let (dir, hp) = setup(ModelType::Baseline, 2);
        fs::write(dir.path().join("data").join("dev.json"), "[]").unwrap();

        let reports = run_experiment::<TestBackend>(&hp, &Default::default()).unwrap();
        let report = &reports[0];
        assert_eq!(report.test.num_examples, 0);
        assert_eq!(report.test.loss, None);

        let summaries = read_summaries(&report.model_dir.join(SUMMARY_FILE)).unwrap();
        let evals: Vec<&SummaryRecord> = summaries
            .iter()
            .filter(|r| matches!(r, SummaryRecord::Eval { .. }))
            .collect();
        assert_eq!(evals.len(), 2);
        assert!(evals
            .iter()
            .all(|r| matches!(r, SummaryRecord::Eval { loss: None, num_examples: 0, .. })));
    }
}
