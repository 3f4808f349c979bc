use anyhow::{Context, Result};
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{AttentionConfig, BaselineConfig, HParams};

/// Architecture of the saved weights, with the sizes needed to rebuild it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSpec {
    Baseline(BaselineConfig),
    DecomposableAttention(AttentionConfig),
}

/// Checkpoint metadata written next to the model weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    pub step: usize,
    pub hparams: HParams,
    pub model: ModelSpec,
    pub model_file: String,
    pub timestamp: u64,
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Save model weights plus metadata; returns the metadata path.
pub fn save_checkpoint<B: Backend, M: Module<B>>(
    model: &M,
    step: usize,
    hparams: &HParams,
    spec: &ModelSpec,
    checkpoint_dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(checkpoint_dir)
        .with_context(|| format!("Failed to create checkpoint directory: {:?}", checkpoint_dir))?;

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let checkpoint_name = format!("checkpoint_step_{}", step);
    let model_file = format!("{}_model", checkpoint_name);
    let model_path = checkpoint_dir.join(&model_file);

    Recorder::<B>::record(&recorder(), model.clone().into_record(), model_path.clone())
        .with_context(|| "Failed to save model weights")?;

    let checkpoint_data = CheckpointData {
        step,
        hparams: hparams.clone(),
        model: spec.clone(),
        model_file,
        timestamp,
    };

    let metadata_path = checkpoint_dir.join(checkpoint_name).with_extension("json");
    let metadata_json = serde_json::to_string_pretty(&checkpoint_data)
        .with_context(|| "Failed to serialize checkpoint metadata")?;

    fs::write(&metadata_path, metadata_json)
        .with_context(|| format!("Failed to write checkpoint metadata: {:?}", metadata_path))?;

    info!("Checkpoint saved at step {}: {:?}", step, metadata_path);

    Ok(metadata_path)
}

pub fn read_checkpoint_data(checkpoint_path: &Path) -> Result<CheckpointData> {
    let metadata_json = fs::read_to_string(checkpoint_path)
        .with_context(|| format!("Failed to read checkpoint file: {:?}", checkpoint_path))?;

    serde_json::from_str(&metadata_json).with_context(|| "Failed to parse checkpoint metadata")
}

/// Load saved weights into `model`, which must have the checkpoint's architecture.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    checkpoint_path: &Path,
    model: M,
    device: &B::Device,
) -> Result<(M, CheckpointData)> {
    let checkpoint_data = read_checkpoint_data(checkpoint_path)?;
    info!("Loading checkpoint from step {}", checkpoint_data.step);

    let checkpoint_dir = checkpoint_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Invalid checkpoint path: {:?}", checkpoint_path))?;
    let model_path = checkpoint_dir.join(&checkpoint_data.model_file);

    let record = Recorder::<B>::load(&recorder(), model_path.clone(), device)
        .with_context(|| format!("Failed to load model weights from: {:?}", model_path))?;

    Ok((model.load_record(record), checkpoint_data))
}

/// All checkpoints in a directory as `(metadata path, step, timestamp)`, by step.
pub fn list_checkpoints(checkpoint_dir: &Path) -> Result<Vec<(PathBuf, usize, u64)>> {
    if !checkpoint_dir.exists() {
        warn!("Checkpoint directory does not exist: {:?}", checkpoint_dir);
        return Ok(Vec::new());
    }

    let mut checkpoints = Vec::new();

    for entry in WalkDir::new(checkpoint_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Ok(checkpoint_data) = read_checkpoint_data(path) {
            checkpoints.push((path.to_path_buf(), checkpoint_data.step, checkpoint_data.timestamp));
        }
    }

    checkpoints.sort_by_key(|(_, step, _)| *step);

    Ok(checkpoints)
}

pub fn latest_checkpoint(checkpoint_dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list_checkpoints(checkpoint_dir)?
        .into_iter()
        .last()
        .map(|(path, _, _)| path))
}

/// Delete the oldest checkpoints so that at most `keep_max` remain.
pub fn prune_checkpoints(checkpoint_dir: &Path, keep_max: usize) -> Result<usize> {
    let checkpoints = list_checkpoints(checkpoint_dir)?;
    let excess = checkpoints.len().saturating_sub(keep_max);

    for (path, step, _) in checkpoints.into_iter().take(excess) {
        let data = read_checkpoint_data(&path)?;
        let weights = checkpoint_dir.join(&data.model_file).with_extension("mpk");
        if weights.exists() {
            fs::remove_file(&weights)
                .with_context(|| format!("Failed to remove checkpoint weights: {:?}", weights))?;
        }
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove checkpoint metadata: {:?}", path))?;
        info!("Removed checkpoint at step {}", step);
    }

    Ok(excess)
}
