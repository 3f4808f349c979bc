use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::data::Label;
use crate::error::NliError;

/// Which classifier to train. The numeric values match the `-m` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Baseline,
    DecomposableAttention,
}

impl ModelType {
    pub fn id(self) -> u8 {
        match self {
            ModelType::Baseline => 1,
            ModelType::DecomposableAttention => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelType::Baseline => "baseline",
            ModelType::DecomposableAttention => "decomposable-attention",
        }
    }
}

impl TryFrom<u8> for ModelType {
    type Error = NliError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ModelType::Baseline),
            2 => Ok(ModelType::DecomposableAttention),
            other => Err(NliError::UnknownModelType(other)),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id(), self.name())
    }
}

/// On-disk layout of the claim/evidence data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// JSON array of claim objects.
    Nli,
    /// CSV with `claim`, `evidence` and `label` columns.
    Fever,
}

impl DatasetKind {
    pub fn extension(self) -> &'static str {
        match self {
            DatasetKind::Nli => "json",
            DatasetKind::Fever => "csv",
        }
    }
}

impl FromStr for DatasetKind {
    type Err = NliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nli" | "json" => Ok(DatasetKind::Nli),
            "fever" | "csv" => Ok(DatasetKind::Fever),
            _ => Err(NliError::UnknownDataset(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Width of the dense feature vector; filled in from the fitted vectorizer.
    pub input_size: usize,
    pub hidden_size: usize,
    pub dropout: f64,
    pub num_classes: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            input_size: 0,
            hidden_size: 100,
            dropout: 0.4,
            num_classes: Label::COUNT,
        }
    }
}

impl BaselineConfig {
    pub fn validate(&self) -> Result<(), NliError> {
        if self.input_size == 0 {
            return Err(NliError::InvalidConfig("baseline input_size must be > 0".into()));
        }
        if self.hidden_size == 0 {
            return Err(NliError::InvalidConfig("baseline hidden_size must be > 0".into()));
        }
        check_dropout(self.dropout)?;
        check_classes(self.num_classes)
    }

    pub fn with_input_size(mut self, input_size: usize) -> Self {
        self.input_size = input_size;
        self
    }
}

impl fmt::Display for BaselineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Filled in from the fitted word tokenizer.
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_size: usize,
    pub dropout: f64,
    pub num_classes: usize,
    /// Vocabulary cap used when fitting the word tokenizer.
    pub max_vocab: usize,
    pub min_count: usize,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            vocab_size: 0,
            embedding_dim: 100,
            hidden_size: 200,
            dropout: 0.2,
            num_classes: Label::COUNT,
            max_vocab: 20_000,
            min_count: 1,
        }
    }
}

impl AttentionConfig {
    pub fn validate(&self) -> Result<(), NliError> {
        if self.vocab_size < 2 {
            return Err(NliError::InvalidConfig(
                "attention vocab_size must cover pad and unk tokens".into(),
            ));
        }
        if self.embedding_dim == 0 || self.hidden_size == 0 {
            return Err(NliError::InvalidConfig(
                "attention embedding_dim and hidden_size must be > 0".into(),
            ));
        }
        check_dropout(self.dropout)?;
        check_classes(self.num_classes)
    }

    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }
}

impl fmt::Display for AttentionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn check_dropout(p: f64) -> Result<(), NliError> {
    if (0.0..1.0).contains(&p) {
        Ok(())
    } else {
        Err(NliError::InvalidConfig(format!("dropout must be within [0,1), got {p}")))
    }
}

/// The output layer always scores the three FEVER labels.
fn check_classes(n: usize) -> Result<(), NliError> {
    if n != Label::COUNT {
        return Err(NliError::InvalidConfig(format!(
            "num_classes must be {}, got {n}",
            Label::COUNT
        )));
    }
    Ok(())
}

/// Model hyperparameters read from the optional `--config` JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub baseline: BaselineConfig,
    pub attention: AttentionConfig,
    /// Vocabulary cap of the count and TF-IDF vectorizers.
    pub max_features: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            baseline: BaselineConfig::default(),
            attention: AttentionConfig::default(),
            max_features: 5000,
        }
    }
}

impl ModelConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config JSON: {:?}", path))?;
        Ok(config)
    }
}

/// Every hyperparameter of a job. Persisted with each checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HParams {
    pub model_type: ModelType,
    pub dataset: DatasetKind,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub job_id: u64,
    pub repeats: usize,
    pub num_gpus: usize,
    pub num_cores: usize,
    pub train_steps: usize,
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub learning_rate: f64,
    pub cutoff_len: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub model: ModelConfig,
}

impl HParams {
    pub fn new(model_type: ModelType, data_dir: PathBuf, output_dir: PathBuf, job_id: u64) -> Self {
        Self {
            model_type,
            dataset: DatasetKind::Nli,
            data_dir,
            output_dir,
            job_id,
            repeats: 1,
            num_gpus: 1,
            num_cores: 4,
            train_steps: 100,
            batch_size: 128,
            eval_batch_size: 128,
            learning_rate: 5e-4,
            cutoff_len: 500,
            seed: None,
            model: ModelConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), NliError> {
        if self.repeats == 0 {
            return Err(NliError::InvalidConfig("repeats must be > 0".into()));
        }
        if self.train_steps == 0 {
            return Err(NliError::InvalidConfig("train_steps must be > 0".into()));
        }
        if self.batch_size == 0 || self.eval_batch_size == 0 {
            return Err(NliError::InvalidConfig("batch sizes must be > 0".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(NliError::InvalidConfig("learning_rate must be > 0".into()));
        }
        if self.cutoff_len == 0 {
            return Err(NliError::InvalidConfig("cutoff_len must be > 0".into()));
        }
        if self.model.max_features == 0 {
            return Err(NliError::InvalidConfig("max_features must be > 0".into()));
        }
        check_classes(self.model.baseline.num_classes)?;
        check_classes(self.model.attention.num_classes)
    }
}

/// Per-repeat execution settings: where checkpoints go and how often.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub model_dir: PathBuf,
    pub seed: Option<u64>,
    pub save_summary_steps: usize,
    pub save_checkpoints_steps: usize,
    pub keep_checkpoint_max: usize,
    pub log_step_count_steps: usize,
}

pub const SAVE_CHECKPOINTS_STEPS: usize = 500;
pub const SAVE_SUMMARY_STEPS: usize = 100;
pub const LOG_STEP_COUNT_STEPS: usize = 100;

impl RunConfig {
    /// Settings for the `repeat`-th run (1-based) of a job.
    pub fn for_repeat(hparams: &HParams, repeat: usize) -> Self {
        let model_dir = hparams
            .output_dir
            .join(format!("{}-{}", hparams.job_id, repeat));
        // keep exactly as many checkpoints as will be generated
        let keep_checkpoint_max = hparams.train_steps / SAVE_CHECKPOINTS_STEPS + 1;

        Self {
            model_dir,
            seed: hparams.seed.map(|s| s.wrapping_add((repeat as u64).saturating_sub(1))),
            save_summary_steps: SAVE_SUMMARY_STEPS,
            save_checkpoints_steps: SAVE_CHECKPOINTS_STEPS,
            keep_checkpoint_max,
            log_step_count_steps: LOG_STEP_COUNT_STEPS,
        }
    }
}
