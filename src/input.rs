//! Input pipeline: picks the split for a mode, loads it, and encodes it with
//! artifacts fitted on the training split.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::checkpoint::ModelSpec;
use crate::config::{DatasetKind, HParams, ModelConfig, ModelType};
use crate::data::{
    get_claim_evidence_pairs, load_fever, load_nli, load_pair_cache, pair_cache_path,
    ClaimEvidencePair, EvidenceMode, ExampleLoader, FeatureExtractor, NliExample, TokenizedPair,
    Tokenizer, WordTokenizer,
};
use crate::error::NliError;

/// Records read per chunk from FEVER CSV files.
pub const FEVER_CHUNK_SIZE: usize = 1000;

pub const FEATURES_FILE: &str = "features.json";
pub const VOCAB_FILE: &str = "vocab.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
    Predict,
}

impl FromStr for Mode {
    type Err = NliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Mode::Train),
            "eval" => Ok(Mode::Eval),
            "predict" => Ok(Mode::Predict),
            _ => Err(NliError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Train => "train",
            Mode::Eval => "eval",
            Mode::Predict => "predict",
        };
        f.write_str(name)
    }
}

/// Locations of the train, dev and test splits.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFiles {
    pub train: PathBuf,
    pub eval: PathBuf,
    pub test: PathBuf,
}

impl DataFiles {
    /// `train.<ext>`, `dev.<ext>` and `test.<ext>` under `data_dir`.
    pub fn discover(data_dir: &Path, kind: DatasetKind) -> Self {
        let ext = kind.extension();
        Self {
            train: data_dir.join(format!("train.{ext}")),
            eval: data_dir.join(format!("dev.{ext}")),
            test: data_dir.join(format!("test.{ext}")),
        }
    }

    /// Predict reads the test split, or the dev split when there is no test file.
    pub fn for_mode(&self, mode: Mode) -> &Path {
        match mode {
            Mode::Train => &self.train,
            Mode::Eval => &self.eval,
            Mode::Predict if self.test.exists() || pair_cache_path(&self.test).exists() => &self.test,
            Mode::Predict => &self.eval,
        }
    }
}

/// Load a split as claim/evidence pairs, preferring its `<file>.pairs.bin` cache.
pub fn load_pairs(path: &Path, kind: DatasetKind) -> Result<Vec<ClaimEvidencePair>> {
    let cache = pair_cache_path(path);
    if cache.exists() {
        return load_pair_cache(&cache);
    }

    let records = match kind {
        DatasetKind::Nli => load_nli(path)?,
        DatasetKind::Fever => load_fever(path, FEVER_CHUNK_SIZE)?,
    };
    Ok(get_claim_evidence_pairs(&records, EvidenceMode::Concat))
}

/// Whatever was fitted on the training split to encode examples.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureArtifacts {
    /// Count and TF-IDF vectorizers for the baseline.
    Vectorizers(FeatureExtractor),
    /// Word vocabulary for the attention model.
    Vocabulary(WordTokenizer),
}

impl FeatureArtifacts {
    pub fn fit(model_type: ModelType, pairs: &[ClaimEvidencePair], config: &ModelConfig) -> Result<Self, NliError> {
        let documents: Vec<&str> = pairs.iter().map(|p| p.document.as_str()).collect();
        match model_type {
            ModelType::Baseline => Ok(FeatureArtifacts::Vectorizers(FeatureExtractor::fit(
                &documents,
                config.max_features,
            )?)),
            ModelType::DecomposableAttention => Ok(FeatureArtifacts::Vocabulary(WordTokenizer::fit(
                &documents,
                config.attention.max_vocab,
                config.attention.min_count,
            )?)),
        }
    }

    /// Encode pairs. Evidence (and claims, for the attention model) are cut
    /// to `cutoff` words.
    pub fn encode(&self, pairs: Vec<ClaimEvidencePair>, cutoff: usize) -> Result<Vec<NliExample>, NliError> {
        match self {
            FeatureArtifacts::Vectorizers(extractor) => {
                let pairs: Vec<ClaimEvidencePair> = pairs.into_iter().map(|p| p.truncated(cutoff)).collect();
                Ok(extractor
                    .transform(&pairs)?
                    .into_iter()
                    .map(NliExample::Features)
                    .collect())
            }
            FeatureArtifacts::Vocabulary(tokenizer) => Ok(pairs
                .iter()
                .map(|pair| {
                    NliExample::Tokens(TokenizedPair {
                        claim: tokenizer.encode(&pair.claim, Some(cutoff)),
                        evidence: tokenizer.encode(&pair.evidence_text(), Some(cutoff)),
                        label: pair.label,
                    })
                })
                .collect()),
        }
    }

    pub fn pad_id(&self) -> i64 {
        match self {
            FeatureArtifacts::Vectorizers(_) => 0,
            FeatureArtifacts::Vocabulary(tokenizer) => tokenizer.pad_id(),
        }
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            FeatureArtifacts::Vectorizers(_) => ModelType::Baseline,
            FeatureArtifacts::Vocabulary(_) => ModelType::DecomposableAttention,
        }
    }

    /// Model architecture sized to these artifacts.
    pub fn model_spec(&self, config: &ModelConfig) -> ModelSpec {
        match self {
            FeatureArtifacts::Vectorizers(extractor) => {
                ModelSpec::Baseline(config.baseline.clone().with_input_size(extractor.feature_dim()))
            }
            FeatureArtifacts::Vocabulary(tokenizer) => ModelSpec::DecomposableAttention(
                config.attention.clone().with_vocab_size(tokenizer.vocab_size()),
            ),
        }
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;
        let path = match self {
            FeatureArtifacts::Vectorizers(extractor) => {
                let path = dir.join(FEATURES_FILE);
                extractor.save(&path)?;
                path
            }
            FeatureArtifacts::Vocabulary(tokenizer) => {
                let path = dir.join(VOCAB_FILE);
                tokenizer.save(&path)?;
                path
            }
        };
        info!("Saved input artifacts to {:?}", path);
        Ok(path)
    }

    pub fn load(dir: &Path, model_type: ModelType) -> Result<Self> {
        match model_type {
            ModelType::Baseline => Ok(FeatureArtifacts::Vectorizers(FeatureExtractor::load(
                &dir.join(FEATURES_FILE),
            )?)),
            ModelType::DecomposableAttention => Ok(FeatureArtifacts::Vocabulary(WordTokenizer::load(
                &dir.join(VOCAB_FILE),
            )?)),
        }
    }
}

/// Builds loaders for each mode from one set of fitted artifacts.
pub struct InputPipeline {
    hparams: HParams,
    files: DataFiles,
    artifacts: FeatureArtifacts,
}

impl InputPipeline {
    /// Load the training split and fit artifacts on it.
    pub fn fit(hparams: &HParams) -> Result<Self> {
        let files = DataFiles::discover(&hparams.data_dir, hparams.dataset);
        let pairs = load_pairs(&files.train, hparams.dataset)
            .with_context(|| format!("Failed to load training split {:?}", files.train))?;
        if pairs.is_empty() {
            anyhow::bail!(NliError::EmptyDataset(format!("{:?}", files.train)));
        }

        let artifacts = FeatureArtifacts::fit(hparams.model_type, &pairs, &hparams.model)?;
        Ok(Self::with_artifacts(hparams, files, artifacts))
    }

    pub fn with_artifacts(hparams: &HParams, files: DataFiles, artifacts: FeatureArtifacts) -> Self {
        Self {
            hparams: hparams.clone(),
            files,
            artifacts,
        }
    }

    /// Loader for `mode`. Only training data is shuffled.
    pub fn input_fn(&self, mode: Mode, seed: Option<u64>) -> Result<ExampleLoader> {
        let path = self.files.for_mode(mode);
        let examples = self.load_examples(path)?;
        info!("{} input: {} examples from {:?}", mode, examples.len(), path);

        let batch_size = match mode {
            Mode::Train => self.hparams.batch_size,
            Mode::Eval | Mode::Predict => self.hparams.eval_batch_size,
        };
        let loader = ExampleLoader::new(examples, batch_size, self.artifacts.pad_id())?;

        Ok(match mode {
            Mode::Train => loader.with_shuffle(seed),
            Mode::Eval | Mode::Predict => loader,
        })
    }

    /// Like [`Self::input_fn`] with the mode given by name.
    pub fn input_fn_named(&self, mode: &str, seed: Option<u64>) -> Result<ExampleLoader> {
        self.input_fn(mode.parse()?, seed)
    }

    /// Encode any file of the configured dataset kind.
    pub fn load_examples(&self, path: &Path) -> Result<Vec<NliExample>> {
        let pairs = load_pairs(path, self.hparams.dataset)?;
        Ok(self.artifacts.encode(pairs, self.hparams.cutoff_len)?)
    }

    pub fn artifacts(&self) -> &FeatureArtifacts {
        &self.artifacts
    }

    pub fn files(&self) -> &DataFiles {
        &self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{save_pair_cache, DataLoader, Label};
    use std::fs;
    use tempfile::TempDir;

    const TRAIN: &str = r#"[
        {"claim": "Paris is the capital of France", "evidence": ["Paris is the capital city of France"], "label": "SUPPORTS"},
        {"claim": "Berlin is in Spain", "evidence": ["Berlin is the capital of Germany"], "label": "REFUTES"},
        {"claim": "Rome has many cats", "evidence": ["Tokyo hosts summer festivals"], "label": "NOT ENOUGH INFO"}
    ]"#;

    const DEV: &str = r#"[
        {"claim": "Madrid is in Spain", "evidence": ["Madrid is the capital of Spain"], "label": 0}
    ]"#;

    const FEVER_TRAIN: &str = "id,claim,evidence,label
1,Paris is the capital of France,Paris is the capital city of France ||| It lies on the Seine,SUPPORTS
2,Berlin is in Spain,Berlin is the capital of Germany,REFUTES
3,Rome has many cats,Tokyo hosts summer festivals,NOT ENOUGH INFO
";

    const FEVER_DEV: &str = "id,claim,evidence,label
1,Madrid is in Spain,Madrid is the capital of Spain,SUPPORTS
2,Oslo is in Chile,Oslo is the capital of Norway,REFUTES
";

    fn data_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("train.json"), TRAIN).unwrap();
        fs::write(dir.path().join("dev.json"), DEV).unwrap();
        dir
    }

    fn hparams(dir: &Path, model_type: ModelType) -> HParams {
        let mut hp = HParams::new(model_type, dir.to_path_buf(), dir.join("out"), 1);
        hp.batch_size = 2;
        hp.eval_batch_size = 4;
        hp
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("TRAIN".parse::<Mode>().unwrap(), Mode::Train);
        assert_eq!("eval".parse::<Mode>().unwrap(), Mode::Eval);
        assert_eq!("predict".parse::<Mode>().unwrap(), Mode::Predict);
        assert!(matches!("fit".parse::<Mode>(), Err(NliError::InvalidMode(_))));
        assert!(matches!("infer".parse::<Mode>(), Err(NliError::InvalidMode(_))));
    }

    #[test]
    fn test_predict_falls_back_to_dev() {
        let dir = data_dir();
        let files = DataFiles::discover(dir.path(), DatasetKind::Nli);
        assert_eq!(files.for_mode(Mode::Predict), files.eval.as_path());

        fs::write(dir.path().join("test.json"), DEV).unwrap();
        assert_eq!(files.for_mode(Mode::Predict), files.test.as_path());
    }

    #[test]
    fn test_baseline_pipeline() {
        let dir = data_dir();
        let pipeline = InputPipeline::fit(&hparams(dir.path(), ModelType::Baseline)).unwrap();

        let mut train = pipeline.input_fn(Mode::Train, Some(1)).unwrap();
        assert_eq!(train.num_batches(), Some(2));

        let mut eval = pipeline.input_fn(Mode::Eval, None).unwrap();
        let batch = eval.next_batch().unwrap().unwrap();
        assert_eq!(batch.labels, vec![Label::Supports.index() as i64]);

        let spec = pipeline.artifacts().model_spec(&ModelConfig::default());
        match spec {
            ModelSpec::Baseline(config) => assert!(config.input_size > 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(train.next_batch().unwrap().is_some());
    }

    #[test]
    fn test_attention_pipeline_applies_cutoff() {
        let dir = data_dir();
        let mut hp = hparams(dir.path(), ModelType::DecomposableAttention);
        hp.cutoff_len = 2;
        let pipeline = InputPipeline::fit(&hp).unwrap();

        let loader = pipeline.input_fn(Mode::Train, Some(1)).unwrap();
        for example in loader.examples() {
            match example {
                NliExample::Tokens(t) => assert!(t.evidence.len() <= 2 && t.claim.len() <= 2),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_invalid_mode_name() {
        let dir = data_dir();
        let pipeline = InputPipeline::fit(&hparams(dir.path(), ModelType::Baseline)).unwrap();
        assert!(pipeline.input_fn_named("bogus", None).is_err());
    }

    #[test]
    fn test_artifacts_round_trip_through_disk() {
        let dir = data_dir();
        let pipeline = InputPipeline::fit(&hparams(dir.path(), ModelType::DecomposableAttention)).unwrap();
        let out = dir.path().join("run");
        pipeline.artifacts().save(&out).unwrap();
        let loaded = FeatureArtifacts::load(&out, ModelType::DecomposableAttention).unwrap();
        assert_eq!(&loaded, pipeline.artifacts());
    }

    #[test]
    fn test_fever_csv_pipeline() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("train.csv"), FEVER_TRAIN).unwrap();
        fs::write(dir.path().join("dev.csv"), FEVER_DEV).unwrap();
        let mut hp = hparams(dir.path(), ModelType::Baseline);
        hp.dataset = DatasetKind::Fever;

        let pipeline = InputPipeline::fit(&hp).unwrap();
        assert_eq!(pipeline.files().train, dir.path().join("train.csv"));

        let train = pipeline.input_fn(Mode::Train, Some(1)).unwrap();
        assert_eq!(train.len(), 3);

        let mut eval = pipeline.input_fn(Mode::Eval, None).unwrap();
        let batch = eval.next_batch().unwrap().unwrap();
        assert_eq!(
            batch.labels,
            vec![Label::Supports.index() as i64, Label::Refutes.index() as i64]
        );
    }

    #[test]
    fn test_csv_split_ignores_json_cache() {
        let dir = data_dir();
        let json = dir.path().join("train.json");
        let pairs = load_pairs(&json, DatasetKind::Nli).unwrap();
        save_pair_cache(&pair_cache_path(&json), &pairs).unwrap();

        let csv = dir.path().join("train.csv");
        fs::write(&csv, "id,claim,evidence,label\n1,Cats bark,Dogs bark,REFUTES\n").unwrap();
        let loaded = load_pairs(&csv, DatasetKind::Fever).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].claim, "Cats bark");

        // the JSON split still reads its own cache
        assert_eq!(load_pairs(&json, DatasetKind::Nli).unwrap(), pairs);
    }

    #[test]
    fn test_missing_training_split() {
        let dir = TempDir::new().unwrap();
        assert!(InputPipeline::fit(&hparams(dir.path(), ModelType::Baseline)).is_err());
    }
}
