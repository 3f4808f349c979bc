use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use fever_nli::config::{DatasetKind, ModelConfig};
use fever_nli::data::{
    pair_cache_path, save_pair_cache, ClaimEvidencePair, FeatureExtractor, Label, Tokenizer,
    WordTokenizer,
};
use fever_nli::input::{load_pairs, FeatureArtifacts};

#[derive(Debug, Parser)]
#[command(author, version, about = "Preprocess claim/evidence splits into pair caches")]
struct Args {
    /// Input directory containing the JSON/CSV splits
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for the fitted artifacts and metadata. Pair caches
    /// are written next to each split so training runs pick them up.
    #[arg(short, long)]
    output: PathBuf,

    /// Data layout: nli (JSON) or fever (CSV)
    #[arg(long, default_value = "nli")]
    dataset: DatasetKind,

    /// Path to a model configuration JSON file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SplitMetadata {
    filename: String,
    pairs: usize,
    label_counts: [usize; Label::COUNT],
    processed_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CorpusMetadata {
    total_pairs: usize,
    vocab_size: usize,
    feature_dim: usize,
    splits: Vec<SplitMetadata>,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting claim preprocessing");
    info!("Input directory: {:?}", args.input);
    info!("Output directory: {:?}", args.output);

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory: {:?}", args.output))?;

    let model_config = match &args.config {
        Some(path) => ModelConfig::from_file(path)?,
        None => ModelConfig::default(),
    };

    let split_files = find_splits(&args.input, args.dataset);
    info!("Found {} split files", split_files.len());

    if split_files.is_empty() {
        anyhow::bail!("No .{} files found in {:?}", args.dataset.extension(), args.input);
    }

    let mut splits = Vec::new();
    let mut train_pairs = None;

    for (idx, path) in split_files.iter().enumerate() {
        info!("Processing {}/{}: {:?}", idx + 1, split_files.len(), path);

        let pairs = match load_pairs(path, args.dataset) {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!("Failed to process {:?}: {}", path, e);
                continue;
            }
        };

        let cache_path = cache_split(path, &pairs)?;
        info!("Wrote {} pairs to {:?}", pairs.len(), cache_path);

        let filename = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        splits.push(split_metadata(&filename, &pairs));

        if filename == "train" {
            train_pairs = Some(pairs);
        }
    }

    let train_pairs = train_pairs
        .ok_or_else(|| anyhow::anyhow!("No train split found in {:?}", args.input))?;

    info!("Fitting vectorizers on {} training pairs...", train_pairs.len());
    let extractor = FeatureExtractor::fit_pairs(&train_pairs, model_config.max_features)?;
    let feature_dim = extractor.feature_dim();
    FeatureArtifacts::Vectorizers(extractor).save(&args.output)?;

    info!("Building word vocabulary...");
    let documents: Vec<&str> = train_pairs.iter().map(|p| p.document.as_str()).collect();
    let tokenizer = WordTokenizer::fit(
        &documents,
        model_config.attention.max_vocab,
        model_config.attention.min_count,
    )?;
    let vocab_size = tokenizer.vocab_size();
    FeatureArtifacts::Vocabulary(tokenizer).save(&args.output)?;

    let metadata = CorpusMetadata {
        total_pairs: splits.iter().map(|s| s.pairs).sum(),
        vocab_size,
        feature_dim,
        splits,
    };

    let metadata_path = args.output.join("metadata.json");
    let metadata_json = serde_json::to_string_pretty(&metadata)?;
    fs::write(&metadata_path, metadata_json)
        .with_context(|| format!("Failed to write metadata: {:?}", metadata_path))?;
    info!("Metadata saved to: {:?}", metadata_path);

    info!("Preprocessing complete!");
    info!("Summary:");
    info!("  - Splits: {}", metadata.splits.len());
    info!("  - Pairs: {}", metadata.total_pairs);
    info!("  - Vocabulary size: {}", metadata.vocab_size);
    info!("  - Feature dimension: {}", metadata.feature_dim);

    Ok(())
}

/// Write the pair cache beside its split, where `load_pairs` looks for it.
fn cache_split(path: &Path, pairs: &[ClaimEvidencePair]) -> Result<PathBuf> {
    let cache_path = pair_cache_path(path);
    save_pair_cache(&cache_path, pairs)?;
    Ok(cache_path)
}

fn find_splits(input: &Path, dataset: DatasetKind) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.to_string_lossy().to_lowercase() == dataset.extension())
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

fn split_metadata(filename: &str, pairs: &[ClaimEvidencePair]) -> SplitMetadata {
    let mut label_counts = [0; Label::COUNT];
    for pair in pairs {
        label_counts[pair.label.index()] += 1;
    }

    SplitMetadata {
        filename: filename.to_string(),
        pairs: pairs.len(),
        label_counts,
        processed_at: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fever_nli::data::{get_claim_evidence_pairs, ClaimRecord, EvidenceMode};
    use tempfile::TempDir;

    const SPLIT: &str = r#"[
        {"claim": "Paris is in France", "evidence": ["Paris is the capital of France"], "label": "SUPPORTS"},
        {"claim": "Cats bark", "evidence": ["Dogs bark"], "label": "REFUTES"},
        {"claim": "Oslo is cold", "evidence": [], "label": "REFUTES"}
    ]"#;

    #[test]
    fn test_find_splits_matches_dataset_extension() {
        let dir = TempDir::new().unwrap();
        for name in ["train.json", "dev.json", "test.csv", "notes.txt", "train.json.pairs.bin"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("extra.json"), "").unwrap();

        let json = find_splits(dir.path(), DatasetKind::Nli);
        assert_eq!(json, vec![dir.path().join("dev.json"), dir.path().join("train.json")]);

        let csv = find_splits(dir.path(), DatasetKind::Fever);
        assert_eq!(csv, vec![dir.path().join("test.csv")]);
    }

    #[test]
    fn test_split_metadata_counts_labels() {
        let records = vec![
            ClaimRecord {
                claim: "a claim".into(),
                evidence: vec!["some evidence".into()],
                label: Label::Refutes,
            },
            ClaimRecord {
                claim: "another claim".into(),
                evidence: vec![],
                label: Label::Refutes,
            },
            ClaimRecord {
                claim: "third claim".into(),
                evidence: vec![],
                label: Label::NotEnoughInfo,
            },
        ];
        let pairs = get_claim_evidence_pairs(&records, EvidenceMode::Concat);

        let metadata = split_metadata("dev", &pairs);
        assert_eq!(metadata.filename, "dev");
        assert_eq!(metadata.pairs, 3);
        assert_eq!(metadata.label_counts, [0, 2, 1]);
        assert!(metadata.processed_at > 0);
    }

    #[test]
    fn test_cache_lands_beside_split() {
        let dir = TempDir::new().unwrap();
        let split = dir.path().join("train.json");
        fs::write(&split, SPLIT).unwrap();
        let pairs = load_pairs(&split, DatasetKind::Nli).unwrap();

        let cache = cache_split(&split, &pairs).unwrap();
        assert_eq!(cache, dir.path().join("train.json.pairs.bin"));

        // once cached, the pipeline no longer parses the source file
        fs::write(&split, "not json").unwrap();
        assert_eq!(load_pairs(&split, DatasetKind::Nli).unwrap(), pairs);
    }
}
