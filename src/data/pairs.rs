use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::record::{ClaimRecord, Label};

/// How the evidence sentences of a claim are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvidenceMode {
    /// Join all sentences into one evidence string.
    #[default]
    Concat,
    /// Keep the sentences apart; `evidence` is joined only on demand.
    List,
}

/// A claim paired with its evidence and the document used to fit vectorizers.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimEvidencePair {
    pub claim: String,
    pub evidence: Evidence,
    /// Evidence followed by the claim.
    pub document: String,
    pub label: Label,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evidence {
    Joined(String),
    Sentences(Vec<String>),
}

impl Evidence {
    pub fn text(&self) -> String {
        match self {
            Evidence::Joined(text) => text.clone(),
            Evidence::Sentences(sentences) => sentences.join(" "),
        }
    }
}

impl ClaimEvidencePair {
    pub fn evidence_text(&self) -> String {
        self.evidence.text()
    }

    /// Keep only the first `cutoff` words of the evidence.
    pub fn truncated(mut self, cutoff: usize) -> Self {
        let text = truncate_words(&self.evidence.text(), cutoff);
        self.evidence = Evidence::Joined(text);
        self
    }
}

/// Build one pair per record, in input order. Labels stay one-to-one with claims.
pub fn get_claim_evidence_pairs(records: &[ClaimRecord], mode: EvidenceMode) -> Vec<ClaimEvidencePair> {
    records
        .iter()
        .map(|record| {
            let joined = record.evidence.join(" ");
            let document = if joined.is_empty() {
                record.claim.clone()
            } else {
                format!("{} {}", joined, record.claim)
            };

            let evidence = match mode {
                EvidenceMode::Concat => Evidence::Joined(joined),
                EvidenceMode::List => Evidence::Sentences(record.evidence.clone()),
            };

            ClaimEvidencePair {
                claim: record.claim.clone(),
                evidence,
                document,
                label: record.label,
            }
        })
        .collect()
}

pub fn truncate_words(text: &str, cutoff: usize) -> String {
    text.split_whitespace()
        .take(cutoff)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Serialize, Deserialize)]
struct CachedPair {
    claim: String,
    evidence: String,
    document: String,
    label: u8,
}

/// Cache file sitting next to a dataset split: `train.json` -> `train.json.pairs.bin`.
///
/// The source extension stays in the name so `train.json` and `train.csv`
/// never share a cache.
pub fn pair_cache_path(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("{name}.pairs.bin"))
}

pub fn save_pair_cache(path: &Path, pairs: &[ClaimEvidencePair]) -> Result<()> {
    let cached: Vec<CachedPair> = pairs
        .iter()
        .map(|pair| CachedPair {
            claim: pair.claim.clone(),
            evidence: pair.evidence_text(),
            document: pair.document.clone(),
            label: pair.label.index() as u8,
        })
        .collect();

    let bytes = bincode::serialize(&cached).with_context(|| "Failed to encode pair cache")?;
    fs::write(path, bytes).with_context(|| format!("Failed to write pair cache: {:?}", path))?;

    info!("Cached {} pairs to {:?}", pairs.len(), path);
    Ok(())
}

pub fn load_pair_cache(path: &Path) -> Result<Vec<ClaimEvidencePair>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read pair cache: {:?}", path))?;
    let cached: Vec<CachedPair> = bincode::deserialize(&bytes)
        .with_context(|| format!("Failed to decode pair cache: {:?}", path))?;

    let pairs = cached
        .into_iter()
        .map(|c| {
            Ok(ClaimEvidencePair {
                claim: c.claim,
                evidence: Evidence::Joined(c.evidence),
                document: c.document,
                label: Label::from_index(i64::from(c.label))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!("Loaded {} cached pairs from {:?}", pairs.len(), path);
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn records() -> Vec<ClaimRecord> {
        vec![
            ClaimRecord {
                claim: "Paris is in France.".into(),
                evidence: vec!["Paris is the capital.".into(), "It is in France.".into()],
                label: Label::Supports,
            },
            ClaimRecord {
                claim: "Cats bark.".into(),
                evidence: vec![],
                label: Label::Refutes,
            },
        ]
    }

    #[test]
    fn test_pairs_keep_one_label_per_claim() {
        let pairs = get_claim_evidence_pairs(&records(), EvidenceMode::Concat);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].label, Label::Supports);
        assert_eq!(pairs[1].label, Label::Refutes);
        assert_eq!(pairs[0].evidence_text(), "Paris is the capital. It is in France.");
        assert_eq!(
            pairs[0].document,
            "Paris is the capital. It is in France. Paris is in France."
        );
        assert_eq!(pairs[1].document, "Cats bark.");
    }

    #[test]
    fn test_list_mode_keeps_sentences() {
        let pairs = get_claim_evidence_pairs(&records(), EvidenceMode::List);
        match &pairs[0].evidence {
            Evidence::Sentences(s) => assert_eq!(s.len(), 2),
            other => panic!("unexpected evidence {other:?}"),
        }
    }

    #[test]
    fn test_truncate_words() {
        assert_eq!(truncate_words("a b  c d", 2), "a b");
        assert_eq!(truncate_words("a b", 10), "a b");
        let pair = get_claim_evidence_pairs(&records(), EvidenceMode::Concat)
            .remove(0)
            .truncated(3);
        assert_eq!(pair.evidence_text(), "Paris is the");
    }

    #[test]
    fn test_pair_cache_path() {
        assert_eq!(
            pair_cache_path(Path::new("/data/train.json")),
            PathBuf::from("/data/train.json.pairs.bin")
        );
        assert_ne!(
            pair_cache_path(Path::new("/data/train.json")),
            pair_cache_path(Path::new("/data/train.csv"))
        );
    }

    #[test]
    fn test_pair_cache_restores_pairs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("train.json.pairs.bin");
        let pairs = get_claim_evidence_pairs(&records(), EvidenceMode::Concat);

        save_pair_cache(&path, &pairs).unwrap();
        let restored = load_pair_cache(&path).unwrap();
        assert_eq!(restored, pairs);
    }
}
