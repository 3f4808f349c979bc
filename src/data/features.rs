use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use super::pairs::ClaimEvidencePair;
use super::record::Label;
use super::similarity::paired_cosine;
use super::vectorizer::{CountVectorizer, SparseVector, TfidfVectorizer};
use crate::error::NliError;

/// Baseline input for one claim: term counts of the claim, TF-IDF cosine
/// between claim and evidence, term counts of the evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct NliFeatures {
    pub tf_claim: SparseVector,
    pub tfidf_sim: f32,
    pub tf_evidence: SparseVector,
    pub label: Label,
}

/// Count and TF-IDF vectorizers fitted on claim+evidence documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureExtractor {
    tf: CountVectorizer,
    tfidf: TfidfVectorizer,
}

impl FeatureExtractor {
    pub fn fit<S: AsRef<str>>(documents: &[S], max_features: usize) -> Result<Self, NliError> {
        let tf = CountVectorizer::fit(documents, max_features)?;
        let tfidf = TfidfVectorizer::fit(documents, max_features)?;
        info!(
            "Fitted vectorizers on {} documents ({} terms)",
            documents.len(),
            tf.vocabulary().len()
        );
        Ok(Self { tf, tfidf })
    }

    /// Fit on the `document` field of each pair.
    pub fn fit_pairs(pairs: &[ClaimEvidencePair], max_features: usize) -> Result<Self, NliError> {
        let documents: Vec<&str> = pairs.iter().map(|p| p.document.as_str()).collect();
        Self::fit(&documents, max_features)
    }

    /// One feature tuple per pair, in input order.
    pub fn transform(&self, pairs: &[ClaimEvidencePair]) -> Result<Vec<NliFeatures>, NliError> {
        let claims: Vec<&str> = pairs.iter().map(|p| p.claim.as_str()).collect();
        let evidences: Vec<String> = pairs.iter().map(|p| p.evidence_text()).collect();

        let tf_claims = self.tf.transform_all(&claims);
        let tf_evidences = self.tf.transform_all(&evidences);
        let sims = paired_cosine(
            &self.tfidf.transform_all(&claims),
            &self.tfidf.transform_all(&evidences),
        )?;

        Ok(tf_claims
            .into_iter()
            .zip(sims)
            .zip(tf_evidences)
            .zip(pairs)
            .map(|(((tf_claim, tfidf_sim), tf_evidence), pair)| NliFeatures {
                tf_claim,
                tfidf_sim,
                tf_evidence,
                label: pair.label,
            })
            .collect())
    }

    pub fn vocab_size(&self) -> usize {
        self.tf.vocabulary().len()
    }

    /// Width of a densified feature row.
    pub fn feature_dim(&self) -> usize {
        2 * self.vocab_size() + 1
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self).with_context(|| "Failed to serialize vectorizers")?;
        fs::write(path, json).with_context(|| format!("Failed to write vectorizers to {:?}", path))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read vectorizers from {:?}", path))?;
        let extractor: Self =
            serde_json::from_str(&json).with_context(|| "Failed to deserialize vectorizers")?;
        Ok(extractor)
    }
}

impl NliFeatures {
    pub fn dim(&self) -> usize {
        self.tf_claim.dim + 1 + self.tf_evidence.dim
    }

    /// Lay out `[tf_claim | tfidf_sim | tf_evidence]` into `out`.
    pub fn write_dense(&self, out: &mut [f32]) {
        let claim_dim = self.tf_claim.dim;
        self.tf_claim.write_dense(&mut out[..claim_dim]);
        out[claim_dim] = self.tfidf_sim;
        self.tf_evidence.write_dense(&mut out[claim_dim + 1..]);
    }

    pub fn densify(&self) -> Vec<f32> {
        let mut dense = vec![0.0; self.dim()];
        self.write_dense(&mut dense);
        dense
    }
}
