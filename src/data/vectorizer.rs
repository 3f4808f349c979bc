use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::text::analyze;
use crate::error::NliError;

/// Sparse row vector with sorted, unique indices.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SparseVector {
    pub dim: usize,
    pub indices: Vec<usize>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    fn from_map(dim: usize, entries: BTreeMap<usize, f32>) -> Self {
        let (indices, values) = entries.into_iter().unzip();
        Self { dim, indices, values }
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }

    /// Write the vector into `out`, which must be `dim` long.
    pub fn write_dense(&self, out: &mut [f32]) {
        for (&idx, &value) in self.indices.iter().zip(&self.values) {
            out[idx] = value;
        }
    }

    pub fn to_dense(&self) -> Vec<f32> {
        let mut dense = vec![0.0; self.dim];
        self.write_dense(&mut dense);
        dense
    }
}

/// Term vocabulary shared by the count and TF-IDF vectorizers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    terms: HashMap<String, usize>,
}

impl Vocabulary {
    /// Keep the `max_features` most frequent terms across `documents`
    /// (ties alphabetical), then index them alphabetically.
    ///
    /// Also returns the document frequency of each kept term, by index.
    fn fit<S: AsRef<str>>(documents: &[S], max_features: usize) -> Result<(Self, Vec<usize>), NliError> {
        let mut term_counts: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let tokens = analyze(doc.as_ref());
            let mut seen = std::collections::HashSet::new();
            for token in tokens {
                if seen.insert(token.clone()) {
                    *doc_freq.entry(token.clone()).or_default() += 1;
                }
                *term_counts.entry(token).or_default() += 1;
            }
        }

        if term_counts.is_empty() {
            return Err(NliError::EmptyVocabulary);
        }

        let mut ranked: Vec<(String, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(max_features);

        let mut kept: Vec<String> = ranked.into_iter().map(|(term, _)| term).collect();
        kept.sort();

        let df = kept.iter().map(|term| doc_freq[term]).collect();
        let terms = kept.into_iter().enumerate().map(|(i, t)| (t, i)).collect();
        Ok((Self { terms }, df))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.terms.get(term).copied()
    }

    fn counts(&self, text: &str) -> BTreeMap<usize, f32> {
        let mut counts = BTreeMap::new();
        for token in analyze(text) {
            if let Some(idx) = self.index_of(&token) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }
        counts
    }
}

/// Bag-of-words term-frequency vectorizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountVectorizer {
    vocabulary: Vocabulary,
}

impl CountVectorizer {
    pub fn fit<S: AsRef<str>>(documents: &[S], max_features: usize) -> Result<Self, NliError> {
        let (vocabulary, _) = Vocabulary::fit(documents, max_features)?;
        Ok(Self { vocabulary })
    }

    pub fn transform(&self, text: &str) -> SparseVector {
        SparseVector::from_map(self.vocabulary.len(), self.vocabulary.counts(text))
    }

    pub fn transform_all<S: AsRef<str>>(&self, texts: &[S]) -> Vec<SparseVector> {
        texts.iter().map(|t| self.transform(t.as_ref())).collect()
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }
}

/// TF-IDF vectorizer with smoothed idf and L2-normalized rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    vocabulary: Vocabulary,
    idf: Vec<f32>,
}

impl TfidfVectorizer {
    pub fn fit<S: AsRef<str>>(documents: &[S], max_features: usize) -> Result<Self, NliError> {
        let (vocabulary, df) = Vocabulary::fit(documents, max_features)?;
        let n = documents.len() as f32;
        let idf = df
            .into_iter()
            .map(|d| ((1.0 + n) / (1.0 + d as f32)).ln() + 1.0)
            .collect();
        Ok(Self { vocabulary, idf })
    }

    pub fn transform(&self, text: &str) -> SparseVector {
        let mut weights = self.vocabulary.counts(text);
        for (idx, weight) in weights.iter_mut() {
            *weight *= self.idf[*idx];
        }

        let norm = weights.values().map(|w| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for weight in weights.values_mut() {
                *weight /= norm;
            }
        }
        SparseVector::from_map(self.vocabulary.len(), weights)
    }

    pub fn transform_all<S: AsRef<str>>(&self, texts: &[S]) -> Vec<SparseVector> {
        texts.iter().map(|t| self.transform(t.as_ref())).collect()
    }

    pub fn idf(&self) -> &[f32] {
        &self.idf
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }
}
