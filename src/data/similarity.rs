use super::vectorizer::SparseVector;
use crate::error::NliError;

/// Cosine similarity of two sparse vectors; 0.0 if either is all zeros.
pub fn cosine_similarity(a: &SparseVector, b: &SparseVector) -> f32 {
    let denom = a.norm() * b.norm();
    if denom == 0.0 {
        return 0.0;
    }
    a.dot(b) / denom
}

/// Similarity of each claim with its own evidence, one score per row.
pub fn paired_cosine(claims: &[SparseVector], evidences: &[SparseVector]) -> Result<Vec<f32>, NliError> {
    if claims.len() != evidences.len() {
        return Err(NliError::LengthMismatch {
            left: claims.len(),
            right: evidences.len(),
        });
    }

    Ok(claims
        .iter()
        .zip(evidences)
        .map(|(c, e)| cosine_similarity(c, e))
        .collect())
}
