use anyhow::Result;
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::features::NliFeatures;
use super::record::Label;
use crate::error::NliError;

/// Token ids of a claim and its evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedPair {
    pub claim: Vec<i64>,
    pub evidence: Vec<i64>,
    pub label: Label,
}

/// One encoded example, in the shape its model consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum NliExample {
    Features(NliFeatures),
    Tokens(TokenizedPair),
}

impl NliExample {
    pub fn label(&self) -> Label {
        match self {
            NliExample::Features(f) => f.label,
            NliExample::Tokens(t) => t.label,
        }
    }
}

/// Host-side batch, independent of any backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NliBatchData {
    pub inputs: BatchInputs,
    pub labels: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchInputs {
    /// Row-major `[batch, width]` dense features.
    Features { values: Vec<f32>, width: usize },
    /// Padded id matrices with 0/1 masks.
    Tokens {
        claims: PaddedSequences,
        evidences: PaddedSequences,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaddedSequences {
    pub ids: Vec<i64>,
    pub mask: Vec<f32>,
    pub len: usize,
}

impl PaddedSequences {
    /// Pad every sequence to the longest one (at least 1) with `pad_id`.
    pub fn pad(sequences: &[&[i64]], pad_id: i64) -> Self {
        let len = sequences.iter().map(|s| s.len()).max().unwrap_or(0).max(1);
        let mut ids = Vec::with_capacity(sequences.len() * len);
        let mut mask = Vec::with_capacity(sequences.len() * len);

        for seq in sequences {
            ids.extend_from_slice(seq);
            ids.extend(std::iter::repeat(pad_id).take(len - seq.len()));
            mask.extend(std::iter::repeat(1.0).take(seq.len()));
            mask.extend(std::iter::repeat(0.0).take(len - seq.len()));
        }

        Self { ids, mask, len }
    }
}

impl NliBatchData {
    /// Collate examples of one kind into a batch.
    pub fn collate(examples: &[&NliExample], pad_id: i64) -> Result<Self, NliError> {
        let labels = examples.iter().map(|e| e.label().index() as i64).collect();

        let inputs = match examples.first() {
            None => return Err(NliError::EmptyDataset("cannot collate an empty batch".into())),
            Some(NliExample::Features(first)) => {
                let width = first.dim();
                let mut values = vec![0.0; examples.len() * width];
                for (row, example) in values.chunks_mut(width).zip(examples) {
                    match example {
                        NliExample::Features(f) if f.dim() == width => f.write_dense(row),
                        _ => {
                            return Err(NliError::InputMismatch {
                                model: "feature batch",
                                inputs: "mixed",
                            })
                        }
                    }
                }
                BatchInputs::Features { values, width }
            }
            Some(NliExample::Tokens(_)) => {
                let mut claims = Vec::with_capacity(examples.len());
                let mut evidences = Vec::with_capacity(examples.len());
                for example in examples {
                    match example {
                        NliExample::Tokens(t) => {
                            claims.push(t.claim.as_slice());
                            evidences.push(t.evidence.as_slice());
                        }
                        NliExample::Features(_) => {
                            return Err(NliError::InputMismatch {
                                model: "token batch",
                                inputs: "mixed",
                            })
                        }
                    }
                }
                BatchInputs::Tokens {
                    claims: PaddedSequences::pad(&claims, pad_id),
                    evidences: PaddedSequences::pad(&evidences, pad_id),
                }
            }
        };

        Ok(Self { inputs, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Move the batch onto `device`.
    pub fn to_batch<B: Backend>(&self, device: &B::Device) -> NliBatch<B> {
        let batch = self.len();
        let inputs = match &self.inputs {
            BatchInputs::Features { values, width } => NliInputs::Features(Tensor::from_data(
                TensorData::new(values.clone(), [batch, *width]),
                device,
            )),
            BatchInputs::Tokens { claims, evidences } => NliInputs::Tokens {
                claims: ids_tensor(claims, batch, device),
                claim_mask: mask_tensor(claims, batch, device),
                evidences: ids_tensor(evidences, batch, device),
                evidence_mask: mask_tensor(evidences, batch, device),
            },
        };

        let labels = Tensor::from_data(TensorData::new(self.labels.clone(), [batch]), device);
        NliBatch { inputs, labels }
    }
}

fn ids_tensor<B: Backend>(seqs: &PaddedSequences, batch: usize, device: &B::Device) -> Tensor<B, 2, Int> {
    Tensor::from_data(TensorData::new(seqs.ids.clone(), [batch, seqs.len]), device)
}

fn mask_tensor<B: Backend>(seqs: &PaddedSequences, batch: usize, device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(seqs.mask.clone(), [batch, seqs.len]), device)
}

/// Model inputs on a device.
#[derive(Clone, Debug)]
pub enum NliInputs<B: Backend> {
    /// `[batch, feature_dim]`
    Features(Tensor<B, 2>),
    /// Ids `[batch, len]` with float masks of the same shape.
    Tokens {
        claims: Tensor<B, 2, Int>,
        claim_mask: Tensor<B, 2>,
        evidences: Tensor<B, 2, Int>,
        evidence_mask: Tensor<B, 2>,
    },
}

impl<B: Backend> NliInputs<B> {
    pub fn kind(&self) -> &'static str {
        match self {
            NliInputs::Features(_) => "feature",
            NliInputs::Tokens { .. } => "token",
        }
    }
}

#[derive(Clone, Debug)]
pub struct NliBatch<B: Backend> {
    pub inputs: NliInputs<B>,
    pub labels: Tensor<B, 1, Int>,
}

/// Trait for data loading
pub trait DataLoader {
    /// Get the next batch of data
    fn next_batch(&mut self) -> Result<Option<NliBatchData>>;

    /// Reset the data loader to the beginning
    fn reset(&mut self);

    /// Get the total number of batches (if known)
    fn num_batches(&self) -> Option<usize>;
}

/// Batches pre-encoded examples, optionally reshuffling on every reset.
pub struct ExampleLoader {
    examples: Vec<NliExample>,
    order: Vec<usize>,
    batch_size: usize,
    pad_id: i64,
    cursor: usize,
    rng: Option<StdRng>,
}

impl ExampleLoader {
    pub fn new(examples: Vec<NliExample>, batch_size: usize, pad_id: i64) -> Result<Self, NliError> {
        if batch_size == 0 {
            return Err(NliError::InvalidConfig("batch_size must be > 0".into()));
        }
        let order = (0..examples.len()).collect();
        Ok(Self {
            examples,
            order,
            batch_size,
            pad_id,
            cursor: 0,
            rng: None,
        })
    }

    /// Shuffle now and after every reset. `None` seeds from entropy.
    pub fn with_shuffle(mut self, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.order.shuffle(&mut rng);
        self.rng = Some(rng);
        self
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[NliExample] {
        &self.examples
    }
}

impl DataLoader for ExampleLoader {
    fn next_batch(&mut self) -> Result<Option<NliBatchData>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch: Vec<&NliExample> = self.order[self.cursor..end]
            .iter()
            .map(|&i| &self.examples[i])
            .collect();
        self.cursor = end;

        Ok(Some(NliBatchData::collate(&batch, self.pad_id)?))
    }

    fn reset(&mut self) {
        self.cursor = 0;
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
    }

    fn num_batches(&self) -> Option<usize> {
        Some(self.examples.len().div_ceil(self.batch_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::vectorizer::SparseVector;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn token_example(claim: Vec<i64>, evidence: Vec<i64>, label: Label) -> NliExample {
        NliExample::Tokens(TokenizedPair { claim, evidence, label })
    }

    fn feature_example(label: Label) -> NliExample {
        NliExample::Features(NliFeatures {
            tf_claim: SparseVector { dim: 2, indices: vec![0], values: vec![1.0] },
            tfidf_sim: 0.5,
            tf_evidence: SparseVector { dim: 2, indices: vec![1], values: vec![2.0] },
            label,
        })
    }

    #[test]
    fn test_padding_and_mask() {
        let padded = PaddedSequences::pad(&[&[5, 6, 7], &[8], &[]], 0);
        assert_eq!(padded.len, 3);
        assert_eq!(padded.ids, vec![5, 6, 7, 8, 0, 0, 0, 0, 0]);
        assert_eq!(padded.mask, vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let empty = PaddedSequences::pad(&[&[]], 0);
        assert_eq!(empty.len, 1);
    }

    #[test]
    fn test_loader_includes_partial_batch() {
        let examples = (0..5)
            .map(|i| token_example(vec![i + 2], vec![i + 2, 3], Label::Supports))
            .collect();
        let mut loader = ExampleLoader::new(examples, 2, 0).unwrap();
        assert_eq!(loader.num_batches(), Some(3));

        let sizes: Vec<usize> = std::iter::from_fn(|| loader.next_batch().unwrap())
            .map(|b| b.len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        loader.reset();
        assert!(loader.next_batch().unwrap().is_some());
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let examples = (0..10)
            .map(|i| token_example(vec![i], vec![i], Label::Refutes))
            .collect();
        let mut loader = ExampleLoader::new(examples, 10, 0).unwrap().with_shuffle(Some(3));
        let batch = loader.next_batch().unwrap().unwrap();
        let BatchInputs::Tokens { claims, .. } = batch.inputs else {
            panic!("expected tokens");
        };
        let mut ids = claims.ids.clone();
        ids.sort();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_batch_size() {
        assert!(ExampleLoader::new(Vec::new(), 0, 0).is_err());
    }

    #[test]
    fn test_feature_batch_to_tensors() {
        let examples = vec![feature_example(Label::Supports), feature_example(Label::NotEnoughInfo)];
        let refs: Vec<&NliExample> = examples.iter().collect();
        let data = NliBatchData::collate(&refs, 0).unwrap();
        assert_eq!(data.labels, vec![0, 2]);

        let batch = data.to_batch::<TestBackend>(&Default::default());
        match batch.inputs {
            NliInputs::Features(t) => assert_eq!(t.dims(), [2, 5]),
            other => panic!("unexpected {}", other.kind()),
        }
        assert_eq!(batch.labels.dims(), [2]);
    }

    #[test]
    fn test_token_batch_to_tensors() {
        let examples = vec![
            token_example(vec![2, 3], vec![4], Label::Supports),
            token_example(vec![5], vec![6, 7, 8], Label::Refutes),
        ];
        let refs: Vec<&NliExample> = examples.iter().collect();
        let batch = NliBatchData::collate(&refs, 0)
            .unwrap()
            .to_batch::<TestBackend>(&Default::default());

        match batch.inputs {
            NliInputs::Tokens { claims, evidence_mask, .. } => {
                assert_eq!(claims.dims(), [2, 2]);
                assert_eq!(evidence_mask.dims(), [2, 3]);
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn test_mixed_batch_rejected() {
        let examples = vec![feature_example(Label::Supports), token_example(vec![1], vec![1], Label::Supports)];
        let refs: Vec<&NliExample> = examples.iter().collect();
        assert!(NliBatchData::collate(&refs, 0).is_err());
    }
}
