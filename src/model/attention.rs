use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::tensor::{activation, backend::Backend, Int, Tensor};

use super::NliClassifier;
use crate::config::AttentionConfig;
use crate::data::NliInputs;
use crate::error::NliError;

/// Added to alignment scores of padded positions before the softmax.
const MASK_PENALTY: f32 = 1e9;

/// Two ReLU layers with dropout in front of each.
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    first: Linear<B>,
    second: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> FeedForward<B> {
    pub fn new(input: usize, hidden: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            first: LinearConfig::new(input, hidden).init(device),
            second: LinearConfig::new(hidden, hidden).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let x = activation::relu(self.first.forward(self.dropout.forward(input)));
        activation::relu(self.second.forward(self.dropout.forward(x)))
    }
}

/// Attend, compare, aggregate over word embeddings of claim and evidence.
#[derive(Module, Debug)]
pub struct DecomposableAttentionModel<B: Backend> {
    embedding: Embedding<B>,
    attend: FeedForward<B>,
    compare: FeedForward<B>,
    aggregate: FeedForward<B>,
    output: Linear<B>,
}

impl<B: Backend> DecomposableAttentionModel<B> {
    pub fn new(config: &AttentionConfig, device: &B::Device) -> Result<Self, NliError> {
        config.validate()?;

        let (dim, hidden) = (config.embedding_dim, config.hidden_size);
        Ok(Self {
            embedding: EmbeddingConfig::new(config.vocab_size, dim).init(device),
            attend: FeedForward::new(dim, hidden, config.dropout, device),
            compare: FeedForward::new(2 * dim, hidden, config.dropout, device),
            aggregate: FeedForward::new(2 * hidden, hidden, config.dropout, device),
            output: LinearConfig::new(hidden, config.num_classes).init(device),
        })
    }

    /// Claims `[batch, la]`, evidence `[batch, lb]`, masks of the same shapes.
    pub fn forward(
        &self,
        claims: Tensor<B, 2, Int>,
        claim_mask: Tensor<B, 2>,
        evidences: Tensor<B, 2, Int>,
        evidence_mask: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let [batch, la] = claims.dims();
        let [_, lb] = evidences.dims();

        let a = self.embedding.forward(claims);
        let b = self.embedding.forward(evidences);

        // e[i, j] = F(a_i) . F(b_j)
        let scores = self
            .attend
            .forward(a.clone())
            .matmul(self.attend.forward(b.clone()).swap_dims(1, 2));

        let evidence_bias = penalty(evidence_mask.clone(), batch, lb).repeat_dim(1, la);
        let claim_bias = penalty(claim_mask.clone(), batch, la).repeat_dim(1, lb);

        // beta: evidence aligned to each claim word; alpha: the converse
        let beta = activation::softmax(scores.clone() + evidence_bias, 2).matmul(b.clone());
        let alpha = activation::softmax(scores.swap_dims(1, 2) + claim_bias, 2).matmul(a.clone());

        let v1 = self.compare.forward(Tensor::cat(vec![a, beta], 2));
        let v2 = self.compare.forward(Tensor::cat(vec![b, alpha], 2));

        let v1 = masked_sum(v1, claim_mask);
        let v2 = masked_sum(v2, evidence_mask);

        let aggregated = self.aggregate.forward(Tensor::cat(vec![v1, v2], 1));
        self.output.forward(aggregated)
    }
}

/// `[batch, len]` 0/1 mask -> `[batch, 1, len]` with 0 for tokens and a large
/// negative value for padding.
fn penalty<B: Backend>(mask: Tensor<B, 2>, batch: usize, len: usize) -> Tensor<B, 3> {
    mask.sub_scalar(1.0)
        .mul_scalar(MASK_PENALTY)
        .reshape([batch, 1, len])
}

/// Sum `[batch, len, hidden]` over positions whose mask is 1.
fn masked_sum<B: Backend>(values: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
    let [batch, len, hidden] = values.dims();
    let mask = mask.reshape([batch, len, 1]).repeat_dim(2, hidden);
    (values * mask).sum_dim(1).reshape([batch, hidden])
}

impl<B: Backend> NliClassifier<B> for DecomposableAttentionModel<B> {
    fn name(&self) -> &'static str {
        "decomposable-attention"
    }

    fn logits(&self, inputs: NliInputs<B>) -> Result<Tensor<B, 2>, NliError> {
        match inputs {
            NliInputs::Tokens {
                claims,
                claim_mask,
                evidences,
                evidence_mask,
            } => Ok(self.forward(claims, claim_mask, evidences, evidence_mask)),
            other => Err(NliError::InputMismatch {
                model: "decomposable-attention",
                inputs: other.kind(),
            }),
        }
    }
}
