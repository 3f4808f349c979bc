pub mod attention;
pub mod baseline;

pub use attention::{DecomposableAttentionModel, FeedForward};
pub use baseline::BaselineModel;

use burn::tensor::{backend::Backend, Tensor};

use crate::data::NliInputs;
use crate::error::NliError;

/// A model that maps a batch of claim/evidence inputs to class logits.
pub trait NliClassifier<B: Backend> {
    fn name(&self) -> &'static str;

    /// `[batch, num_classes]` logits. Fails if the inputs are of the wrong kind.
    fn logits(&self, inputs: NliInputs<B>) -> Result<Tensor<B, 2>, NliError>;
}
