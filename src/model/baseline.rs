use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::{activation, backend::Backend, Tensor};

use super::NliClassifier;
use crate::config::BaselineConfig;
use crate::data::NliInputs;
use crate::error::NliError;

/// Single hidden layer MLP over `[tf_claim | tfidf_sim | tf_evidence]`.
#[derive(Module, Debug)]
pub struct BaselineModel<B: Backend> {
    hidden: Linear<B>,
    output: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> BaselineModel<B> {
    pub fn new(config: &BaselineConfig, device: &B::Device) -> Result<Self, NliError> {
        config.validate()?;

        Ok(Self {
            hidden: LinearConfig::new(config.input_size, config.hidden_size).init(device),
            output: LinearConfig::new(config.hidden_size, config.num_classes).init(device),
            dropout: DropoutConfig::new(config.dropout).init(),
        })
    }

    /// `[batch, input_size]` -> `[batch, num_classes]`
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let hidden = activation::relu(self.hidden.forward(features));
        let hidden = self.dropout.forward(hidden);
        self.output.forward(hidden)
    }
}

impl<B: Backend> NliClassifier<B> for BaselineModel<B> {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn logits(&self, inputs: NliInputs<B>) -> Result<Tensor<B, 2>, NliError> {
        match inputs {
            NliInputs::Features(features) => Ok(self.forward(features)),
            other => Err(NliError::InputMismatch {
                model: "baseline",
                inputs: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn config() -> BaselineConfig {
        BaselineConfig::default().with_input_size(7)
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = BaselineModel::<TestBackend>::new(&config(), &device).unwrap();
        let logits = model
            .logits(NliInputs::Features(Tensor::zeros([4, 7], &device)))
            .unwrap();
        assert_eq!(logits.dims(), [4, 3]);
    }

    #[test]
    fn test_rejects_token_inputs() {
        let device = Default::default();
        let model = BaselineModel::<TestBackend>::new(&config(), &device).unwrap();
        let inputs = NliInputs::Tokens {
            claims: Tensor::zeros([1, 2], &device),
            claim_mask: Tensor::ones([1, 2], &device),
            evidences: Tensor::zeros([1, 2], &device),
            evidence_mask: Tensor::ones([1, 2], &device),
        };
        assert!(matches!(model.logits(inputs), Err(NliError::InputMismatch { .. })));
    }

    #[test]
    fn test_invalid_config() {
        let device = Default::default();
        assert!(BaselineModel::<TestBackend>::new(&BaselineConfig::default(), &device).is_err());
    }
}
