use anyhow::Result;
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLoss;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};

use super::metrics::{ConfusionMatrix, EvalMetrics};
use crate::data::{DataLoader, Label, NliBatchData};
use crate::model::NliClassifier;

#[derive(Clone, Debug)]
pub struct TrainOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub step: usize,
}

impl<B: Backend> TrainOutput<B> {
    pub fn new(loss: Tensor<B, 1>, step: usize) -> Self {
        Self { loss, step }
    }

    pub fn loss_value(&self) -> f32 {
        self.loss.clone().into_scalar().elem::<f32>()
    }
}

/// Adam + cross-entropy training of any [`NliClassifier`].
pub struct NliTrainer<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + NliClassifier<B>,
{
    model: M,
    optimizer: OptimizerAdaptor<Adam, M, B>,
    loss_fn: CrossEntropyLoss<B>,
    learning_rate: f64,
    device: B::Device,
    step: usize,
}

impl<B, M> NliTrainer<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + NliClassifier<B>,
    M::InnerModule: NliClassifier<B::InnerBackend>,
{
    pub fn new(model: M, learning_rate: f64, device: &B::Device) -> Self {
        let optimizer = AdamConfig::new().init::<B, M>();
        let loss_fn = CrossEntropyLoss::new(None, device);

        Self {
            model,
            optimizer,
            loss_fn,
            learning_rate,
            device: device.clone(),
            step: 0,
        }
    }

    pub fn train_step(&mut self, batch: &NliBatchData) -> Result<TrainOutput<B>> {
        let batch = batch.to_batch::<B>(&self.device);

        let logits = self.model.logits(batch.inputs)?;
        let loss = self.loss_fn.forward(logits, batch.labels);

        // Backward pass
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);

        // Optimizer step
        self.model = self.optimizer.step(self.learning_rate, self.model.clone(), grads);
        self.step += 1;

        Ok(TrainOutput::new(loss, self.step))
    }

    /// Evaluate on every batch of `loader` with dropout disabled.
    ///
    /// The loader is reset before and after the pass.
    pub fn evaluate<L: DataLoader>(&self, name: &str, loader: &mut L) -> Result<EvalMetrics> {
        evaluate_model::<B::InnerBackend, _, _>(&self.model.valid(), &self.device, name, self.step, loader)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

/// Mean loss and confusion matrix of `model` over `loader`.
///
/// An empty loader yields zero examples and no loss.
pub fn evaluate_model<B, M, L>(
    model: &M,
    device: &B::Device,
    name: &str,
    step: usize,
    loader: &mut L,
) -> Result<EvalMetrics>
where
    B: Backend,
    M: NliClassifier<B>,
    L: DataLoader,
{
    let loss_fn = CrossEntropyLoss::<B>::new(None, device);
    let mut confusion = ConfusionMatrix::new(Label::COUNT);
    let mut loss_sum = 0.0f64;
    let mut seen = 0usize;

    loader.reset();
    while let Some(data) = loader.next_batch()? {
        let size = data.len();
        let batch = data.to_batch::<B>(device);

        let logits = model.logits(batch.inputs)?;
        let loss: f64 = loss_fn
            .forward(logits.clone(), batch.labels)
            .into_scalar()
            .elem::<f64>();
        loss_sum += loss * size as f64;
        seen += size;

        let predictions: Vec<usize> = logits
            .argmax(1)
            .flatten::<1>(0, 1)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| anyhow::anyhow!("Failed to read predictions: {:?}", e))?
            .into_iter()
            .map(|p| p as usize)
            .collect();
        let targets: Vec<usize> = data.labels.iter().map(|&l| l as usize).collect();
        confusion.update(&predictions, &targets);
    }
    loader.reset();

    let loss = (seen > 0).then(|| loss_sum / seen as f64);
    Ok(EvalMetrics::new(name, step, loss, confusion))
}
