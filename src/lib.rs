// Library exports for use in scripts and other binaries

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod input;
pub mod model;
pub mod training;

// Re-export commonly used types
pub use config::{HParams, ModelConfig, ModelType, RunConfig};
pub use error::NliError;
pub use input::{InputPipeline, Mode};
pub use model::{BaselineModel, DecomposableAttentionModel, NliClassifier};
pub use training::{evaluate_checkpoint, run_experiment, NliTrainer, RunReport};
