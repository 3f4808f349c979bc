pub mod metrics;
pub mod runner;
pub mod summary;
pub mod trainer;

pub use metrics::{ConfusionMatrix, EvalMetrics};
pub use runner::{evaluate_checkpoint, resolve_checkpoint, run_experiment, RunReport};
pub use summary::{read_summaries, SummaryRecord, SummaryWriter};
pub use trainer::{evaluate_model, NliTrainer, TrainOutput};
